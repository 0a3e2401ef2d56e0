//! Configuration management for the throttler.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ThrottlerError};
use crate::ratelimit::{validate_rules, GroupConfig, RateRule};

/// Prefix for environment overrides, e.g. `THROTTLER_STORAGE__TYPE=redis`.
const ENV_PREFIX: &str = "THROTTLER";

/// Main configuration for the throttler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Default rules, applied in order, when a route declares none
    #[serde(default)]
    pub limits: Vec<RateRule>,

    /// User-agent patterns that bypass throttling
    #[serde(default)]
    pub ignore_user_agents: Vec<String>,

    /// Namespace prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-group and per-handler overrides
    #[serde(default)]
    pub routes: HashMap<String, GroupConfig>,

    /// Counter store selection
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            limits: Vec::new(),
            ignore_user_agents: Vec::new(),
            key_prefix: default_key_prefix(),
            routes: HashMap::new(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_key_prefix() -> String {
    "throttler".to_string()
}

/// Which counter store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Redis,
    Mongodb,
}

/// Counter store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend type
    #[serde(rename = "type", default)]
    pub kind: StorageType,

    /// Redis connection options
    #[serde(default)]
    pub redis: Option<RedisOptions>,

    /// MongoDB connection options
    #[serde(default)]
    pub mongodb: Option<MongoOptions>,
}

/// Redis connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisOptions {
    /// Connection URL, e.g. `redis://127.0.0.1/`
    pub url: String,
}

/// MongoDB connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoOptions {
    /// Connection URL, e.g. `mongodb://localhost:27017`
    pub url: String,

    /// Database name; falls back to the database in the URL
    #[serde(default)]
    pub database: Option<String>,

    /// Collection holding the counters
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "throttler".to_string()
}

/// The `routes` table alone, read without key normalisation.
#[derive(Debug, Default, Deserialize)]
struct RoutesSection {
    #[serde(default)]
    routes: HashMap<String, GroupConfig>,
}

impl ThrottlerConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottlerConfig = serde_yaml::from_str(yaml).map_err(|e| {
            ThrottlerError::Config(format!("Failed to parse throttler config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttler configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a file with `THROTTLER_*` environment overrides.
    ///
    /// Nested keys use `__`, e.g. `THROTTLER_STORAGE__REDIS__URL`. Route
    /// overrides are keyed by case-sensitive group and handler names, so
    /// `routes` always comes from the file as written and cannot be set
    /// from the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(
            path = %path.display(),
            "Loading throttler configuration with environment overrides"
        );

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ThrottlerError::Config(e.to_string()))?;

        let mut config: ThrottlerConfig = settings
            .try_deserialize()
            .map_err(|e| ThrottlerError::Config(e.to_string()))?;

        // The config crate lowercases map keys; take routes verbatim.
        let contents = std::fs::read_to_string(path)?;
        let section: RoutesSection = serde_yaml::from_str(&contents).map_err(|e| {
            ThrottlerError::Config(format!("Failed to parse throttler routes: {}", e))
        })?;
        config.routes = section.routes;

        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked before serving requests.
    pub fn validate(&self) -> Result<()> {
        validate_rules(&self.limits)?;

        for pattern in &self.ignore_user_agents {
            Regex::new(pattern).map_err(|e| {
                ThrottlerError::Config(format!(
                    "invalid ignore_user_agents pattern '{}': {}",
                    pattern, e
                ))
            })?;
        }

        for (group, config) in &self.routes {
            validate_rules(&config.limits)
                .map_err(|e| ThrottlerError::Config(format!("routes.{}: {}", group, e)))?;
            for (handler, meta) in &config.handlers {
                validate_rules(&meta.limits).map_err(|e| {
                    ThrottlerError::Config(format!("routes.{}.{}: {}", group, handler, e))
                })?;
            }
        }

        match self.storage.kind {
            StorageType::Memory => {}
            StorageType::Redis => match &self.storage.redis {
                Some(redis) if !redis.url.is_empty() => {}
                _ => {
                    return Err(ThrottlerError::Config(
                        "storage.redis.url is required for redis storage".to_string(),
                    ))
                }
            },
            StorageType::Mongodb => match &self.storage.mongodb {
                Some(mongo) if !mongo.url.is_empty() => {}
                _ => {
                    return Err(ThrottlerError::Config(
                        "storage.mongodb.url is required for mongodb storage".to_string(),
                    ))
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::TimeWindow;
    use parking_lot::Mutex;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ThrottlerConfig::default();
        assert!(config.limits.is_empty());
        assert_eq!(config.key_prefix, "throttler");
        assert_eq!(config.storage.kind, StorageType::Memory);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limits:
  - time_unit: hour
    limit: 15
  - time_unit: minute
    limit: 10
ignore_user_agents:
  - "throttler-test"
routes:
  limit:
    limits:
      - time_unit: minute
        limit: 2
storage:
  type: mongodb
  mongodb:
    url: mongodb://localhost:27017
    database: throttler
"#;
        let config = ThrottlerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limits.len(), 2);
        assert_eq!(config.limits[1], RateRule::new(TimeWindow::Minute, 10));
        assert_eq!(config.ignore_user_agents, vec!["throttler-test".to_string()]);
        assert_eq!(config.routes["limit"].limits[0].limit, 2);
        assert_eq!(config.storage.kind, StorageType::Mongodb);

        let mongo = config.storage.mongodb.unwrap();
        assert_eq!(mongo.database.as_deref(), Some("throttler"));
        assert_eq!(mongo.collection, "throttler");
    }

    #[test]
    fn test_rejects_non_positive_limit() {
        let yaml = r#"
limits:
  - time_unit: minute
    limit: 0
"#;
        let err = ThrottlerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ThrottlerError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_time_unit() {
        let yaml = r#"
limits:
  - time_unit: fortnight
    limit: 5
"#;
        assert!(ThrottlerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_invalid_route_rules() {
        let yaml = r#"
routes:
  app:
    handlers:
      index:
        limits:
          - time_unit: second
            limit: 0
"#;
        let err = ThrottlerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("routes.app.index"));
    }

    #[test]
    fn test_rejects_invalid_ignore_pattern() {
        let yaml = r#"
ignore_user_agents:
  - "(unclosed"
"#;
        assert!(ThrottlerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_redis_requires_url() {
        let yaml = r#"
storage:
  type: redis
"#;
        let err = ThrottlerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("storage.redis.url"));
    }

    // Serialises tests that read the process environment through `load`.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_rejects_repeated_time_unit() {
        let yaml = r#"
limits:
  - time_unit: minute
    limit: 5
  - time_unit: minute
    limit: 10
"#;
        let err = ThrottlerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_from_file_and_env_override() {
        let file = yaml_file(
            r#"
limits:
  - time_unit: minute
    limit: 5
key_prefix: from-file
"#,
        );

        let config = ThrottlerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.key_prefix, "from-file");

        let config = {
            let _guard = ENV_LOCK.lock();
            std::env::set_var("THROTTLER_KEY_PREFIX", "from-env");
            let config = ThrottlerConfig::load(file.path());
            std::env::remove_var("THROTTLER_KEY_PREFIX");
            config.unwrap()
        };

        assert_eq!(config.key_prefix, "from-env");
        assert_eq!(config.limits, vec![RateRule::new(TimeWindow::Minute, 5)]);
    }

    #[test]
    fn test_load_keeps_route_name_case() {
        let file = yaml_file(
            r#"
limits:
  - time_unit: minute
    limit: 5
routes:
  AppController:
    limits:
      - time_unit: minute
        limit: 2
    handlers:
      strictOne:
        limits:
          - time_unit: second
            limit: 1
"#,
        );

        let config = {
            let _guard = ENV_LOCK.lock();
            ThrottlerConfig::load(file.path()).unwrap()
        };

        let group = &config.routes["AppController"];
        assert_eq!(group.limits, vec![RateRule::new(TimeWindow::Minute, 2)]);
        assert_eq!(
            group.handlers["strictOne"].limits,
            vec![RateRule::new(TimeWindow::Second, 1)]
        );
        assert!(!config.routes.contains_key("appcontroller"));
    }
}

//! Rate rules, route metadata and rule resolution.
//!
//! Rules can be declared at three scopes: module-wide defaults, a route
//! group, and a single handler. The most specific scope that declares any
//! rules wins outright; less specific rules are not merged in. The same
//! precedence applies to the per-route skip flag.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use super::counter::TimeWindow;
use super::descriptor::{RequestContext, RouteId};
use crate::error::{Result, ThrottlerError};

/// A rate rule specifying the limit and time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    /// The window hits are counted over
    pub time_unit: TimeWindow,
    /// Number of requests allowed per window
    pub limit: u64,
}

impl RateRule {
    /// Create a new rule.
    pub fn new(time_unit: TimeWindow, limit: u64) -> Self {
        Self { time_unit, limit }
    }

    /// Check that the rule can be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(ThrottlerError::Config(format!(
                "limit for time unit '{}' must be positive",
                self.time_unit
            )));
        }
        if self.time_unit.as_secs() == 0 {
            return Err(ThrottlerError::Config(
                "custom time unit must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate every rule in a list.
///
/// Each time unit may appear once: rules sharing a unit would share a
/// counter key.
pub fn validate_rules(rules: &[RateRule]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.time_unit.tag()) {
            return Err(ThrottlerError::Config(format!(
                "time unit '{}' is declared more than once",
                rule.time_unit
            )));
        }
    }
    Ok(())
}

/// Rate limit metadata attached to a group or handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteMetadata {
    /// Rules overriding the less specific scopes
    #[serde(default)]
    pub limits: Vec<RateRule>,
    /// Whether throttling is skipped at this scope
    #[serde(default)]
    pub skip: Option<bool>,
}

/// Route metadata for a group and its handlers, as loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group-level rules
    #[serde(default)]
    pub limits: Vec<RateRule>,
    /// Group-level skip flag
    #[serde(default)]
    pub skip: Option<bool>,
    /// Handler-level overrides keyed by handler name
    #[serde(default)]
    pub handlers: HashMap<String, RouteMetadata>,
}

/// Side-table mapping route identifiers to their rate limit metadata.
///
/// Populated when routes are registered and read on every request.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    groups: RwLock<HashMap<String, RouteMetadata>>,
    handlers: RwLock<HashMap<RouteId, RouteMetadata>>,
}

impl RouteRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured groups.
    pub fn from_config(groups: &HashMap<String, GroupConfig>) -> Result<Self> {
        let registry = Self::new();
        for (group, config) in groups {
            registry.set_group_rules(group, config.limits.clone())?;
            if let Some(skip) = config.skip {
                registry.set_group_skip(group, skip);
            }
            for (handler, meta) in &config.handlers {
                let route = RouteId::new(group.as_str(), handler.as_str());
                registry.set_handler_rules(&route, meta.limits.clone())?;
                if let Some(skip) = meta.skip {
                    registry.set_handler_skip(&route, skip);
                }
            }
        }
        Ok(registry)
    }

    /// Declare rules for every handler in a group.
    pub fn set_group_rules(&self, group: &str, rules: Vec<RateRule>) -> Result<()> {
        validate_rules(&rules)?;
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .limits = rules;
        Ok(())
    }

    /// Declare rules for a single handler.
    pub fn set_handler_rules(&self, route: &RouteId, rules: Vec<RateRule>) -> Result<()> {
        validate_rules(&rules)?;
        self.handlers
            .write()
            .entry(route.clone())
            .or_default()
            .limits = rules;
        Ok(())
    }

    /// Skip (or re-enable) throttling for every handler in a group.
    pub fn set_group_skip(&self, group: &str, skip: bool) {
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .skip = Some(skip);
    }

    /// Skip (or re-enable) throttling for a single handler.
    ///
    /// A handler-level flag overrides the group-level one in either direction.
    pub fn set_handler_skip(&self, route: &RouteId, skip: bool) {
        self.handlers
            .write()
            .entry(route.clone())
            .or_default()
            .skip = Some(skip);
    }

    /// The most specific non-empty rule override for a route.
    pub fn rules_for(&self, route: &RouteId) -> Option<Vec<RateRule>> {
        if let Some(meta) = self.handlers.read().get(route) {
            if !meta.limits.is_empty() {
                return Some(meta.limits.clone());
            }
        }
        self.groups
            .read()
            .get(&route.group)
            .filter(|meta| !meta.limits.is_empty())
            .map(|meta| meta.limits.clone())
    }

    /// Whether route metadata says to skip this route.
    pub fn skip_for(&self, route: &RouteId) -> bool {
        if let Some(skip) = self.handlers.read().get(route).and_then(|meta| meta.skip) {
            return skip;
        }
        self.groups
            .read()
            .get(&route.group)
            .and_then(|meta| meta.skip)
            .unwrap_or(false)
    }
}

/// Predicate deciding whether a request bypasses throttling.
pub type SkipPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Why a request was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Route metadata marks the handler as skipped
    Route,
    /// The user agent matched an ignore pattern
    UserAgent,
    /// The configured skip predicate returned true
    Predicate,
    /// No rules resolve for this route
    NoRules,
}

/// The result of resolving a request against the configured rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Admit without counting or telemetry
    Skip(SkipReason),
    /// Evaluate these rules, in order
    Evaluate(Vec<RateRule>),
}

/// Resolves the effective rules for a request.
pub struct RuleResolver {
    defaults: Vec<RateRule>,
    routes: Arc<RouteRegistry>,
    ignore_user_agents: Vec<Regex>,
    skip_if: Option<SkipPredicate>,
}

impl fmt::Debug for RuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleResolver")
            .field("defaults", &self.defaults)
            .field("routes", &self.routes)
            .field("ignore_user_agents", &self.ignore_user_agents)
            .field("skip_if", &self.skip_if.is_some())
            .finish()
    }
}

impl RuleResolver {
    /// Create a resolver from default rules and a route registry.
    pub fn new(defaults: Vec<RateRule>, routes: Arc<RouteRegistry>) -> Result<Self> {
        validate_rules(&defaults)?;
        Ok(Self {
            defaults,
            routes,
            ignore_user_agents: Vec::new(),
            skip_if: None,
        })
    }

    /// Compile and set the user-agent ignore patterns.
    pub fn with_ignore_user_agents<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignore_user_agents = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ThrottlerError::Config(format!(
                        "invalid ignore_user_agents pattern '{}': {}",
                        p.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Set the skip predicate.
    pub fn with_skip_if(mut self, skip_if: SkipPredicate) -> Self {
        self.skip_if = Some(skip_if);
        self
    }

    /// The route registry this resolver reads from.
    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    /// Resolve the effective rules, or the reason to skip, for a request.
    pub fn resolve(&self, ctx: &RequestContext) -> Resolution {
        if self.routes.skip_for(&ctx.route) {
            trace!(route = %ctx.route, "Route is marked as skipped");
            return Resolution::Skip(SkipReason::Route);
        }

        if let Some(user_agent) = ctx.user_agent.as_deref() {
            if self.ignore_user_agents.iter().any(|re| re.is_match(user_agent)) {
                debug!(route = %ctx.route, user_agent = %user_agent, "Ignoring user agent");
                return Resolution::Skip(SkipReason::UserAgent);
            }
        }

        if let Some(skip_if) = &self.skip_if {
            if skip_if(ctx) {
                trace!(route = %ctx.route, "Skip predicate matched");
                return Resolution::Skip(SkipReason::Predicate);
            }
        }

        let rules = self.effective_rules(&ctx.route);
        if rules.is_empty() {
            trace!(route = %ctx.route, "No rules resolved, passing through");
            return Resolution::Skip(SkipReason::NoRules);
        }
        Resolution::Evaluate(rules)
    }

    /// The rules that apply to a route, ignoring skip conditions.
    pub fn effective_rules(&self, route: &RouteId) -> Vec<RateRule> {
        self.routes
            .rules_for(route)
            .unwrap_or_else(|| self.defaults.clone())
    }
}

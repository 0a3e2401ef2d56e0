//! The host-facing entry point.
//!
//! `Throttler` ties rule resolution, evaluation and telemetry rendering
//! together. A host calls [`Throttler::evaluate`] (or [`Throttler::check`])
//! once per request and applies the returned headers to its response.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ThrottlerConfig;
use crate::error::{Result, ThrottlerError};
use crate::ratelimit::{
    report, CounterStore, Header, RateLimiter, RequestContext, Resolution, RouteRegistry,
    RuleResolver, SkipPredicate, SkipReason,
};
use crate::store;

/// The decision for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Telemetry to attach to the response, in order
    pub headers: Vec<Header>,
    /// Seconds to wait before retrying, set only on denial
    pub retry_after: Option<u64>,
    /// Why the request was not counted, if it was not
    #[serde(skip)]
    pub skipped: Option<SkipReason>,
}

impl Decision {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            allowed: true,
            headers: Vec::new(),
            retry_after: None,
            skipped: Some(reason),
        }
    }

    /// Return the headers, or a `RateLimitExceeded` error on denial.
    pub fn into_result(self) -> Result<Vec<Header>> {
        match self.retry_after {
            Some(retry_after) if !self.allowed => {
                Err(ThrottlerError::RateLimitExceeded { retry_after })
            }
            _ => Ok(self.headers),
        }
    }
}

/// Request throttler.
///
/// This struct is thread-safe and can be shared across request handlers.
#[derive(Debug)]
pub struct Throttler {
    resolver: RuleResolver,
    limiter: RateLimiter,
    key_prefix: String,
}

impl Throttler {
    /// Create a throttler from its parts.
    pub fn new(resolver: RuleResolver, limiter: RateLimiter) -> Self {
        Self {
            resolver,
            limiter,
            key_prefix: String::new(),
        }
    }

    /// Build a throttler from configuration, connecting the configured store.
    pub async fn from_config(config: &ThrottlerConfig) -> Result<Self> {
        config.validate()?;
        let store = store::connect(&config.storage).await?;
        Self::with_store(config, store)
    }

    /// Build a throttler from configuration over an existing store.
    pub fn with_store(config: &ThrottlerConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        let routes = Arc::new(RouteRegistry::from_config(&config.routes)?);
        let resolver = RuleResolver::new(config.limits.clone(), routes)?
            .with_ignore_user_agents(&config.ignore_user_agents)?;

        Ok(Self {
            resolver,
            limiter: RateLimiter::new(store),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Set the skip predicate.
    pub fn with_skip_if(mut self, skip_if: SkipPredicate) -> Self {
        self.resolver = self.resolver.with_skip_if(skip_if);
        self
    }

    /// Set the namespace prepended to counter keys.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// The route metadata table, for registering overrides.
    pub fn routes(&self) -> &Arc<RouteRegistry> {
        self.resolver.routes()
    }

    /// Decide whether to admit a request.
    ///
    /// Store failures are returned as errors; the host decides whether to
    /// fail open or closed.
    #[instrument(skip(self, ctx), fields(route = %ctx.route))]
    pub async fn evaluate(&self, ctx: &RequestContext) -> Result<Decision> {
        let rules = match self.resolver.resolve(ctx) {
            Resolution::Skip(reason) => {
                debug!(reason = ?reason, "Request skipped");
                return Ok(Decision::skipped(reason));
            }
            Resolution::Evaluate(rules) => rules,
        };

        let key_base = ctx.route.key_base(&self.key_prefix);
        let outcome = self.limiter.evaluate(&rules, &key_base).await?;
        let headers = report::render(&outcome);
        let retry_after = outcome.retry_after();

        if outcome.allowed {
            debug!(rules = rules.len(), "Request admitted");
        } else {
            debug!(key = %key_base, retry_after = ?retry_after, "Request rate limited");
        }

        Ok(Decision {
            allowed: outcome.allowed,
            headers,
            retry_after,
            skipped: None,
        })
    }

    /// Admit a request or fail with `RateLimitExceeded`.
    pub async fn check(&self, ctx: &RequestContext) -> Result<Vec<Header>> {
        self.evaluate(ctx).await?.into_result()
    }

    /// Release the counter store's connections.
    pub async fn shutdown(&self) -> Result<()> {
        self.limiter.store().shutdown().await
    }
}

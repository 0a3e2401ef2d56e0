//! Multi-window rate evaluation.

use serde::Serialize;
use std::sync::Arc;
use tracing::{trace, warn};

use super::backend::CounterStore;
use super::counter::CounterRecord;
use super::descriptor::window_key;
use super::rules::RateRule;
use crate::error::{Result, ThrottlerError};

/// Usage of a single rule after one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleUsage {
    /// The rule that was evaluated
    pub rule: RateRule,
    /// The counter state after this request's increment
    pub record: CounterRecord,
}

impl RuleUsage {
    /// Whether this rule admits the request.
    ///
    /// The hit that lands exactly on the limit is the last one admitted.
    pub fn allowed(&self) -> bool {
        self.record.total_hits <= self.rule.limit
    }

    /// Requests left in the window, never negative.
    pub fn remaining(&self) -> u64 {
        self.rule.limit.saturating_sub(self.record.total_hits)
    }
}

/// The decision for one request across all of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    /// Whether every rule admitted the request
    pub allowed: bool,
    /// Per-rule usage in declared order
    pub per_rule: Vec<RuleUsage>,
}

impl EvaluationOutcome {
    /// Seconds until the longest exceeded window resets.
    ///
    /// `None` when the request was admitted.
    pub fn retry_after(&self) -> Option<u64> {
        self.per_rule
            .iter()
            .filter(|usage| !usage.allowed())
            .map(|usage| usage.record.time_to_expire)
            .max()
    }

    /// Turn a denial into a `RateLimitExceeded` error.
    pub fn ensure_allowed(&self) -> Result<()> {
        match self.retry_after() {
            Some(retry_after) => Err(ThrottlerError::RateLimitExceeded { retry_after }),
            None => Ok(()),
        }
    }
}

/// The rate evaluator.
///
/// Counts one hit per rule against the shared counter store and decides
/// admission. This struct is thread-safe and can be shared across tasks.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.name())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter over a counter store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// The counter store this limiter increments.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Evaluate every rule for a request.
    ///
    /// All rules are incremented even after one has denied, so usage is
    /// reported for every window. Store failures are returned as-is; whether
    /// to fail open or closed is up to the caller.
    pub async fn evaluate(&self, rules: &[RateRule], key_base: &str) -> Result<EvaluationOutcome> {
        let mut per_rule = Vec::with_capacity(rules.len());

        for rule in rules {
            let key = window_key(key_base, rule.time_unit);
            let record = self
                .store
                .increment(&key, rule.time_unit.duration())
                .await
                .map_err(|e| {
                    warn!(
                        key = %key,
                        store = self.store.name(),
                        error = %e,
                        "Counter store increment failed"
                    );
                    e
                })?;

            let usage = RuleUsage { rule: *rule, record };
            trace!(
                key = %key,
                hits = record.total_hits,
                limit = rule.limit,
                "Evaluated rule"
            );

            if !usage.allowed() {
                warn!(
                    key = %key,
                    hits = record.total_hits,
                    limit = rule.limit,
                    retry_after = record.time_to_expire,
                    "Rate limit exceeded"
                );
            }
            per_rule.push(usage);
        }

        let allowed = per_rule.iter().all(RuleUsage::allowed);
        Ok(EvaluationOutcome { allowed, per_rule })
    }
}

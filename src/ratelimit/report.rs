//! Renders evaluation outcomes as response telemetry.

use serde::Serialize;

use super::limiter::EvaluationOutcome;

/// Prefix for the per-window telemetry names.
pub const HEADER_PREFIX: &str = "X-RateLimit";
/// Name of the value reported on denial.
pub const RETRY_AFTER: &str = "Retry-After";

/// A single named telemetry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: String,
    pub value: u64,
}

impl Header {
    fn new(name: String, value: u64) -> Self {
        Self { name, value }
    }
}

/// Render an outcome into ordered telemetry values.
///
/// Admitted requests get a limit and remaining value for every rule, and a
/// reset value for the last rule only. Denied requests get `Retry-After`
/// alone.
pub fn render(outcome: &EvaluationOutcome) -> Vec<Header> {
    if let Some(retry_after) = outcome.retry_after() {
        return vec![Header::new(RETRY_AFTER.to_string(), retry_after)];
    }

    let mut headers = Vec::with_capacity(outcome.per_rule.len() * 2 + 1);
    for usage in &outcome.per_rule {
        let tag = usage.rule.time_unit.tag();
        headers.push(Header::new(
            format!("{}-Limit-{}", HEADER_PREFIX, tag),
            usage.rule.limit,
        ));
        headers.push(Header::new(
            format!("{}-Remaining-{}", HEADER_PREFIX, tag),
            usage.remaining(),
        ));
    }
    if let Some(last) = outcome.per_rule.last() {
        headers.push(Header::new(
            format!("{}-Reset-{}", HEADER_PREFIX, last.rule.time_unit.tag()),
            last.record.time_to_expire,
        ));
    }
    headers
}

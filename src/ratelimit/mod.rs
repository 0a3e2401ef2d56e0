//! Rate limiting logic: rules, evaluation and telemetry.

mod backend;
mod counter;
mod descriptor;
mod limiter;
pub mod report;
mod rules;

pub use backend::CounterStore;
pub use counter::{CounterRecord, TimeWindow};
pub use descriptor::{window_key, RequestContext, RouteId};
pub use limiter::{EvaluationOutcome, RateLimiter, RuleUsage};
pub use report::Header;
pub use rules::{
    validate_rules, GroupConfig, RateRule, Resolution, RouteMetadata, RouteRegistry,
    RuleResolver, SkipPredicate, SkipReason,
};

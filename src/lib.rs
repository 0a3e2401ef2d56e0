//! Throttler - Multi-Window Request Rate Limiting
//!
//! This crate decides whether to admit a request against a set of rate rules,
//! counting hits per route and time window in a pluggable counter store
//! (in-memory, Redis or MongoDB), and renders the resulting usage as response
//! headers for the host web framework to apply.

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;

pub use config::ThrottlerConfig;
pub use error::{Result, ThrottlerError};
pub use guard::{Decision, Throttler};

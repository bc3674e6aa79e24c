//! Throttler - fixed-window rate limiting
//!
//! This crate counts how often a named action happens within the current
//! fixed time window, optionally partitioned by a caller-supplied key, and
//! rejects attempts once the configured threshold would be exceeded. Counters
//! live in a pluggable [`ratelimit::CounterStore`], so the same engine runs
//! over an in-process map or an external cache.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{RateLimitExceeded, Result, ThrottleError};
pub use ratelimit::{
    CounterStore, DiscriminatingKey, LimitDefinition, MemoryStore, Overrides, Throttler,
};

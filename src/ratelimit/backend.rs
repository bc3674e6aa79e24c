//! Counter storage trait for abstracting in-process and external stores.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store rejected or failed the call
    #[error("backend failure: {0}")]
    Backend(String),

    /// The call did not finish within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for counter store implementations.
///
/// The engine addresses counters by cache key. `read` and `write` are
/// required. `increment` and `decrement` are optional: stores without atomic
/// operations keep the defaults, which return `Ok(None)`, and the engine
/// falls back to writing `read + amount`.
///
/// That fallback has a race window between the read and the write:
/// concurrent callers on the same key may read the same value, so attempts
/// can be under-counted and the stored count can pass the threshold by up
/// to one increment per racer.
///
/// With an atomic `increment` the engine checks the count it returns and
/// takes back any increment that went past the threshold through
/// `decrement`. Stores that implement `increment` should implement
/// `decrement` too; without it a rejected racer's increment stays in the
/// store until the window ends.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the counter at `key`; an absent counter is `None`.
    async fn read(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// Overwrite the counter at `key`.
    async fn write(&self, key: &str, value: u64) -> Result<(), StorageError>;

    /// Atomically add `amount` to the counter at `key` and return the new value.
    ///
    /// Returns `Ok(None)` when the store has no atomic increment.
    async fn increment(&self, key: &str, amount: u64) -> Result<Option<u64>, StorageError> {
        let _ = (key, amount);
        Ok(None)
    }

    /// Atomically subtract `amount` from the counter at `key`, saturating at
    /// zero, and return the new value.
    ///
    /// Returns `Ok(None)` when the store has no atomic decrement.
    async fn decrement(&self, key: &str, amount: u64) -> Result<Option<u64>, StorageError> {
        let _ = (key, amount);
        Ok(None)
    }
}

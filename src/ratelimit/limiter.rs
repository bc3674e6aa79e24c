//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::backend::{CounterStore, StorageError};
use super::clock::{Clock, SystemClock};
use super::key::{CacheKey, DiscriminatingKey};
use super::registry::{EffectiveLimit, LimitDefinition, Overrides, Registry};
use crate::error::{RateLimitExceeded, Result, ThrottleError};

/// Namespace token placed at the front of every cache key by default.
pub const DEFAULT_KEY_PREFIX: &str = "throttle";

/// Engine-wide settings that are not part of any limit definition.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// First token of every cache key
    pub key_prefix: String,
    /// Upper bound on each store call; `None` waits as long as the store does
    pub storage_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            storage_timeout: None,
        }
    }
}

/// Read-only snapshot of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitStatus {
    /// Count recorded in the current window
    pub count: u64,
    /// Effective threshold
    pub threshold: u64,
    /// Amount that can still be added in this window
    pub remaining: u64,
    /// Seconds until the next window starts
    pub retry_after: u64,
}

/// Fixed-window throttling engine.
///
/// The engine keeps no counters itself. Every count lives in the
/// [`CounterStore`] under a cache key derived from the handle, the
/// discriminating key and the current window, so the engine can be shared
/// freely across tasks.
///
/// `throttle` reads the current count, checks it against the threshold and
/// only then adds the increment. With an atomic store increment the count
/// the store returns is checked again: a caller whose own increment took the
/// count past the threshold is rejected and its increment is taken back with
/// `decrement`, so concurrent callers never get more than the threshold
/// through. Without an atomic increment the engine writes `read + increment`,
/// and concurrent callers on the same key can under-count and overshoot the
/// threshold by one increment per racer.
pub struct Throttler {
    registry: Registry,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl Throttler {
    /// Create an engine over `store` using the system clock and default settings.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            registry: Registry::new(),
            store,
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use an existing registry instead of an empty one.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Register or replace the defaults for `handle`.
    pub fn register(&self, handle: &str, definition: LimitDefinition) -> Result<()> {
        self.registry.register(handle, definition)
    }

    /// Record one action for `handle` and `key` and return the new count.
    pub async fn throttle(&self, handle: &str, key: impl Into<DiscriminatingKey>) -> Result<u64> {
        self.throttle_with(handle, key, &Overrides::default()).await
    }

    /// Like [`throttle`](Self::throttle) with per-call overrides.
    ///
    /// Fails with [`RateLimitExceeded`] when the increment would take the
    /// count past the threshold. The stored count is left as it was.
    pub async fn throttle_with(
        &self,
        handle: &str,
        key: impl Into<DiscriminatingKey>,
        overrides: &Overrides,
    ) -> Result<u64> {
        let key = key.into();
        let (limit, cache_key, now) = self.locate(handle, &key, overrides)?;
        let current = self.read_count(&cache_key).await?;

        trace!(
            handle = %handle,
            key = %key,
            cache_key = %cache_key,
            count = current,
            increment = limit.increment,
            threshold = limit.threshold,
            "Checking rate limit"
        );

        if current.saturating_add(limit.increment) > limit.threshold {
            return Err(rejection(handle, key, &limit, current, now));
        }

        let incremented = self
            .call(&cache_key, self.store.increment(cache_key.as_str(), limit.increment))
            .await?;

        match incremented {
            Some(count) if count > limit.threshold => {
                // Another caller got in between the read and the increment
                let restored = self
                    .call(&cache_key, self.store.decrement(cache_key.as_str(), limit.increment))
                    .await?;
                if restored.is_none() {
                    warn!(
                        cache_key = %cache_key,
                        count = count,
                        "Counter store cannot take back an increment past the threshold"
                    );
                }
                Err(rejection(handle, key, &limit, count, now))
            }
            Some(count) => Ok(count),
            None => {
                let count = current + limit.increment;
                self.call(&cache_key, self.store.write(cache_key.as_str(), count))
                    .await?;
                Ok(count)
            }
        }
    }

    /// Whether the current count already meets or exceeds the threshold.
    ///
    /// Never writes to the store and never fails with [`RateLimitExceeded`].
    pub async fn is_throttled(&self, handle: &str, key: impl Into<DiscriminatingKey>) -> Result<bool> {
        self.is_throttled_with(handle, key, &Overrides::default()).await
    }

    pub async fn is_throttled_with(
        &self,
        handle: &str,
        key: impl Into<DiscriminatingKey>,
        overrides: &Overrides,
    ) -> Result<bool> {
        let key = key.into();
        let (limit, cache_key, _) = self.locate(handle, &key, overrides)?;
        let count = self.read_count(&cache_key).await?;
        Ok(count >= limit.threshold)
    }

    /// Current count for the current window; zero when nothing was recorded.
    pub async fn query(&self, handle: &str, key: impl Into<DiscriminatingKey>) -> Result<u64> {
        self.query_with(handle, key, &Overrides::default()).await
    }

    pub async fn query_with(
        &self,
        handle: &str,
        key: impl Into<DiscriminatingKey>,
        overrides: &Overrides,
    ) -> Result<u64> {
        let key = key.into();
        let (_, cache_key, _) = self.locate(handle, &key, overrides)?;
        self.read_count(&cache_key).await
    }

    /// Count, threshold, remaining quota and time to the next window.
    pub async fn status(&self, handle: &str, key: impl Into<DiscriminatingKey>) -> Result<LimitStatus> {
        self.status_with(handle, key, &Overrides::default()).await
    }

    pub async fn status_with(
        &self,
        handle: &str,
        key: impl Into<DiscriminatingKey>,
        overrides: &Overrides,
    ) -> Result<LimitStatus> {
        let key = key.into();
        let (limit, cache_key, now) = self.locate(handle, &key, overrides)?;
        let count = self.read_count(&cache_key).await?;

        Ok(LimitStatus {
            count,
            threshold: limit.threshold,
            remaining: limit.threshold.saturating_sub(count),
            retry_after: limit.window.retry_after(now),
        })
    }

    /// Set the counter for the current window back to zero.
    ///
    /// Earlier windows are left alone. Calling it twice is the same as once.
    pub async fn reset(&self, handle: &str, key: impl Into<DiscriminatingKey>) -> Result<()> {
        self.reset_with(handle, key, &Overrides::default()).await
    }

    pub async fn reset_with(
        &self,
        handle: &str,
        key: impl Into<DiscriminatingKey>,
        overrides: &Overrides,
    ) -> Result<()> {
        let key = key.into();
        let (_, cache_key, _) = self.locate(handle, &key, overrides)?;

        self.call(&cache_key, self.store.write(cache_key.as_str(), 0))
            .await?;

        debug!(
            handle = %handle,
            key = %key,
            cache_key = %cache_key,
            "Rate limit counter reset"
        );
        Ok(())
    }

    /// Resolve the effective limit and the cache key for the current window.
    fn locate(
        &self,
        handle: &str,
        key: &DiscriminatingKey,
        overrides: &Overrides,
    ) -> Result<(EffectiveLimit, CacheKey, u64)> {
        let limit = self.registry.resolve(handle, overrides)?;
        let now = self.clock.now();
        let bucket = limit.window.bucket(now);
        let cache_key = CacheKey::build(&self.settings.key_prefix, handle, key, bucket);
        Ok((limit, cache_key, now))
    }

    async fn read_count(&self, cache_key: &CacheKey) -> Result<u64> {
        let count = self
            .call(cache_key, self.store.read(cache_key.as_str()))
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Await a store call, applying the configured timeout.
    async fn call<T, F>(&self, cache_key: &CacheKey, op: F) -> std::result::Result<T, StorageError>
    where
        F: Future<Output = std::result::Result<T, StorageError>>,
    {
        let result = match self.settings.storage_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .unwrap_or(Err(StorageError::Timeout(limit))),
            None => op.await,
        };

        if let Err(ref e) = result {
            warn!(cache_key = %cache_key, error = %e, "Counter store call failed");
        }
        result
    }
}

fn rejection(
    handle: &str,
    key: DiscriminatingKey,
    limit: &EffectiveLimit,
    count: u64,
    now: u64,
) -> ThrottleError {
    let retry_after = limit.window.retry_after(now);
    debug!(
        handle = %handle,
        key = %key,
        count = count,
        threshold = limit.threshold,
        retry_after = retry_after,
        "Rate limit exceeded"
    );
    RateLimitExceeded {
        handle: handle.to_string(),
        key,
        threshold: limit.threshold,
        retry_after,
    }
    .into()
}

//! Fixed time windows.

use std::time::Duration;

/// A fixed window of `interval` seconds aligned to the Unix epoch.
///
/// Window `n` covers `[n * interval, (n + 1) * interval)`. The window index is
/// part of every cache key, so counters from earlier windows are never read
/// again and need no cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    interval: u64,
}

impl Window {
    /// Create a window of the given length in seconds. `interval` must be non-zero.
    pub(crate) fn new(interval: u64) -> Self {
        debug_assert!(interval > 0, "window interval must be positive");
        Self { interval }
    }

    /// Length of this window in seconds.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Get the duration of this window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Index of the window containing `now`.
    pub fn bucket(&self, now: u64) -> u64 {
        now / self.interval
    }

    /// Start of the window containing `now`, in epoch seconds.
    pub fn start(&self, now: u64) -> u64 {
        self.bucket(now) * self.interval
    }

    /// Seconds from `now` until the next window begins.
    pub fn retry_after(&self, now: u64) -> u64 {
        (self.bucket(now) + 1)
            .saturating_mul(self.interval)
            .saturating_sub(now)
    }
}

//! Limit definitions, per-call overrides and the registry that resolves them.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::window::Window;
use crate::error::{Result, ThrottleError};

/// Increment applied per call when none is configured.
pub const DEFAULT_INCREMENT: u64 = 1;

/// Default threshold, interval and increment registered for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDefinition {
    /// Maximum cumulative increment allowed within one window
    pub threshold: u64,
    /// Window length in seconds
    pub interval: u64,
    /// Amount added per call
    #[serde(default = "default_increment")]
    pub increment: u64,
}

fn default_increment() -> u64 {
    DEFAULT_INCREMENT
}

impl LimitDefinition {
    /// Create a definition with the default increment of 1.
    pub fn new(threshold: u64, interval: u64) -> Self {
        Self {
            threshold,
            interval,
            increment: DEFAULT_INCREMENT,
        }
    }

    pub fn with_increment(mut self, increment: u64) -> Self {
        self.increment = increment;
        self
    }

    /// Check that every field is a positive integer.
    pub fn validate(&self, handle: &str) -> Result<()> {
        check_positive(handle, "threshold", self.threshold)?;
        check_positive(handle, "interval", self.interval)?;
        check_positive(handle, "increment", self.increment)
    }
}

fn check_positive(handle: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ThrottleError::Config(format!(
            "{} for '{}' must be a positive integer, got {}",
            field, handle, value
        )));
    }
    Ok(())
}

/// Per-call replacements for registered values.
///
/// Overrides apply to a single call and never change the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub threshold: Option<u64>,
    pub interval: Option<u64>,
    pub increment: Option<u64>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn interval(mut self, interval: u64) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn increment(mut self, increment: u64) -> Self {
        self.increment = Some(increment);
        self
    }

    /// Whether no value is overridden.
    pub fn is_empty(&self) -> bool {
        self.threshold.is_none() && self.interval.is_none() && self.increment.is_none()
    }
}

/// The values in force for one call after overrides are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimit {
    pub threshold: u64,
    pub window: Window,
    pub increment: u64,
}

/// Handle-to-definition map owned by one engine.
///
/// Re-registering a handle replaces its definition; the change is visible to
/// the next call. Readers are not synchronized with a concurrent
/// re-registration beyond the lock itself, so the last write wins.
#[derive(Debug, Default)]
pub struct Registry {
    limits: RwLock<HashMap<String, LimitDefinition>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the definition for `handle`.
    ///
    /// An invalid definition is rejected and any earlier registration is kept.
    pub fn register(&self, handle: &str, definition: LimitDefinition) -> Result<()> {
        definition.validate(handle)?;

        info!(
            handle = %handle,
            threshold = definition.threshold,
            interval = definition.interval,
            increment = definition.increment,
            "Registered rate limit"
        );

        self.limits.write().insert(handle.to_string(), definition);
        Ok(())
    }

    /// Register several definitions at once.
    ///
    /// All definitions are validated before any is stored, so one bad entry
    /// leaves the registry unchanged.
    pub fn register_all<I>(&self, definitions: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, LimitDefinition)>,
    {
        let definitions: Vec<_> = definitions.into_iter().collect();
        for (handle, definition) in &definitions {
            definition.validate(handle)?;
        }

        for (handle, definition) in definitions {
            self.register(&handle, definition)?;
        }
        Ok(())
    }

    /// Get the registered definition for `handle`.
    pub fn get(&self, handle: &str) -> Option<LimitDefinition> {
        self.limits.read().get(handle).copied()
    }

    /// Registered handles in sorted order.
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.limits.read().keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.limits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.read().is_empty()
    }

    /// Resolve the values in force for one call.
    ///
    /// Overrides win over registered values. A handle that was never
    /// registered resolves only when the overrides give both threshold and
    /// interval; the increment then defaults to 1.
    pub fn resolve(&self, handle: &str, overrides: &Overrides) -> Result<EffectiveLimit> {
        let registered = self.get(handle);

        let threshold = overrides
            .threshold
            .or(registered.map(|d| d.threshold))
            .ok_or_else(|| unresolved(handle, "threshold"))?;
        let interval = overrides
            .interval
            .or(registered.map(|d| d.interval))
            .ok_or_else(|| unresolved(handle, "interval"))?;
        let increment = overrides
            .increment
            .or(registered.map(|d| d.increment))
            .unwrap_or(DEFAULT_INCREMENT);

        LimitDefinition {
            threshold,
            interval,
            increment,
        }
        .validate(handle)?;

        Ok(EffectiveLimit {
            threshold,
            window: Window::new(interval),
            increment,
        })
    }
}

fn unresolved(handle: &str, field: &str) -> ThrottleError {
    ThrottleError::Config(format!(
        "no {} for '{}': register the handle or pass an override",
        field, handle
    ))
}

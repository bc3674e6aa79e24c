//! Configuration management for hosts embedding the throttler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{
    CounterStore, EngineSettings, LimitDefinition, Registry, Throttler, DEFAULT_KEY_PREFIX,
};

/// Prefix for environment overrides, e.g. `THROTTLER__STORAGE__TIMEOUT_MS`.
const ENV_PREFIX: &str = "THROTTLER";

/// Main configuration for a throttler host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Cache key configuration
    #[serde(default)]
    pub keys: KeyConfig,

    /// Counter store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Limit definitions registered at startup
    #[serde(default)]
    pub limits: Vec<LimitRule>,
}

/// Cache key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Namespace token at the front of every cache key
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Counter store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Per-call timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// One limit definition as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitRule {
    /// Handle the limit is registered under
    pub handle: String,
    /// Maximum count per window
    pub threshold: u64,
    /// Window length in seconds
    pub interval: u64,
    /// Amount added per call, 1 when omitted
    #[serde(default)]
    pub increment: Option<u64>,
}

impl LimitRule {
    pub fn definition(&self) -> LimitDefinition {
        let definition = LimitDefinition::new(self.threshold, self.interval);
        match self.increment {
            Some(increment) => definition.with_increment(increment),
            None => definition,
        }
    }
}

impl ThrottlerConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttler config: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file layered with
    /// `THROTTLER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading throttler configuration");
            let name = path.to_str().ok_or_else(|| {
                ThrottleError::Config(format!("config path is not valid UTF-8: {}", path.display()))
            })?;
            builder = builder.add_source(File::new(name, FileFormat::Yaml));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<ThrottlerConfig>())
            .map_err(|e| ThrottleError::Config(format!("Failed to load throttler config: {}", e)))
    }

    /// Engine settings described by this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            key_prefix: self.keys.prefix.clone(),
            storage_timeout: self.storage.timeout_ms.map(Duration::from_millis),
        }
    }

    /// Register every configured limit.
    ///
    /// Nothing is registered unless every definition is valid.
    pub fn apply(&self, registry: &Registry) -> Result<()> {
        registry.register_all(
            self.limits
                .iter()
                .map(|rule| (rule.handle.clone(), rule.definition())),
        )
    }

    /// Build an engine over `store` with the configured settings and limits.
    pub fn build_throttler(&self, store: Arc<dyn CounterStore>) -> Result<Throttler> {
        let registry = Registry::new();
        self.apply(&registry)?;

        Ok(Throttler::new(store)
            .with_settings(self.engine_settings())
            .with_registry(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_parse_config() {
        let yaml = r#"
keys:
  prefix: myapp
storage:
  timeout_ms: 250
limits:
  - handle: api_calls
    threshold: 100
    interval: 60
  - handle: uploads
    threshold: 10
    interval: 3600
    increment: 2
"#;
        let config = assert_ok!(ThrottlerConfig::from_yaml(yaml));
        assert_eq!(config.keys.prefix, "myapp");
        assert_eq!(config.limits.len(), 2);
        assert_eq!(config.limits[0].definition(), LimitDefinition::new(100, 60));
        assert_eq!(
            config.limits[1].definition(),
            LimitDefinition::new(10, 3600).with_increment(2)
        );

        let settings = config.engine_settings();
        assert_eq!(settings.key_prefix, "myapp");
        assert_eq!(settings.storage_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_defaults() {
        let config = assert_ok!(ThrottlerConfig::from_yaml("limits: []"));
        assert_eq!(config.keys.prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.storage.timeout_ms, None);
        assert_eq!(config.engine_settings().storage_timeout, None);
    }

    #[test]
    fn test_non_integer_values_rejected() {
        let yaml = r#"
limits:
  - handle: hello_there
    threshold: 20
    interval: hello
"#;
        assert!(matches!(
            assert_err!(ThrottlerConfig::from_yaml(yaml)),
            ThrottleError::Config(_)
        ));

        let yaml = r#"
limits:
  - handle: hello_there
    threshold: wibble
    interval: 100
"#;
        assert!(matches!(
            assert_err!(ThrottlerConfig::from_yaml(yaml)),
            ThrottleError::Config(_)
        ));

        let yaml = r#"
limits:
  - handle: hello_there
    threshold: -5
    interval: 100
"#;
        assert_err!(ThrottlerConfig::from_yaml(yaml));
    }

    #[test]
    fn test_apply_invalid_leaves_registry_untouched() {
        let registry = Registry::new();
        assert_ok!(registry.register("hello_there", LimitDefinition::new(4, 10)));

        let yaml = r#"
limits:
  - handle: other
    threshold: 5
    interval: 10
  - handle: hello_there
    threshold: 0
    interval: 10
"#;
        let config = assert_ok!(ThrottlerConfig::from_yaml(yaml));
        assert_err!(config.apply(&registry));

        assert_eq!(registry.get("hello_there"), Some(LimitDefinition::new(4, 10)));
        assert!(registry.get("other").is_none());
    }

    #[tokio::test]
    async fn test_build_throttler() {
        let yaml = r#"
limits:
  - handle: hello
    threshold: 2
    interval: 10
"#;
        let config = assert_ok!(ThrottlerConfig::from_yaml(yaml));
        let engine = assert_ok!(config.build_throttler(Arc::new(MemoryStore::new())));

        assert_eq!(assert_ok!(engine.throttle("hello", ()).await), 1);
        assert_eq!(assert_ok!(engine.throttle("hello", ()).await), 2);
        assert_err!(engine.throttle("hello", ()).await);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("throttler-config-{}.yaml", std::process::id()));
        let yaml = r#"
keys:
  prefix: from_file
limits:
  - handle: hello
    threshold: 3
    interval: 30
"#;
        assert_ok!(std::fs::write(&path, yaml));

        let loaded = ThrottlerConfig::load(Some(path.as_path()));
        let direct = ThrottlerConfig::from_file(&path);
        let _ = std::fs::remove_file(&path);

        let loaded = assert_ok!(loaded);
        assert_eq!(loaded.keys.prefix, "from_file");
        assert_eq!(loaded.limits[0].definition(), LimitDefinition::new(3, 30));

        let direct = assert_ok!(direct);
        assert_eq!(direct.limits.len(), 1);
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("throttler-env-{}.yaml", std::process::id()));
        let yaml = r#"
storage:
  timeout_ms: 100
limits:
  - handle: hello
    threshold: 3
    interval: 30
"#;
        assert_ok!(std::fs::write(&path, yaml));

        std::env::set_var("THROTTLER__STORAGE__TIMEOUT_MS", "750");
        let loaded = ThrottlerConfig::load(Some(path.as_path()));
        std::env::remove_var("THROTTLER__STORAGE__TIMEOUT_MS");
        let _ = std::fs::remove_file(&path);

        let loaded = assert_ok!(loaded);
        assert_eq!(loaded.storage.timeout_ms, Some(750));
        assert_eq!(
            loaded.engine_settings().storage_timeout,
            Some(Duration::from_millis(750))
        );
        assert_eq!(loaded.limits[0].definition(), LimitDefinition::new(3, 30));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = assert_err!(ThrottlerConfig::from_file("/nonexistent/throttler.yaml"));
        assert!(matches!(err, ThrottleError::Io(_)));
    }
}

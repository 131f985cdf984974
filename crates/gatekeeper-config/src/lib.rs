//! Configuration management for Gatekeeper
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (`GK_*` prefix, `__` between section and key)
//! 2. gatekeeper.local.toml (gitignored, local overrides)
//! 3. gatekeeper.toml (git-tracked, project config)
//! 4. ~/.config/gatekeeper/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Gatekeeper configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub audit: AuditConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

/// Audit event log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Start the audit drain thread.
    pub enabled: bool,
    /// Bounded queue size; events beyond it are dropped and counted.
    pub queue_capacity: usize,
    /// Maximum events the drainer handles per wakeup.
    pub drain_batch: usize,
    /// Idle sleep of the drainer between polls.
    pub poll_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 100,
            drain_batch: 64,
            poll_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Emit one tracing event per decision.
    pub log_decisions: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            log_decisions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

impl GatekeeperConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a TOML document on its own, without the other sources
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::ParseError {
            origin: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration with auditing and decision logging off
    pub fn quiet() -> Self {
        Self {
            audit: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            evaluation: EvaluationConfig {
                log_decisions: false,
            },
            ..Default::default()
        }
    }

    /// Check value constraints the types cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "audit.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.audit.drain_batch == 0 {
            return Err(ConfigError::ValidationError(
                "audit.drain_batch must be greater than 0".to_string(),
            ));
        }
        if self.audit.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "audit.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert!(config.audit.enabled);
        assert_eq!(config.audit.queue_capacity, 100);
        assert_eq!(config.audit.drain_batch, 64);
        assert!(config.evaluation.log_decisions);
        assert_eq!(config.logging.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quiet_config() {
        let config = GatekeeperConfig::quiet();
        assert!(!config.audit.enabled);
        assert!(!config.evaluation.log_decisions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = GatekeeperConfig::from_toml_str(
            r#"
[audit]
queue_capacity = 256

[logging]
filter = "gatekeeper=debug"
"#,
        )
        .unwrap();

        assert_eq!(config.audit.queue_capacity, 256);
        assert_eq!(config.audit.drain_batch, 64);
        assert_eq!(config.logging.filter, "gatekeeper=debug");
        assert!(config.logging.ansi);
    }

    #[test]
    fn test_from_toml_str_rejects_zero_capacity() {
        let err = GatekeeperConfig::from_toml_str("[audit]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_from_toml_str_rejects_malformed() {
        let err = GatekeeperConfig::from_toml_str("[audit\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}

//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for running automatic task scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Shell used to run script command lines (`<shell> -c <command>`).
    pub shell: String,

    /// Seconds before a running script is killed and counted as failed.
    pub timeout_secs: u64,

    /// Maximum number of scripts running at the same time.
    pub max_concurrent: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            timeout_secs: 600,
            max_concurrent: 4,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run metadata validation when closing metadata tasks.
    pub metadata_validation: bool,

    /// Automatic task script settings.
    pub script: ScriptConfig,

    /// Capacity of the automatic task queue.
    pub queue_capacity: usize,

    /// Capacity of the engine event channel.
    pub event_capacity: usize,

    /// Actor recorded for transitions made by the engine itself.
    pub system_actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_validation: true,
            script: ScriptConfig::default(),
            queue_capacity: 256,
            event_capacity: 1024,
            system_actor: "system".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration once before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("script.shell must not be empty".into()));
        }
        if self.script.timeout_secs == 0 {
            return Err(ConfigError::Invalid("script.timeout_secs must be > 0".into()));
        }
        if self.script.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "script.max_concurrent must be > 0".into(),
            ));
        }
        if self.queue_capacity == 0 || self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity and event_capacity must be > 0".into(),
            ));
        }
        if self.system_actor.trim().is_empty() {
            return Err(ConfigError::Invalid("system_actor must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"metadata_validation": false, "script": {"timeout_secs": 5}}"#)
            .unwrap();
        assert!(!config.metadata_validation);
        assert_eq!(config.script.timeout_secs, 5);
        assert_eq!(config.script.shell, "/bin/sh");
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_json(r#"{"script": {"max_concurrent": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            EngineConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}

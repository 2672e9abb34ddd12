//! Control-core configuration.

use std::path::Path;
use std::time::Duration;

use rcc_sched::ExecutorConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ValidationError};

/// Settings of one control core. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Cycle time of nets that do not declare their own.
    pub default_cycle_time_ms: u64,
    /// How far a realtime loop may fall behind before it warns.
    pub lag_warning_ms: u64,
    pub executor_thread_name: String,
    /// Loaded nets are named `<prefix>-<n>`.
    pub net_name_prefix: String,
    pub notifier_thread_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_cycle_time_ms: 10,
            lag_warning_ms: 500,
            executor_thread_name: "rcc-executor".to_string(),
            net_name_prefix: "net".to_string(),
            notifier_thread_name: "rcc-notify".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn load_yaml(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn load_json(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let config: CoreConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        positive("default_cycle_time_ms", self.default_cycle_time_ms)?;
        positive("lag_warning_ms", self.lag_warning_ms)?;
        for (field, value) in [
            ("executor_thread_name", &self.executor_thread_name),
            ("net_name_prefix", &self.net_name_prefix),
            ("notifier_thread_name", &self.notifier_thread_name),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    value: value.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn default_cycle_time(&self) -> Duration {
        Duration::from_millis(self.default_cycle_time_ms)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            thread_name: self.executor_thread_name.clone(),
            lag_warning: Duration::from_millis(self.lag_warning_ms),
        }
    }
}

fn positive(field: &str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

//! Configuration management.

use crate::error::{KnbError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Well-known port the monitor agent listens on (host network).
pub const MONITOR_PORT: u16 = 8451;

/// Label selector identifying monitor pods.
pub const MONITOR_SELECTOR: &str = "role=monitor";

/// Name of the configuration file inside a session directory.
pub const CONFIG_FILE: &str = "config.json";

/// Tunable settings for a benchmark session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor_port: u16,
    pub monitor_selector: String,
    pub namespace: String,
    /// Label key used to tag every pod belonging to a session.
    pub session_label_key: String,
    pub collection_duration_secs: u32,
    pub sysinfo_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_port: MONITOR_PORT,
            monitor_selector: MONITOR_SELECTOR.to_string(),
            namespace: "default".to_string(),
            session_label_key: "knb-session".to_string(),
            collection_duration_secs: 5,
            sysinfo_retry: RetryConfig::default(),
        }
    }
}

/// Retry settings for a per-node operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 10, delay_secs: 4 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

impl Config {
    /// Load configuration from a session directory.
    ///
    /// A missing file yields the defaults.
    pub fn load(session_dir: &Path) -> Result<Self> {
        let path = session_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| KnbError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| KnbError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration into a session directory.
    pub fn save(&self, session_dir: &Path) -> Result<()> {
        let path = session_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self).map_err(|e| KnbError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(&path, content).map_err(|e| KnbError::IoError { path, source: e })
    }

    /// The monitor selector as a `(key, value)` label pair.
    ///
    /// Only a single equality term (`key=value`) is accepted, since the same
    /// label is stamped on the monitor pods and negated to exclude them.
    pub fn monitor_label(&self) -> Option<(&str, &str)> {
        let (key, value) = self.monitor_selector.split_once('=')?;
        let valid = |s: &str| !s.is_empty() && !s.contains([',', '=', '!', ' ']);
        (valid(key) && valid(value)).then_some((key, value))
    }

    fn validate(&self) -> Result<()> {
        if self.sysinfo_retry.max_attempts == 0 {
            return Err(KnbError::InvalidConfig {
                reason: "sysinfo_retry.max_attempts must be at least 1".to_string(),
            });
        }
        if self.monitor_label().is_none() {
            return Err(KnbError::InvalidConfig {
                reason: format!(
                    "monitor_selector must be a single key=value label, got '{}'",
                    self.monitor_selector
                ),
            });
        }
        Ok(())
    }
}

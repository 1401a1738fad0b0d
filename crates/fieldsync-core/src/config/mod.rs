//! Sync engine configuration.
//!
//! Every field has a default, so an application shell can ship a partial
//! JSON document (or none at all) and only override what it needs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 6;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Longest accepted retry delay (one day)
pub const MAX_DELAY_LIMIT_MS: u64 = 86_400_000;
/// Longest accepted periodic drain interval (one week)
pub const MAX_SYNC_INTERVAL_SECS: u64 = 7 * 86_400;
/// Largest accepted command channel capacity
pub const MAX_COMMAND_BUFFER: usize = 65_536;

/// Tuning for the backoff scheduler and the drain loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Delay before the first retry, doubled per attempt
    pub base_delay_ms: u64,
    /// Upper bound for the retry delay
    pub max_delay_ms: u64,
    /// Attempts after which a retryable failure becomes `FAILED`
    pub max_retries: u32,
    /// Periodic drain interval; 0 disables the timer
    pub sync_interval_secs: u64,
    /// Connectivity assumed until the shell reports otherwise
    pub start_online: bool,
    /// Capacity of the command channel to the worker
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            start_online: true,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid engine config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config("base_delay_ms must be greater than 0".to_string()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(format!(
                "max_delay_ms ({}) must not be below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.max_delay_ms > MAX_DELAY_LIMIT_MS {
            return Err(Error::Config(format!(
                "max_delay_ms ({}) must not exceed {MAX_DELAY_LIMIT_MS}",
                self.max_delay_ms
            )));
        }
        if self.sync_interval_secs > MAX_SYNC_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "sync_interval_secs ({}) must not exceed {MAX_SYNC_INTERVAL_SECS}",
                self.sync_interval_secs
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.command_buffer == 0 || self.command_buffer > MAX_COMMAND_BUFFER {
            return Err(Error::Config(format!(
                "command_buffer ({}) must be between 1 and {MAX_COMMAND_BUFFER}",
                self.command_buffer
            )));
        }
        Ok(())
    }

    /// Set the backoff base and cap
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // delays are far below u64::MAX ms
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set the retry ceiling
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the periodic drain interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    /// Disable the periodic drain (connectivity and explicit triggers only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval_secs = 0;
        self
    }

    /// Start in offline mode
    #[must_use]
    pub const fn starting_offline(mut self) -> Self {
        self.start_online = false;
        self
    }

    /// Periodic drain interval, if enabled
    pub const fn sync_interval(&self) -> Option<Duration> {
        if self.sync_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sync_interval_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_reference_backoff() {
        let config = EngineConfig::default();
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.max_retries, 6);
        assert!(config.start_online);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_document_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "max_retries": 3 }"#).unwrap();
        assert_eq!(
            config,
            EngineConfig {
                max_retries: 3,
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = EngineConfig::from_json_str(r#"{ "jitter": true }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_rejects_inverted_backoff_bounds() {
        let error =
            EngineConfig::from_json_str(r#"{ "base_delay_ms": 5000, "max_delay_ms": 100 }"#)
                .unwrap_err();
        assert!(error.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn zero_interval_disables_timer() {
        assert_eq!(EngineConfig::default().without_auto_sync().sync_interval(), None);
        assert_eq!(
            EngineConfig::default()
                .with_sync_interval(Duration::from_secs(5))
                .sync_interval(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_rejects_interval_beyond_limit() {
        let error =
            EngineConfig::from_json_str(r#"{ "sync_interval_secs": 18446744073709551615 }"#)
                .unwrap_err();
        assert!(matches!(error, Error::Config(_)));
        assert!(error.to_string().contains("sync_interval_secs"));

        let week = EngineConfig::default().with_sync_interval(Duration::from_secs(MAX_SYNC_INTERVAL_SECS));
        assert!(week.validate().is_ok());
    }

    #[test]
    fn parse_rejects_oversized_command_buffer() {
        let error = EngineConfig::from_json_str(r#"{ "command_buffer": 18446744073709551615 }"#)
            .unwrap_err();
        assert!(error.to_string().contains("command_buffer"));
        assert!(EngineConfig::from_json_str(r#"{ "command_buffer": 0 }"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{ "command_buffer": 65536 }"#).is_ok());
    }

    #[test]
    fn parse_rejects_delay_cap_beyond_limit() {
        let error = EngineConfig::from_json_str(r#"{ "max_delay_ms": 18446744073709551615 }"#)
            .unwrap_err();
        assert!(error.to_string().contains("max_delay_ms"));
    }
}

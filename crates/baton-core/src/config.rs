//! Configuration resolution for Baton.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Optional JSON config file
//! 3. Environment variables (`BATON_*`)
//!
//! CLI arguments, when a binary has any, are applied by the caller on top.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete Baton configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Handoff scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrent worker activations allowed by the built-in registry pool.
    pub max_concurrent_workers: usize,
    /// How long a completed chain stays queryable before eviction.
    pub completed_chain_ttl_ms: u64,
    /// Poll interval used while `shutdown` waits for chains to drain.
    pub shutdown_poll_interval_ms: u64,
    /// Number of recent handoff latencies kept for the average.
    pub latency_window: usize,
    /// Legacy polling latency the improvement figure is measured against.
    pub baseline_latency_ms: f64,
    /// Latency the scheduler aims for; reported, never enforced.
    pub target_latency_ms: f64,
    /// Buffer size of the notification broadcast channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 5,
            completed_chain_ttl_ms: 60_000,
            shutdown_poll_interval_ms: 100,
            latency_window: 100,
            baseline_latency_ms: 500.0,
            target_latency_ms: 100.0,
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    pub const fn completed_chain_ttl(&self) -> Duration {
        Duration::from_millis(self.completed_chain_ttl_ms)
    }

    pub const fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_workers == 0 {
            return Err(Error::Config(
                "max_concurrent_workers must be at least 1".to_string(),
            ));
        }
        if self.latency_window == 0 {
            return Err(Error::Config("latency_window must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        if self.shutdown_poll_interval_ms == 0 {
            return Err(Error::Config(
                "shutdown_poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if !(self.baseline_latency_ms.is_finite() && self.baseline_latency_ms > 0.0) {
            return Err(Error::Config(
                "baseline_latency_ms must be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_config(config_file: Option<&Path>) -> Result<Config> {
    let mut config = match config_file {
        Some(path) if path.exists() => load_config_file(path)?,
        _ => Config::default(),
    };

    apply_env_overrides(&mut config);
    config.scheduler.validate()?;

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply `BATON_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored and the previous setting is kept.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("BATON_MAX_WORKERS").and_then(|v| v.parse().ok()) {
        config.scheduler.max_concurrent_workers = n;
    }
    if let Some(n) = lookup("BATON_CHAIN_TTL_MS").and_then(|v| v.parse().ok()) {
        config.scheduler.completed_chain_ttl_ms = n;
    }
    if let Some(n) = lookup("BATON_SHUTDOWN_POLL_MS").and_then(|v| v.parse().ok()) {
        config.scheduler.shutdown_poll_interval_ms = n;
    }
    if let Some(n) = lookup("BATON_LATENCY_WINDOW").and_then(|v| v.parse().ok()) {
        config.scheduler.latency_window = n;
    }
    if let Some(val) = lookup("BATON_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("BATON_LOG_JSON") {
        config.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn default_config_has_60s_chain_ttl() {
        let config = Config::default();
        assert_eq!(
            config.scheduler.completed_chain_ttl(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn default_config_keeps_100_latencies() {
        let config = Config::default();
        assert_eq!(config.scheduler.latency_window, 100);
        assert!((config.scheduler.baseline_latency_ms - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_window() {
        let config = SchedulerConfig {
            latency_window: 0,
            ..SchedulerConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("latency_window"), "unexpected error: {err}");
    }

    #[test]
    fn validate_rejects_non_positive_baseline() {
        let config = SchedulerConfig {
            baseline_latency_ms: 0.0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_apply_parsed_values() {
        let vars = env(&[
            ("BATON_MAX_WORKERS", "9"),
            ("BATON_CHAIN_TTL_MS", "1500"),
            ("BATON_LOG_LEVEL", "debug"),
            ("BATON_LOG_JSON", "true"),
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config.scheduler.max_concurrent_workers, 9);
        assert_eq!(config.scheduler.completed_chain_ttl_ms, 1500);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn overrides_ignore_unparseable_values() {
        let vars = env(&[("BATON_MAX_WORKERS", "many")]);
        let mut config = Config::default();
        apply_overrides(&mut config, |k| vars.get(k).cloned());
        assert_eq!(config.scheduler.max_concurrent_workers, 5);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baton.json");
        std::fs::write(&path, r#"{"scheduler":{"latency_window":10}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.scheduler.latency_window, 10);
        assert_eq!(config.scheduler.shutdown_poll_interval_ms, 100);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baton.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn unreadable_file_is_config_error_naming_the_path() {
        let dir = tempfile::tempdir().unwrap();

        // A directory exists but cannot be read as a file.
        let err = load_config_file(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let message = err.to_string();
        assert!(message.contains("Failed to read"));
        assert!(message.contains(&dir.path().display().to_string()));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.json")));
        assert!(result.is_ok(), "missing file should resolve to defaults");
    }
}

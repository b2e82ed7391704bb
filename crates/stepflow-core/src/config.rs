//! # Engine Configuration
//!
//! Tunables for the scheduler and executor, plus typed environment-variable
//! loading shared by the adapters and the test harness.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

use crate::error::EngineError;

/// Scheduler/executor tunables. Defaults match the documented contract;
/// deployments override via their own config loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on concurrently executing steps within one run
    pub worker_cap: usize,
    /// Outer bound on a whole run, seconds; `None` means unbounded
    pub run_timeout_seconds: Option<u64>,
    /// Applied when a step declares no `timeout_seconds` of its own
    pub default_step_timeout_seconds: Option<u64>,
    /// Step types treated as run entries
    pub trigger_types: HashSet<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_cap: 16,
            run_timeout_seconds: None,
            default_step_timeout_seconds: Some(300),
            trigger_types: ["start", "manual", "schedule", "webhook"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn is_trigger_type(&self, step_type: &str) -> bool {
        self.trigger_types.contains(step_type)
    }
}

/// Typed environment variable loading.
pub struct EnvLoader;

impl EnvLoader {
    pub fn required<T>(key: &str) -> Result<T, EngineError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = env::var(key)
            .map_err(|_| EngineError::config(format!("environment variable {key} not set")))?;
        value
            .parse()
            .map_err(|e| EngineError::config(format!("invalid value for {key}: {e}")))
    }

    pub fn optional<T>(key: &str) -> Result<Option<T>, EngineError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(key) {
            Ok(value) if !value.is_empty() => value
                .parse()
                .map(Some)
                .map_err(|e| EngineError::config(format!("invalid value for {key}: {e}"))),
            _ => Ok(None),
        }
    }

    pub fn with_default<T>(key: &str, default: T) -> T
    where
        T: FromStr,
    {
        env::var(key)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }
}

/// Load `.env.test.local` if present (KEY=VALUE lines, `#` comments,
/// quoted values stripped) without overriding variables already set.
/// Returns whether a file was found.
pub fn load_test_env() -> bool {
    dotenvy::from_filename(".env.test.local").is_ok()
}

/// Integration tests that talk to live providers are gated behind
/// `INTEGRATION_TEST=1`.
pub fn integration_tests_enabled() -> bool {
    env::var("INTEGRATION_TEST").map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_matches_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_cap, 16);
        assert!(config.is_trigger_type("start"));
        assert!(config.is_trigger_type("webhook"));
        assert!(!config.is_trigger_type("http"));
    }

    #[test]
    #[serial]
    fn env_loader_parses_and_defaults() {
        env::set_var("STEPFLOW_TEST_PORT", "8080");
        let port: u16 = EnvLoader::required("STEPFLOW_TEST_PORT").unwrap();
        assert_eq!(port, 8080);

        env::remove_var("STEPFLOW_TEST_PORT");
        assert!(EnvLoader::required::<u16>("STEPFLOW_TEST_PORT").is_err());
        assert_eq!(EnvLoader::with_default("STEPFLOW_TEST_PORT", 9090u16), 9090);
        assert_eq!(
            EnvLoader::optional::<u16>("STEPFLOW_TEST_PORT").unwrap(),
            None
        );
    }

    #[test]
    #[serial]
    fn integration_gate_requires_exact_flag() {
        env::remove_var("INTEGRATION_TEST");
        assert!(!integration_tests_enabled());
        env::set_var("INTEGRATION_TEST", "1");
        assert!(integration_tests_enabled());
        env::set_var("INTEGRATION_TEST", "true");
        assert!(!integration_tests_enabled());
        env::remove_var("INTEGRATION_TEST");
    }
}

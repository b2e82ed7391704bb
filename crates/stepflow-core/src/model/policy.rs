use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the executor does once retries are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Surface the error; the step run is marked failed
    #[default]
    Fail,
    /// Emit an empty output on the default port, record the error
    Continue,
    /// Emit a configured static value on the default port
    Fallback,
    /// Emit the error structure on the reserved `error` output port
    ErrorPort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
    Jittered,
}

/// Per-step error handling, parsed from the step's merged config.
///
/// Recognized config keys: `on_error`, `max_retries`, `backoff_strategy`,
/// `interval_seconds`, `timeout_seconds`, `fallback_value`,
/// `non_retryable_codes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, rename = "backoff_strategy")]
    pub backoff: Backoff,
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub fallback_value: Option<Value>,
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_interval() -> f64 {
    1.0
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            on_error: OnError::default(),
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            interval_seconds: default_interval(),
            timeout_seconds: None,
            fallback_value: None,
            non_retryable_codes: Vec::new(),
        }
    }
}

impl ErrorPolicy {
    /// Parse the policy out of a merged step config. Unknown keys are the
    /// adapter's business and ignored here; a missing or non-object config
    /// yields the defaults.
    pub fn from_config(config: &Value) -> Self {
        match config {
            Value::Object(_) => {
                serde_json::from_value(config.clone()).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }

    /// Backoff delay before retry attempt `attempt` (1-based count of
    /// failures so far).
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let base = self.interval_seconds.max(0.0);
        let secs = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => base * f64::from(1u32 << attempt.saturating_sub(1).min(16)),
            Backoff::Jittered => {
                use rand::Rng;
                let exp = base * f64::from(1u32 << attempt.saturating_sub(1).min(16));
                exp * rand::thread_rng().gen_range(0.5..1.0)
            }
        };
        std::time::Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_contract() {
        let policy = ErrorPolicy::from_config(&Value::Null);
        assert_eq!(policy.on_error, OnError::Fail);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, Backoff::Fixed);
        assert!(policy.timeout_seconds.is_none());
    }

    #[test]
    fn parses_policy_keys_out_of_merged_config() {
        let config = json!({
            "url": "https://example.com",
            "on_error": "fallback",
            "max_retries": 2,
            "backoff_strategy": "exponential",
            "interval_seconds": 0.5,
            "timeout_seconds": 10,
            "fallback_value": {"ok": false}
        });
        let policy = ErrorPolicy::from_config(&config);
        assert_eq!(policy.on_error, OnError::Fallback);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff, Backoff::Exponential);
        assert_eq!(policy.timeout_seconds, Some(10));
        assert_eq!(policy.fallback_value, Some(json!({"ok": false})));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = ErrorPolicy {
            backoff: Backoff::Exponential,
            interval_seconds: 1.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(1).as_secs_f64(), 1.0);
        assert_eq!(policy.backoff_delay(2).as_secs_f64(), 2.0);
        assert_eq!(policy.backoff_delay(3).as_secs_f64(), 4.0);
    }

    #[test]
    fn jittered_backoff_stays_within_half_to_full() {
        let policy = ErrorPolicy {
            backoff: Backoff::Jittered,
            interval_seconds: 2.0,
            ..Default::default()
        };
        for _ in 0..32 {
            let d = policy.backoff_delay(1).as_secs_f64();
            assert!((1.0..2.0).contains(&d), "jittered delay {d} out of range");
        }
    }
}

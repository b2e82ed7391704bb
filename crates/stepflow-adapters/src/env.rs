//! Key and endpoint resolution shared by the provider adapters.

use stepflow_core::error::EngineError;

pub(crate) const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
pub(crate) const ANTHROPIC_DEFAULT_BASE: &str = "https://api.anthropic.com";

/// Explicit constructor key wins; otherwise the environment. A missing key
/// is a config error, surfaced at execute time so registration never
/// requires credentials.
pub(crate) fn resolve_api_key(
    explicit: Option<&str>,
    env_var: &str,
) -> Result<String, EngineError> {
    if let Some(key) = explicit {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }
    match std::env::var(env_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(EngineError::config(format!("{env_var} not set"))),
    }
}

pub(crate) fn resolve_base_url(explicit: Option<&str>, env_var: &str, default: &str) -> String {
    if let Some(url) = explicit {
        if !url.is_empty() {
            return url.trim_end_matches('/').to_string();
        }
    }
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn explicit_key_beats_environment() {
        std::env::set_var("STEPFLOW_FAKE_KEY", "from-env");
        assert_eq!(
            resolve_api_key(Some("explicit"), "STEPFLOW_FAKE_KEY").unwrap(),
            "explicit"
        );
        assert_eq!(
            resolve_api_key(None, "STEPFLOW_FAKE_KEY").unwrap(),
            "from-env"
        );
        std::env::remove_var("STEPFLOW_FAKE_KEY");
        let err = resolve_api_key(None, "STEPFLOW_FAKE_KEY").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    #[serial]
    fn base_url_strips_trailing_slash() {
        std::env::remove_var("STEPFLOW_FAKE_BASE");
        assert_eq!(
            resolve_base_url(Some("http://localhost:8080/"), "STEPFLOW_FAKE_BASE", "https://d"),
            "http://localhost:8080"
        );
        assert_eq!(
            resolve_base_url(None, "STEPFLOW_FAKE_BASE", "https://d"),
            "https://d"
        );
    }
}

//! # Engine Error Taxonomy
//!
//! All fallible operations in the engine return [`EngineError`]. The variants
//! map onto the failure classes the executor's retry policy understands:
//!
//! - [`EngineError::Config`] — invalid or missing config; never retried
//! - [`EngineError::Validation`] — structural problems (unknown ports,
//!   dangling edge endpoints); never retried
//! - [`EngineError::Provider`] — an external service answered with a
//!   structured failure; retryable by default, overridable per declared code
//! - [`EngineError::Protocol`] — an external service answered with something
//!   the adapter could not parse; retryable
//! - [`EngineError::Timeout`] — a deadline expired; retryable up to the
//!   step's budget
//! - [`EngineError::Cancelled`] — run-level cancellation; never retried
//! - [`EngineError::HttpStatus`] — the HTTP adapter saw a >= 400 status and
//!   returns *both* the filled response (in the variant payload) and this
//!   error, so the executor can still apply `on_error` handling
//! - [`EngineError::Internal`] — script host crash or programmer error
//!
//! Structural variants (`CycleDetected`, `UnknownParent`,
//! `CircularDependency`) are produced by the block resolver and the seed
//! migrator and are validation-class failures.

use serde_json::Value;

/// Primary error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid or missing required configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was missing or malformed
        message: String,
    },

    /// Structural validation failure: unknown step/port references,
    /// malformed graph shape, bad seed data.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// An external service returned a non-success status or a structured
    /// error body.
    #[error("Provider error from {provider}: {message}")]
    Provider {
        /// Adapter or provider identifier
        provider: String,
        message: String,
        /// HTTP status if the failure carried one
        status: Option<u16>,
        /// Provider-declared error code, matched against block error codes
        code: Option<String>,
    },

    /// An external service answered with a payload the adapter could not
    /// interpret.
    #[error("Protocol error from {provider}: {message}")]
    Protocol { provider: String, message: String },

    /// A deadline expired at the adapter, step, group, or run layer.
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// The run was cancelled. Terminal; never retried.
    #[error("Operation cancelled")]
    Cancelled,

    /// The HTTP adapter observed a status >= 400. The response the adapter
    /// assembled travels inside the error so callers can unpack both.
    #[error("HTTP status {status}")]
    HttpStatus {
        status: u16,
        /// The adapter response that accompanied the failure status
        response: Box<Value>,
    },

    /// Script host crash, panic, or other programmer error.
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// A block's parent chain loops back on itself.
    #[error("Block definition '{slug}' has a cyclic parent chain")]
    CycleDetected { slug: String },

    /// A block names a parent slug that is not in the catalog.
    #[error("Block definition '{slug}' references unknown parent '{parent}'")]
    UnknownParent { slug: String, parent: String },

    /// The seed registry could not be topologically ordered.
    #[error("Circular dependency among seed blocks: {remaining:?}")]
    CircularDependency {
        /// Slugs left unprocessed after the topological pass
        remaining: Vec<String>,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// JSON (de)serialization failure.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Repository-layer failure.
    #[error("Repository error: {message}")]
    Repository { message: String },
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation { message: message.into() }
    }

    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        EngineError::Provider {
            provider: provider.into(),
            message: message.into(),
            status,
            code: None,
        }
    }

    pub fn protocol(provider: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        EngineError::Timeout { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal { message: message.into() }
    }

    pub fn repository(message: impl Into<String>) -> Self {
        EngineError::Repository { message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Default retry classification. Block-declared error codes can override
    /// this per provider code; the executor consults both.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Provider { .. } | EngineError::Protocol { .. } => true,
            EngineError::Timeout { .. } => true,
            // Retry server-side failures and throttling; a 4xx will not get
            // better on its own.
            EngineError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short machine-readable kind tag, persisted on failed runs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Config { .. } => "config",
            EngineError::Validation { .. } => "validation",
            EngineError::Provider { .. } => "provider",
            EngineError::Protocol { .. } => "protocol",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Cancelled => "cancelled",
            EngineError::HttpStatus { .. } => "http_status",
            EngineError::Internal { .. } => "internal",
            EngineError::CycleDetected { .. } => "cycle_detected",
            EngineError::UnknownParent { .. } => "unknown_parent",
            EngineError::CircularDependency { .. } => "circular_dependency",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Serialization { .. } => "serialization",
            EngineError::Repository { .. } => "repository",
        }
    }

    /// Provider code carried by this error, if any.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            EngineError::Provider { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return EngineError::Timeout {
                message: error.to_string(),
            };
        }
        EngineError::Provider {
            provider: error
                .url()
                .and_then(|u| u.host_str())
                .unwrap_or("http")
                .to_string(),
            message: error.to_string(),
            status: error.status().map(|s| s.as_u16()),
            code: None,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Serialization {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_and_protocol_errors_are_retryable() {
        assert!(EngineError::provider("openai", "rate limited", Some(429)).is_retryable());
        assert!(EngineError::protocol("anthropic", "truncated body").is_retryable());
        assert!(EngineError::timeout("step deadline").is_retryable());
    }

    #[test]
    fn config_validation_and_cancellation_are_not_retryable() {
        assert!(!EngineError::config("missing url").is_retryable());
        assert!(!EngineError::validation("unknown port").is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::internal("script host panicked").is_retryable());
    }

    #[test]
    fn http_status_retryability_depends_on_status() {
        let server = EngineError::HttpStatus {
            status: 503,
            response: Box::new(serde_json::json!({})),
        };
        let client = EngineError::HttpStatus {
            status: 404,
            response: Box::new(serde_json::json!({})),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(EngineError::Cancelled.kind(), "cancelled");
        assert_eq!(
            EngineError::CycleDetected { slug: "a".into() }.kind(),
            "cycle_detected"
        );
    }
}

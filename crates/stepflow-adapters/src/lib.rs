//! # stepflow-adapters
//!
//! Concrete [`stepflow_core::adapter::Adapter`] implementations for the
//! integrations the engine ships with:
//!
//! - [`OpenAiChatAdapter`] — OpenAI-compatible `/chat/completions`
//! - [`AnthropicMessagesAdapter`] — Anthropic-style `/v1/messages`
//! - [`HttpAdapter`] — generic HTTP requests with JSON-aware response
//!   decoding
//!
//! Adapters receive fully expanded config (no template tokens) and report
//! failures through the engine error taxonomy: missing keys are config
//! errors, non-success provider statuses are provider errors, unparsable
//! payloads are protocol errors, and deadline expiry maps to timeouts.
//!
//! API keys come from the environment (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`) or explicit constructors; base URLs are
//! overridable via `OPENAI_BASE_URL` / `ANTHROPIC_BASE_URL` for test
//! servers and compatible gateways.

mod anthropic;
mod env;
mod http;
mod openai;

pub use anthropic::AnthropicMessagesAdapter;
pub use http::HttpAdapter;
pub use openai::OpenAiChatAdapter;

use std::sync::Arc;
use stepflow_core::adapter::{AdapterRegistry, PassthroughAdapter};

/// Register the stock adapters on a registry, including the passthroughs
/// backing the side-effect-free flow blocks. Call once at process init.
pub fn register_defaults(registry: &mut AdapterRegistry) {
    registry.register(Arc::new(OpenAiChatAdapter::from_env()));
    registry.register(Arc::new(AnthropicMessagesAdapter::from_env()));
    registry.register(Arc::new(HttpAdapter::new()));
    registry.register(Arc::new(PassthroughAdapter::new("start")));
    registry.register(Arc::new(PassthroughAdapter::new("merge")));
}

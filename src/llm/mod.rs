//! Model provider integration.
//!
//! The executor talks to models only through the `LlmProvider` trait. The
//! shipped backend is `AnthropicProvider`, a thin reqwest client for the
//! Messages API.

pub mod anthropic;
pub mod provider;

pub use anthropic::{AnthropicProvider, ContentBlock};
pub use provider::*;

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use thiserror::Error;

use crate::{Message, ToolSchema};

/// Errors surfaced by model backends and the client factory.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The factory could not find a credential for a provider that needs one.
    /// Callers catch this variant to prompt the user and retry.
    #[error("missing credential for provider '{provider}': set {env_var}")]
    MissingCredential { provider: String, env_var: String },

    #[error("unknown model provider: {0}")]
    UnknownProvider(String),

    /// Transport-level failure (connection refused, timeout, TLS, ...).
    #[error("model transport error: {0}")]
    Http(String),

    /// The backend answered with a non-success status.
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// The backend answered 200 but the completion carried no text.
    #[error("model returned an empty completion")]
    Empty,
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Contract between the conversation engine and any model backend.
///
/// `generate` returns the model's complete turn content as one string; the
/// text may embed the delimiter-framed tool-call format, which the engine's
/// parser extracts.  Backends do not stream.
#[async_trait]
pub trait ModelClient: Send + Sync + std::fmt::Debug {
    /// Driver identifier for status display (e.g. `"openai"`).
    fn provider_name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Produce the assistant's next turn for the given history.
    ///
    /// `tools` is offered for backends that use a native function-calling
    /// channel; drivers speaking the textual protocol may ignore it because
    /// the tool catalog is already rendered into the system message.
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<String, ModelError>;
}

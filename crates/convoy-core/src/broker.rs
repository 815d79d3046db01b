// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use convoy_model::ToolSchema;

/// Rendered result of one tool dispatch, ready for the conversation history.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub content: String,
    /// The provider flagged this result as an error (non-fatal).
    pub is_error: bool,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No connected server advertises the tool.
    #[error("no provider for tool '{0}'")]
    NotFound(String),
    /// The dispatch itself failed (transport, timeout, protocol).
    #[error("{0}")]
    Failed(String),
}

/// The engine's view of the subprocess fleet.
///
/// The fleet crate implements this for its server manager; tests implement
/// deterministic fakes with scripted delays and failures.
#[async_trait]
pub trait ToolBroker: Send + Sync {
    /// Aggregated catalog of every tool the fleet currently advertises.
    async fn catalog(&self) -> Vec<ToolSchema>;

    /// Run one tool call on its owning server.  Fully concurrent: a turn may
    /// fan out many dispatches at once.
    async fn dispatch(
        &self,
        name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<DispatchOutcome, DispatchError>;
}

/// A broker over nothing: empty catalog, every dispatch unroutable.
/// Used when convoy runs without a fleet configuration.
#[derive(Debug, Default)]
pub struct EmptyBroker;

#[async_trait]
impl ToolBroker for EmptyBroker {
    async fn catalog(&self) -> Vec<ToolSchema> {
        Vec::new()
    }

    async fn dispatch(
        &self,
        name: &str,
        _args: &Value,
        _timeout: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        Err(DispatchError::NotFound(name.to_string()))
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Message, ModelClient, ModelError, ToolSchema};

/// Deterministic mock client for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Debug, Default)]
pub struct MockClient;

#[async_trait]
impl ModelClient for MockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolSchema]>,
    ) -> Result<String, ModelError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content())
            .unwrap_or("[no input]");
        Ok(format!("MOCK: {reply}"))
    }
}

/// One scripted turn for [`ScriptedClient`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return this text as the assistant turn.
    Reply(String),
    /// Fail the call with a transport error carrying this message.
    Fail(String),
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }
    pub fn fail(msg: impl Into<String>) -> Self {
        Self::Fail(msg.into())
    }
}

/// A pre-scripted client.  Each `generate` call pops the next step from the
/// front of the queue, so tests specify exact turn sequences – including
/// embedded tool-call blocks and mid-turn failures – without network access.
///
/// Every request's outbound message list and tool schemas are recorded so
/// tests can inspect exactly what the engine sent.
#[derive(Debug)]
pub struct ScriptedClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Message lists seen by each `generate` call, in order.
    pub requests: Mutex<Vec<Vec<Message>>>,
    /// Tool schemas passed with the most recent call (`None` = no tools offered).
    pub last_tools: Mutex<Option<Vec<ToolSchema>>>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            last_tools: Mutex::new(None),
        }
    }

    /// Convenience: a script of plain text replies.
    pub fn replies<I: Into<String>>(texts: Vec<I>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptStep::Reply(t.into())).collect())
    }

    /// Convenience: a single text reply.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::replies(vec![text.into()])
    }

    /// Number of `generate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn provider_name(&self) -> &str {
        "scripted"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        *self.last_tools.lock().unwrap() = tools.map(|t| t.to_vec());

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            // Default fallback when all steps are consumed
            None => Ok("[script exhausted]".into()),
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(msg)) => Err(ModelError::Http(msg)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

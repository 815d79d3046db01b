// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Message, ModelClient, ModelError, ToolSchema};

/// Non-streaming driver for any OpenAI-compatible `chat/completions` endpoint.
///
/// One driver covers the whole compatible family (OpenAI, OpenRouter, Groq,
/// Ollama, vLLM); the registry supplies per-provider base URLs and key
/// conventions.  The tool catalog travels in the system message via the
/// textual call protocol, so the native `tools` request field is never sent.
#[derive(Debug)]
pub struct OpenAiCompatClient {
    provider: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Self {
        let chat_url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key,
            chat_url,
            temperature,
            http,
        }
    }
}

/// Map conversation messages onto the OpenAI-compatible wire roles.
///
/// Tool results have no first-class role in this scheme (the native
/// function-calling channel is unused), so they travel as labeled user
/// messages; the model was told to expect them in that form by the system
/// prompt.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content, .. } => json!({"role": "system", "content": content}),
            Message::User { content, .. } => json!({"role": "user", "content": content}),
            Message::Ai { content, .. } => json!({"role": "assistant", "content": content}),
            Message::ToolResult {
                tool_call_id,
                tool_name,
                content,
                ..
            } => json!({
                "role": "user",
                "content": format!("Tool result for call {tool_call_id} ({tool_name}):\n{content}"),
            }),
        })
        .collect()
}

/// Build the request body.  Kept as a pure function so tests can pin the
/// wire shape without network access.
pub(crate) fn build_request_body(
    model: &str,
    messages: &[Message],
    temperature: Option<f32>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": wire_messages(messages),
        "stream": false,
    });
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }
    body
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolSchema]>,
    ) -> Result<String, ModelError> {
        let body = build_request_body(&self.model, messages, self.temperature);
        debug!(provider = %self.provider, model = %self.model, "sending completion request");

        let mut req = self.http.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: self.provider.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ModelError::Empty)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

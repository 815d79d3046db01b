// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in the conversation history.
///
/// Sealed variant over the four roles the orchestrator knows about.  The
/// assistant variant carries the calls it announced in its turn text; a
/// tool-result variant binds back to one announced call by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
        created_at: DateTime<Utc>,
    },
    User {
        content: String,
        created_at: DateTime<Utc>,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<AnnouncedCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verification: Option<Verdict>,
        created_at: DateTime<Utc>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::Ai {
            content: text.into(),
            tool_calls: Vec::new(),
            verification: None,
            created_at: Utc::now(),
        }
    }

    pub fn ai_with_calls(text: impl Into<String>, calls: Vec<AnnouncedCall>) -> Self {
        Self::Ai {
            content: text.into(),
            tool_calls: calls,
            verification: None,
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// The message text, regardless of variant.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Ai { content, .. }
            | Self::ToolResult { content, .. } => content,
        }
    }

    /// Lowercase role label matching the wire tag.
    pub fn role_label(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Ai { .. } => "ai",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// The calls announced by an assistant message; empty for other variants.
    pub fn announced_calls(&self) -> &[AnnouncedCall] {
        match self {
            Self::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Attach a verification verdict.  No-op for non-assistant variants.
    pub fn set_verification(&mut self, verdict: Verdict) {
        if let Self::Ai { verification, .. } = self {
            *verification = Some(verdict);
        }
    }
}

/// A tool invocation announced by the assistant in its turn text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncedCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub args: Value,
}

/// Outcome of judging a completed turn against its criteria.
///
/// Also the exact shape the verifier model is instructed to emit, so it
/// doubles as the deserialization target for that reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passes: bool,
    #[serde(default)]
    pub feedback: String,
}

/// A tool advertised by a provider subprocess, as handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(alias = "inputSchema")]
    pub input_schema: Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

/// Literal opener of an embedded tool-call block.
pub const TOOL_CALL_OPENER: &str = "<<<TOOL_CALL>>>";
/// Literal closer of an embedded tool-call block.
pub const TOOL_CALL_CLOSER: &str = "<<<END_TOOL_CALL>>>";

/// One tool invocation extracted from the model's turn text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    /// Synthetic id unless the backend supplied one out of band.
    pub id: String,
    pub name: String,
    /// The `arguments` object.  Always a JSON object, never array or null.
    pub args: Value,
    /// Byte range of the whole block (delimiters included) in the source text.
    pub span: (usize, usize),
    /// The whole block verbatim, delimiters included.
    pub full_text: String,
}

/// True when the text contains the call opener at all.  Used to distinguish
/// "no calls" from "a call the parser had to reject" (malformed).
pub fn contains_call_syntax(text: &str) -> bool {
    text.contains(TOOL_CALL_OPENER)
}

/// Extracts delimiter-framed tool calls from model output.
///
/// Holds only the counter used for synthetic call ids, so one parser can be
/// shared across a conversation and ids stay unique.
#[derive(Default)]
pub struct ToolCallParser {
    counter: AtomicU64,
}

impl ToolCallParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("call-{}-{}", Utc::now().timestamp_millis(), n)
    }

    /// Scan `text` left to right and return every valid call in order.
    ///
    /// A dangling opener (no closer after it) terminates the scan without an
    /// error.  A block whose inner text is not a JSON object with a string
    /// `name` and an object `arguments` is logged and skipped; scanning
    /// resumes after the closer, never at another closer inside the block,
    /// which keeps the result deterministic on nested or malformed content.
    pub fn parse(&self, text: &str) -> Vec<ParsedCall> {
        let mut calls = Vec::new();
        let mut cursor = 0;

        while let Some(rel_open) = text[cursor..].find(TOOL_CALL_OPENER) {
            let open = cursor + rel_open;
            let inner_start = open + TOOL_CALL_OPENER.len();
            let Some(rel_close) = text[inner_start..].find(TOOL_CALL_CLOSER) else {
                // Dangling opener: no call emitted, nothing more to scan.
                break;
            };
            let close = inner_start + rel_close;
            let end = close + TOOL_CALL_CLOSER.len();

            match validate_block(text[inner_start..close].trim()) {
                Ok((name, args)) => calls.push(ParsedCall {
                    id: self.next_id(),
                    name,
                    args,
                    span: (open, end),
                    full_text: text[open..end].to_string(),
                }),
                Err(reason) => warn!("skipping malformed tool call block: {reason}"),
            }
            cursor = end;
        }
        calls
    }

    /// Like [`parse`], additionally returning the text with each valid call
    /// block replaced by a `[Tool Call: <name>]` placeholder.  Display layers
    /// use the replaced text; reinserting each call's `full_text` at its
    /// placeholder reconstructs the input byte-for-byte.
    pub fn extract_and_replace(&self, text: &str) -> (String, Vec<ParsedCall>) {
        let calls = self.parse(text);
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for call in &calls {
            out.push_str(&text[cursor..call.span.0]);
            out.push_str(&format!("[Tool Call: {}]", call.name));
            cursor = call.span.1;
        }
        out.push_str(&text[cursor..]);
        (out, calls)
    }
}

/// Check the inner text of a block: a JSON object with a string `name` and
/// an object `arguments`.
fn validate_block(inner: &str) -> Result<(String, Value), String> {
    let value: Value =
        serde_json::from_str(inner).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "call must be a JSON object".to_string())?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing string field 'name'".to_string())?;
    let args = obj
        .get("arguments")
        .ok_or_else(|| "missing field 'arguments'".to_string())?;
    if !args.is_object() {
        return Err("'arguments' must be an object".to_string());
    }
    Ok((name.to_string(), args.clone()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// Raw `tools/call` result: the untouched content fragment array plus the
/// provider's error flag.  Rendering to model-facing text is a separate
/// policy step so callers can keep the fragments when they need them.
#[derive(Debug, Clone)]
pub struct RawInvocation {
    pub content: Vec<Value>,
    pub is_error: bool,
}

/// Render typed content fragments to a single string for the model.
///
/// Policy (pinned by tests): text fragments joined with `\n`, image and
/// audio fragments reduced to a `[Image: <mime>]` / `[Audio: <mime>]`
/// marker, anything else serialized as pretty JSON.
pub fn render_fragments(fragments: &[Value]) -> String {
    fragments
        .iter()
        .map(|f| match f.get("type").and_then(Value::as_str) {
            Some("text") => f
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some("image") => format!("[Image: {}]", mime_of(f)),
            Some("audio") => format!("[Audio: {}]", mime_of(f)),
            _ => serde_json::to_string_pretty(f).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mime_of(fragment: &Value) -> &str {
    fragment
        .get("mimeType")
        .or_else(|| fragment.get("mime_type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

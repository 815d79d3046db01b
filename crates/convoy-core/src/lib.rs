// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod broker;
mod engine;
mod parser;
pub mod prompts;
mod state;

pub use broker::{DispatchError, DispatchOutcome, EmptyBroker, ToolBroker};
pub use engine::ConversationEngine;
pub use parser::{
    contains_call_syntax, ParsedCall, ToolCallParser, TOOL_CALL_CLOSER, TOOL_CALL_OPENER,
};
pub use state::{
    render_transcript, ConversationState, VerificationAnchor, COMPACTION_KEEP_RECENT,
    COMPACTION_TRIGGER_LEN,
};

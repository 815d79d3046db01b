// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt factory: every template the engine sends lives here, and only
//! here.  All functions are pure; the engine never inlines template strings.
use convoy_model::ToolSchema;

use crate::parser::{TOOL_CALL_CLOSER, TOOL_CALL_OPENER};

/// System prompt installing the tool-use discipline and the current catalog.
pub fn tool_system_prompt(tools: &[ToolSchema]) -> String {
    let descriptions = if tools.is_empty() {
        "No tools are currently available.".to_string()
    } else {
        tools
            .iter()
            .map(|t| {
                let schema = serde_json::to_string_pretty(&t.input_schema)
                    .unwrap_or_else(|_| "{}".to_string());
                format!(
                    "## {}\n{}\n\n**Arguments Schema:**\n```json\n{}\n```",
                    t.name, t.description, schema
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "You are a helpful assistant with access to tools. Use tools EXACTLY according to their \
         descriptions and required format.\n\n\
         **Core Instructions for Tool Use:**\n\n\
         1. **Address the Full Request:** Plan and execute all necessary steps sequentially using \
         tools. If generating information *and* performing an action, include the key \
         information in your response along with the action confirmation.\n\
         2. **Execution Model & Reacting to Results:**\n   \
         * **Dispatch:** All tools you call in a single response turn are dispatched *before* \
         you receive results for *any* of them.\n   \
         * **Results:** You *will* receive the results for all dispatched tools in the *next* \
         conversation turn.\n   \
         * **No Same-Turn Chaining:** Because of the dispatch timing, you cannot use the result \
         of one tool as input for another tool within the *same* response turn. Plan sequential, \
         dependent calls across multiple turns.\n   \
         * **Verification & Adaptation:** Carefully review tool results when you receive them. \
         Verify success or failure, extract data, and change your plan or response if the \
         results require it.\n\
         3. **Be Truthful & Cautious:** Only confirm actions (e.g. \"file saved\") if the tool \
         result explicitly confirms success. Report errors. Be careful with tools that modify \
         external systems.\n\
         4. **Use Correct Format:** Use the precise `{opener}...{closer}` format with valid JSON \
         (`name`, `arguments`) for all tool calls.\n\n\
         # Tool Descriptions\n\n\
         {descriptions}\n\n\
         When you need to use a tool, you MUST format your request exactly as follows, including \
         the delimiters:\n\
         {opener}\n\
         {{\n  \
         \"name\": \"tool_name\",\n  \
         \"arguments\": {{\n    \
         \"arg1\": \"value1\",\n    \
         \"arg2\": \"value2\"\n  \
         }}\n\
         }}\n\
         {closer}\n\n\
         Important:\n\
         - Only include ONE tool call JSON block per delimiter section. Use multiple sections \
         for multiple parallel calls in one turn.\n\
         - You can include explanatory text before or after the tool call block.\n\
         - If no tool is needed, just respond normally.",
        opener = TOOL_CALL_OPENER,
        closer = TOOL_CALL_CLOSER,
        descriptions = descriptions,
    )
}

/// Ask the model to derive verifiable success criteria from the user request.
pub fn verification_criteria_prompt(user_request: &str) -> String {
    format!(
        "Based on the following user request, list concise, verifiable criteria for judging \
         whether a response fully satisfies it. Output ONLY the criteria list, one criterion \
         per line, starting with '- '.\n\n\
         User request:\n{user_request}"
    )
}

/// Ask the model to judge the completed turn against the criteria.
pub fn verification_prompt(original_request: &str, criteria: &str, sequence: &str) -> String {
    format!(
        "You are a strict evaluator. Judge whether the assistant's work satisfies the user's \
         request according to the criteria.\n\n\
         Original request:\n{original_request}\n\n\
         Criteria:\n{criteria}\n\n\
         Conversation since the request:\n{sequence}\n\n\
         Respond with ONLY a raw JSON object of the form \
         {{\"passes\": boolean, \"feedback\": string}} and no surrounding text. Set \"passes\" \
         to true only if every criterion is met; otherwise set it to false and explain what is \
         missing in \"feedback\"."
    )
}

/// Sent when the verdict fails: request a revised answer.
pub fn verification_failure_prompt(feedback: &str) -> String {
    format!(
        "Your previous response failed verification based on the following feedback:\n\
         {feedback}\n\n\
         Revise your response to address the feedback and fully satisfy the original request."
    )
}

/// Sent when a turn contained call syntax the parser had to reject.
pub fn invalid_tool_format_prompt(invalid_content: &str) -> String {
    format!(
        "Your previous message contained a tool call block that could not be parsed:\n\n\
         {invalid_content}\n\n\
         Correct the format: between the {TOOL_CALL_OPENER} and {TOOL_CALL_CLOSER} delimiters \
         there must be a single valid JSON object with a \"name\" string and an \"arguments\" \
         object. Resend the corrected tool call."
    )
}

/// Transient instruction sent with the generate call that follows a dispatch
/// round.  Never stored in history.
pub fn tool_results_prompt() -> String {
    "The results of your tool calls are shown above. Use them to synthesize an answer to the \
     user's request, or emit another tool call if more information is needed."
        .to_string()
}

/// Ask the model for a factual summary of older history during compaction.
pub fn compaction_prompt(history_string: &str) -> String {
    format!(
        "You are a context compaction assistant. Produce a factual, concise summary of the \
         following conversation history. Preserve technical details, decisions, file names, \
         and tool outputs that may matter for future turns. The summary will replace the \
         original history to free up context space.\n\n\
         {history_string}"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> ToolSchema {
        ToolSchema {
            name: "echo".into(),
            description: "Echoes the message back".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }),
        }
    }

    #[test]
    fn system_prompt_lists_each_tool_with_schema() {
        let p = tool_system_prompt(&[echo_tool()]);
        assert!(p.contains("# Tool Descriptions"));
        assert!(p.contains("## echo"));
        assert!(p.contains("Echoes the message back"));
        assert!(p.contains("**Arguments Schema:**"));
        assert!(p.contains("```json"));
        assert!(p.contains("\"message\""));
    }

    #[test]
    fn system_prompt_shows_delimiter_example() {
        let p = tool_system_prompt(&[echo_tool()]);
        assert!(p.contains(TOOL_CALL_OPENER));
        assert!(p.contains(TOOL_CALL_CLOSER));
        assert!(p.contains("Important:"));
    }

    #[test]
    fn system_prompt_without_tools_says_so() {
        let p = tool_system_prompt(&[]);
        assert!(p.contains("No tools are currently available."));
        assert!(!p.contains("## "));
    }

    #[test]
    fn criteria_prompt_embeds_request_and_format_rule() {
        let p = verification_criteria_prompt("rename the file");
        assert!(p.contains("rename the file"));
        assert!(p.contains("starting with '- '"));
        assert!(p.contains("Output ONLY the criteria list"));
    }

    #[test]
    fn verification_prompt_demands_raw_json() {
        let p = verification_prompt("req", "- c1", "User: req");
        assert!(p.contains("Original request:\nreq"));
        assert!(p.contains("- c1"));
        assert!(p.contains(r#"{"passes": boolean, "feedback": string}"#));
        assert!(p.contains("no surrounding text"));
    }

    #[test]
    fn failure_prompt_carries_feedback() {
        let p = verification_failure_prompt("Missing the file path.");
        assert!(p.starts_with("Your previous response failed verification"));
        assert!(p.contains("Missing the file path."));
        assert!(p.contains("Revise your response"));
    }

    #[test]
    fn invalid_format_prompt_carries_offending_excerpt() {
        let p = invalid_tool_format_prompt("<<<TOOL_CALL>>>oops<<<END_TOOL_CALL>>>");
        assert!(p.contains("oops"));
        assert!(p.contains("\"name\""));
        assert!(p.contains("\"arguments\""));
    }

    #[test]
    fn compaction_prompt_embeds_history() {
        let p = compaction_prompt("User: hi\nAssistant: hello");
        assert!(p.contains("User: hi"));
        assert!(p.contains("summary"));
    }
}

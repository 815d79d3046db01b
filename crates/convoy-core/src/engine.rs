// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use convoy_config::EngineConfig;
use convoy_model::{AnnouncedCall, Message, ModelClient, ModelError, Verdict};

use crate::{
    broker::{DispatchError, ToolBroker},
    parser::{contains_call_syntax, ToolCallParser},
    prompts,
    state::ConversationState,
};

/// Synthetic assistant message recorded when a turn is cancelled mid-flight.
const CANCELLED_TEXT: &str = "[turn cancelled]";

/// Drives one conversation: prompt assembly, model calls, tool-call
/// extraction, parallel dispatch, result reinjection, compaction,
/// verification and correction.
///
/// One turn runs at a time (`&mut self`); callers that share an engine reject
/// concurrent input as busy.  [`process_user_message`] never returns an
/// error: every failure is folded into the returned string and the history
/// stays coherent.
///
/// [`process_user_message`]: ConversationEngine::process_user_message
pub struct ConversationEngine {
    state: ConversationState,
    client: Arc<dyn ModelClient>,
    broker: Arc<dyn ToolBroker>,
    config: EngineConfig,
    parser: ToolCallParser,
}

impl ConversationEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        broker: Arc<dyn ToolBroker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state: ConversationState::new(),
            client,
            broker,
            config,
            parser: ToolCallParser::new(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    /// `provider/model` label for status display.
    pub fn model_label(&self) -> String {
        format!("{}/{}", self.client.provider_name(), self.client.model_name())
    }

    /// Start over: drop all history.
    pub fn new_conversation(&mut self) {
        self.state.clear();
    }

    /// Swap the model backend.  The verification anchor is cleared because
    /// criteria generated by one model do not transfer to another.
    pub fn switch_client(&mut self, client: Arc<dyn ModelClient>) {
        self.client = client;
        self.state.clear_verification_anchor();
    }

    /// Process one user turn to completion and return the final answer text.
    pub async fn process_user_message(&mut self, text: &str) -> String {
        self.run_turn(text, None).await
    }

    /// Like [`process_user_message`] but cancellable at every suspension
    /// point.  Both an explicit send and a dropped sender count as
    /// cancellation.  When the turn is cut short after the user message was
    /// recorded, a synthetic assistant message keeps the history consistent.
    ///
    /// [`process_user_message`]: ConversationEngine::process_user_message
    pub async fn process_user_message_with_cancel(
        &mut self,
        text: &str,
        mut cancel: oneshot::Receiver<()>,
    ) -> String {
        self.run_turn(text, Some(&mut cancel)).await
    }

    async fn run_turn(
        &mut self,
        text: &str,
        mut cancel: Option<&mut oneshot::Receiver<()>>,
    ) -> String {
        // Already cancelled on entry: skip without touching history.
        if let Some(rx) = cancel.as_mut() {
            use tokio::sync::oneshot::error::TryRecvError;
            if !matches!(rx.try_recv(), Err(TryRecvError::Empty)) {
                return CANCELLED_TEXT.to_string();
            }
        }

        self.state.append(Message::user(text));

        // S1 CRITERIA: once per conversation, on the first user turn.
        if self.state.verification_anchor().is_none() {
            let client = Arc::clone(&self.client);
            let request = vec![Message::user(prompts::verification_criteria_prompt(text))];
            match race_cancel(&mut cancel, client.generate(&request, None)).await {
                None => return self.cancelled(),
                Some(Ok(criteria)) => {
                    debug!(turn = self.state.turn(), "verification criteria generated");
                    self.state
                        .set_verification_anchor(text, criteria.trim().to_string());
                }
                Some(Err(e)) => return self.model_failure(e),
            }
        }

        // S2 PROMPT: rebuild the system prompt from the live tool catalog.
        let catalog = self.broker.catalog().await;
        self.state
            .set_system_prompt(prompts::tool_system_prompt(&catalog));

        // S3 MAYBE_COMPACT
        if self.state.needs_compaction() && self.compact(&mut cancel).await.is_none() {
            return self.cancelled();
        }

        // S4–S7: generate → parse → dispatch loop.
        let tool_timeout = Duration::from_secs(self.config.timeouts.tool_call_secs);
        let mut round: u32 = 0;
        let mut format_retries: u32 = 0;
        let mut after_dispatch = false;

        let final_text = loop {
            let mut outbound = self.state.messages();
            if after_dispatch {
                // Transient synthesis instruction; deliberately not recorded
                // in history so tool turns keep their canonical shape.
                outbound.push(Message::user(prompts::tool_results_prompt()));
            }

            let client = Arc::clone(&self.client);
            let ai_text = match race_cancel(
                &mut cancel,
                client.generate(&outbound, Some(catalog.as_slice())),
            )
            .await
            {
                None => return self.cancelled(),
                Some(Ok(t)) => t,
                Some(Err(e)) => return self.model_failure(e),
            };

            // S5 PARSE
            let parsed = self.parser.parse(&ai_text);
            if parsed.is_empty() {
                if contains_call_syntax(&ai_text)
                    && format_retries < self.config.max_format_retries
                {
                    // Malformed call: record the turn as call-free, ask for a
                    // corrected format once.
                    format_retries += 1;
                    self.state.append(Message::ai(ai_text.clone()));
                    self.state
                        .append(Message::user(prompts::invalid_tool_format_prompt(&ai_text)));
                    after_dispatch = false;
                    continue;
                }
                self.state.append(Message::ai(ai_text.clone()));
                break ai_text;
            }

            // Defense in depth: the parser always assigns ids, but a call
            // without one could never be paired with its result.
            let announced: Vec<AnnouncedCall> = parsed
                .into_iter()
                .filter(|c| !c.id.is_empty())
                .map(|c| AnnouncedCall {
                    id: c.id,
                    name: c.name,
                    args: c.args,
                })
                .collect();
            self.state
                .append(Message::ai_with_calls(ai_text.clone(), announced.clone()));

            // S6 DISPATCH: fan out concurrently; results are appended in
            // announcement order, not completion order, so replay is
            // deterministic.
            let broker = Arc::clone(&self.broker);
            let dispatches: Vec<_> = announced
                .iter()
                .map(|call| broker.dispatch(&call.name, &call.args, tool_timeout))
                .collect();
            let results = match race_cancel(&mut cancel, join_all(dispatches)).await {
                None => return self.cancelled(),
                Some(r) => r,
            };

            for (call, outcome) in announced.iter().zip(results) {
                let content = match outcome {
                    Ok(o) => {
                        if o.is_error {
                            debug!(tool = %call.name, "tool reported an error result");
                        }
                        o.content
                    }
                    Err(DispatchError::NotFound(name)) => {
                        format!("No server found providing tool '{name}'.")
                    }
                    Err(DispatchError::Failed(reason)) => format!("Error: {reason}"),
                };
                self.state
                    .append(Message::tool_result(&call.id, &call.name, content));
            }
            after_dispatch = true;

            // Only a dispatch consumes a round; format-retry passes do not
            // eat into the tool-call budget.
            round += 1;
            if round >= self.config.max_rounds {
                // Round cap reached: stop looping and verify with the last
                // text instead of inviting another call.
                warn!(round, "tool-call round cap reached");
                break ai_text;
            }
        };

        // S8 VERIFY
        self.verify_and_correct(final_text, &mut cancel).await
    }

    /// Judge the finished turn against the anchored criteria; on failure run
    /// exactly one correction pass.  The corrected answer is returned
    /// unconditionally — re-verifying would unbound the turn.
    async fn verify_and_correct(
        &mut self,
        answer: String,
        cancel: &mut Option<&mut oneshot::Receiver<()>>,
    ) -> String {
        let Some(anchor) = self.state.verification_anchor().cloned() else {
            return answer;
        };

        let sequence = self.state.sequence_since_anchor_for_verification();
        let request = vec![Message::user(prompts::verification_prompt(
            &anchor.user_text,
            &anchor.criteria,
            &sequence,
        ))];
        let client = Arc::clone(&self.client);
        let verdict = match race_cancel(cancel, client.generate(&request, None)).await {
            // The answer is already in history; cancellation here just skips
            // the judgment.
            None => return answer,
            Some(Ok(reply)) => parse_verdict(&reply).unwrap_or_else(|| {
                warn!("unparseable verification reply; defaulting to pass");
                Verdict {
                    passes: true,
                    feedback: String::new(),
                }
            }),
            Some(Err(e)) => {
                warn!("verification call failed: {e}; defaulting to pass");
                Verdict {
                    passes: true,
                    feedback: String::new(),
                }
            }
        };

        if let Some(last_ai) = self.state.last_ai_mut() {
            last_ai.set_verification(verdict.clone());
        }

        if verdict.passes {
            return answer;
        }

        debug!(feedback = %verdict.feedback, "verification failed; requesting revision");
        self.state.append(Message::user(
            prompts::verification_failure_prompt(&verdict.feedback),
        ));
        let outbound = self.state.messages();
        let client = Arc::clone(&self.client);
        // Tool-free on purpose: a correction that announced calls would leave
        // them undispatched and break the call/result pairing.
        match race_cancel(cancel, client.generate(&outbound, None)).await {
            None => answer,
            Some(Ok(corrected)) => {
                self.state.append(Message::ai(corrected.clone()));
                corrected
            }
            Some(Err(e)) => self.model_failure(e),
        }
    }

    /// Summarize the head of the history into the system prompt.  A failed
    /// or empty summary falls back to dropping the head deterministically.
    /// Returns `None` when the turn was cancelled mid-compaction.
    async fn compact(&mut self, cancel: &mut Option<&mut oneshot::Receiver<()>>) -> Option<()> {
        let Some(head) = self.state.compaction_head() else {
            return Some(());
        };
        let history = crate::state::render_transcript(&head);
        let request = vec![Message::user(prompts::compaction_prompt(&history))];
        let client = Arc::clone(&self.client);

        let summary = match race_cancel(cancel, client.generate(&request, None)).await {
            None => return None,
            Some(Ok(s)) if !s.trim().is_empty() => Some(s),
            Some(Ok(_)) => {
                warn!("compaction returned an empty summary; keeping tail only");
                None
            }
            Some(Err(e)) => {
                warn!("compaction model call failed: {e}; keeping tail only");
                None
            }
        };
        self.state.apply_compaction(summary);
        Some(())
    }

    fn cancelled(&mut self) -> String {
        self.state.append(Message::ai(CANCELLED_TEXT));
        CANCELLED_TEXT.to_string()
    }

    /// ModelCallFailure policy: the error text becomes the assistant turn,
    /// verification is skipped, nothing propagates to the caller.
    fn model_failure(&mut self, e: ModelError) -> String {
        warn!("model call failed: {e}");
        let text = e.to_string();
        self.state.append(Message::ai(text.clone()));
        text
    }
}

/// Race a future against the optional cancellation channel.
/// `None` means the turn was cancelled before the future resolved.
async fn race_cancel<T>(
    cancel: &mut Option<&mut oneshot::Receiver<()>>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    match cancel.as_mut() {
        None => Some(fut.await),
        Some(rx) => tokio::select! {
            biased;
            // A dropped sender also resolves the receiver; both count.
            _ = &mut **rx => None,
            out = fut => Some(out),
        },
    }
}

/// Parse the evaluator's reply.  Tolerates a fenced code block around the
/// JSON but nothing looser; any other shape yields `None` (treated as pass).
fn parse_verdict(reply: &str) -> Option<Verdict> {
    let trimmed = reply.trim();
    if let Ok(v) = serde_json::from_str::<Verdict>(trimmed) {
        return Some(v);
    }
    // ```json ... ``` fencing
    let defenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = defenced {
        if let Ok(v) = serde_json::from_str::<Verdict>(inner) {
            return Some(v);
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

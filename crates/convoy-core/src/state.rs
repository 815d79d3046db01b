// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use convoy_model::Message;
use uuid::Uuid;

/// Body length at which compaction triggers.
pub const COMPACTION_TRIGGER_LEN: usize = 14;
/// How many trailing messages survive a compaction verbatim.
pub const COMPACTION_KEEP_RECENT: usize = 10;

/// The triple fixed at the first user turn of a conversation, scoping the
/// evaluator's view for every later verification pass.
#[derive(Debug, Clone)]
pub struct VerificationAnchor {
    pub user_text: String,
    pub criteria: String,
    /// `turn_counter` value when the anchor was set.
    pub turn_index: u64,
    /// Index into the body where the anchored turn starts.
    body_index: usize,
    /// Set once compaction summarized away the anchored region.
    compacted: bool,
}

/// In-memory conversation history.
///
/// Pure structure: no model calls happen here.  The engine drives compaction
/// and verification; the state only supplies the splits and applies results.
#[derive(Debug)]
pub struct ConversationState {
    pub id: String,
    system_prompt: Option<String>,
    body: Vec<Message>,
    turn_counter: u64,
    anchor: Option<VerificationAnchor>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            system_prompt: None,
            body: Vec::new(),
            turn_counter: 0,
            anchor: None,
        }
    }

    /// Append one message.  User messages advance the turn counter.
    pub fn append(&mut self, msg: Message) {
        if msg.is_user() {
            self.turn_counter += 1;
        }
        self.body.push(msg);
    }

    /// Install (or rewrite) the system prompt.  There is at most one; it is
    /// rebuilt from the live tool catalog every turn.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = Some(text.into());
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Drop all history.  The conversation object itself is never destroyed.
    pub fn clear(&mut self) {
        self.system_prompt = None;
        self.body.clear();
        self.turn_counter = 0;
        self.anchor = None;
    }

    /// Full message list: the system prompt (if any) prefixed to the body.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.body.len() + 1);
        if let Some(sys) = &self.system_prompt {
            out.push(Message::system(sys.clone()));
        }
        out.extend(self.body.iter().cloned());
        out
    }

    /// Non-system history only.
    pub fn body(&self) -> &[Message] {
        &self.body
    }

    pub fn turn(&self) -> u64 {
        self.turn_counter
    }

    /// Fix the verification anchor.  First call wins; later calls are ignored
    /// until `clear()` or an explicit anchor reset.
    pub fn set_verification_anchor(
        &mut self,
        user_text: impl Into<String>,
        criteria: impl Into<String>,
    ) {
        if self.anchor.is_some() {
            return;
        }
        let body_index = self
            .body
            .iter()
            .rposition(Message::is_user)
            .unwrap_or(0);
        self.anchor = Some(VerificationAnchor {
            user_text: user_text.into(),
            criteria: criteria.into(),
            turn_index: self.turn_counter,
            body_index,
            compacted: false,
        });
    }

    pub fn verification_anchor(&self) -> Option<&VerificationAnchor> {
        self.anchor.as_ref()
    }

    /// Drop the anchor (criteria are model-implicit, so a client switch
    /// invalidates them).
    pub fn clear_verification_anchor(&mut self) {
        self.anchor = None;
    }

    /// Render everything since the anchor as a labeled transcript for the
    /// evaluator.  When the anchored region was compacted away, the retained
    /// tail is rendered with an explicit note.
    pub fn sequence_since_anchor_for_verification(&self) -> String {
        let (start, note) = match &self.anchor {
            Some(a) if a.compacted => {
                (0, "[Note: earlier context was compacted into a summary; the transcript below covers the retained tail only.]\n")
            }
            Some(a) => (a.body_index.min(self.body.len()), ""),
            None => (0, ""),
        };
        format!("{note}{}", render_transcript(&self.body[start..]))
    }

    /// The most recent assistant message, if any.
    pub fn last_ai_mut(&mut self) -> Option<&mut Message> {
        self.body
            .iter_mut()
            .rev()
            .find(|m| matches!(m, Message::Ai { .. }))
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    pub fn needs_compaction(&self) -> bool {
        self.body.len() >= COMPACTION_TRIGGER_LEN
    }

    /// The head slice that a compaction pass would summarize, or `None` when
    /// the history is already compact.
    pub fn compaction_head(&self) -> Option<Vec<Message>> {
        if !self.needs_compaction() {
            return None;
        }
        let head_len = self.body.len() - COMPACTION_KEEP_RECENT;
        Some(self.body[..head_len].to_vec())
    }

    /// Replace the head with a summary (folded into the system prompt) and
    /// keep only the trailing [`COMPACTION_KEEP_RECENT`] messages.
    ///
    /// `summary = None` is the failure fallback: the head is still dropped so
    /// the history fits, but the system prompt stays untouched.
    ///
    /// The turn counter and the anchor survive; an anchor pointing into the
    /// summarized region is re-based onto the tail and marked compacted.
    pub fn apply_compaction(&mut self, summary: Option<String>) {
        if !self.needs_compaction() {
            return;
        }
        let head_len = self.body.len() - COMPACTION_KEEP_RECENT;
        self.body.drain(..head_len);

        if let Some(summary) = summary {
            let original = self.system_prompt.take().unwrap_or_default();
            self.system_prompt = Some(format!(
                "[Previous conversation summary:\n{summary}\n]\n\n{original}"
            ));
        }

        if let Some(anchor) = &mut self.anchor {
            if anchor.body_index < head_len {
                anchor.body_index = 0;
                anchor.compacted = true;
            } else {
                anchor.body_index -= head_len;
            }
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Render messages as the labeled transcript used by the evaluator and the
/// compaction prompt.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content, .. } => format!("System: {content}"),
            Message::User { content, .. } => format!("User: {content}"),
            Message::Ai { content, .. } => format!("Assistant: {content}"),
            Message::ToolResult {
                tool_name, content, ..
            } => format!("Tool ({tool_name}) Result: {content}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(n_pairs: usize) -> ConversationState {
        let mut s = ConversationState::new();
        s.set_system_prompt("base prompt");
        for i in 0..n_pairs {
            s.append(Message::user(format!("question {i}")));
            s.append(Message::ai(format!("answer {i}")));
        }
        s
    }

    #[test]
    fn new_state_is_empty() {
        let s = ConversationState::new();
        assert!(s.body().is_empty());
        assert_eq!(s.turn(), 0);
        assert!(s.verification_anchor().is_none());
    }

    #[test]
    fn states_get_unique_ids() {
        assert_ne!(ConversationState::new().id, ConversationState::new().id);
    }

    #[test]
    fn turn_counter_counts_user_messages_only() {
        let mut s = ConversationState::new();
        s.append(Message::user("a"));
        s.append(Message::ai("b"));
        s.append(Message::tool_result("c1", "t", "r"));
        s.append(Message::user("d"));
        assert_eq!(s.turn(), 2);
    }

    #[test]
    fn clear_resets_everything() {
        let mut s = seeded(2);
        s.set_verification_anchor("q", "- c");
        s.clear();
        assert!(s.body().is_empty());
        assert_eq!(s.turn(), 0);
        assert!(s.system_prompt().is_none());
        assert!(s.verification_anchor().is_none());
    }

    #[test]
    fn messages_prefixes_system_prompt() {
        let s = seeded(1);
        let msgs = s.messages();
        assert!(msgs[0].is_system());
        assert_eq!(msgs.len(), 3);
    }

    #[test]
    fn messages_without_system_prompt_is_body_only() {
        let mut s = ConversationState::new();
        s.append(Message::user("x"));
        assert_eq!(s.messages().len(), 1);
    }

    #[test]
    fn anchor_first_wins() {
        let mut s = ConversationState::new();
        s.append(Message::user("first"));
        s.set_verification_anchor("first", "- a");
        s.append(Message::user("second"));
        s.set_verification_anchor("second", "- b");
        let a = s.verification_anchor().unwrap();
        assert_eq!(a.user_text, "first");
        assert_eq!(a.turn_index, 1);
    }

    #[test]
    fn sequence_since_anchor_labels_roles() {
        let mut s = ConversationState::new();
        s.append(Message::user("say hi"));
        s.set_verification_anchor("say hi", "- greets");
        s.append(Message::ai("calling"));
        s.append(Message::tool_result("c1", "echo", "hi"));
        s.append(Message::ai("done: hi"));
        let seq = s.sequence_since_anchor_for_verification();
        assert!(seq.starts_with("User: say hi"));
        assert!(seq.contains("Assistant: calling"));
        assert!(seq.contains("Tool (echo) Result: hi"));
        assert!(seq.ends_with("Assistant: done: hi"));
    }

    #[test]
    fn sequence_excludes_messages_before_anchor() {
        let mut s = ConversationState::new();
        s.append(Message::user("old"));
        s.append(Message::ai("old reply"));
        s.append(Message::user("anchored"));
        s.set_verification_anchor("anchored", "- c");
        let seq = s.sequence_since_anchor_for_verification();
        assert!(!seq.contains("old reply"));
        assert!(seq.contains("User: anchored"));
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    #[test]
    fn compaction_triggers_at_fourteen() {
        let s = seeded(7); // 14 body messages
        assert!(s.needs_compaction());
        let s = seeded(6); // 12
        assert!(!s.needs_compaction());
    }

    #[test]
    fn compaction_head_is_everything_but_the_tail() {
        let s = seeded(8); // 16 body messages
        let head = s.compaction_head().unwrap();
        assert_eq!(head.len(), 6);
        assert_eq!(head[0].content(), "question 0");
    }

    #[test]
    fn apply_compaction_keeps_exactly_ten_and_prefixes_summary() {
        let mut s = seeded(8);
        s.apply_compaction(Some("the summary".into()));
        assert_eq!(s.body().len(), COMPACTION_KEEP_RECENT);
        let msgs = s.messages();
        assert!(msgs[0].is_system());
        assert!(msgs[0]
            .content()
            .starts_with("[Previous conversation summary:"));
        assert!(msgs[0].content().contains("the summary"));
        assert!(msgs[0].content().contains("base prompt"));
    }

    #[test]
    fn failed_compaction_keeps_tail_and_original_prompt() {
        let mut s = seeded(8);
        s.apply_compaction(None);
        assert_eq!(s.body().len(), COMPACTION_KEEP_RECENT);
        assert_eq!(s.system_prompt(), Some("base prompt"));
    }

    #[test]
    fn compaction_below_threshold_is_a_noop() {
        let mut s = seeded(5); // 10 body messages
        let before = s.body().len();
        s.apply_compaction(Some("ignored".into()));
        assert_eq!(s.body().len(), before);
        assert_eq!(s.system_prompt(), Some("base prompt"));
    }

    #[test]
    fn compaction_preserves_turn_counter() {
        let mut s = seeded(8);
        let turns = s.turn();
        s.apply_compaction(Some("sum".into()));
        assert_eq!(s.turn(), turns);
    }

    #[test]
    fn anchor_in_summarized_region_renders_tail_with_note() {
        let mut s = ConversationState::new();
        s.append(Message::user("anchored request"));
        s.set_verification_anchor("anchored request", "- c");
        for i in 0..8 {
            s.append(Message::user(format!("q{i}")));
            s.append(Message::ai(format!("a{i}")));
        }
        assert!(s.needs_compaction());
        s.apply_compaction(Some("sum".into()));
        let seq = s.sequence_since_anchor_for_verification();
        assert!(seq.starts_with("[Note: earlier context was compacted"));
        assert!(!seq.contains("anchored request"));
        // Anchor itself survives.
        assert!(s.verification_anchor().is_some());
    }

    #[test]
    fn anchor_in_tail_is_rebased() {
        let mut s = ConversationState::new();
        for i in 0..6 {
            s.append(Message::user(format!("q{i}")));
            s.append(Message::ai(format!("a{i}")));
        }
        // Anchor on the 7th user message, which lands inside the tail.
        s.append(Message::user("late request"));
        s.set_verification_anchor("late request", "- c");
        s.append(Message::ai("late reply"));
        assert!(s.needs_compaction());
        s.apply_compaction(Some("sum".into()));
        let seq = s.sequence_since_anchor_for_verification();
        assert!(seq.starts_with("User: late request"));
        assert!(seq.ends_with("Assistant: late reply"));
    }

    #[test]
    fn render_transcript_labels_all_roles() {
        let msgs = vec![
            Message::system("s"),
            Message::user("u"),
            Message::ai("a"),
            Message::tool_result("id", "grep", "out"),
        ];
        let t = render_transcript(&msgs);
        assert_eq!(t, "System: s\nUser: u\nAssistant: a\nTool (grep) Result: out");
    }
}

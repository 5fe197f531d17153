//! Per-message and per-conversation stat aggregation
//!
//! Token semantics drive the two different rules here: output tokens are
//! strictly new content on each API call and sum cleanly, while input and
//! cache tokens describe the entire context window resent on every call —
//! summing those would double-count history, so only the peak single-call
//! context is kept.

use crate::raw::{RawConversation, RawFileEdit, RawMessage, Role};

/// Aggregated stats for one visible message, including anything merged in
/// from filtered-out tool-only entries.
#[derive(Debug, Clone, Default)]
pub struct MessageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    /// File edits carried over from merged tool-only entries
    pub extra_file_edits: Vec<RawFileEdit>,
}

impl MessageStats {
    fn seed(msg: &RawMessage) -> Self {
        Self {
            input_tokens: msg.input_tokens.unwrap_or(0),
            output_tokens: msg.output_tokens.unwrap_or(0),
            cache_creation_tokens: msg.cache_creation_tokens.unwrap_or(0),
            cache_read_tokens: msg.cache_read_tokens.unwrap_or(0),
            lines_added: msg.lines_added.unwrap_or(0),
            lines_removed: msg.lines_removed.unwrap_or(0),
            extra_file_edits: Vec::new(),
        }
    }

    /// Combined context window of a single call.
    pub fn context_total(&self) -> u64 {
        self.input_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// Merge a filtered-out message's stats into this aggregate. Output
    /// tokens and line counts sum; the input/cache triplet is replaced
    /// wholesale when the merged call carried a larger context.
    fn merge(&mut self, msg: &RawMessage) {
        self.output_tokens += msg.output_tokens.unwrap_or(0);
        self.lines_added += msg.lines_added.unwrap_or(0);
        self.lines_removed += msg.lines_removed.unwrap_or(0);
        self.extra_file_edits.extend(msg.file_edits.iter().cloned());

        let other_context = msg.input_tokens.unwrap_or(0)
            + msg.cache_creation_tokens.unwrap_or(0)
            + msg.cache_read_tokens.unwrap_or(0);
        if other_context > self.context_total() {
            self.input_tokens = msg.input_tokens.unwrap_or(0);
            self.cache_creation_tokens = msg.cache_creation_tokens.unwrap_or(0);
            self.cache_read_tokens = msg.cache_read_tokens.unwrap_or(0);
        }
    }
}

/// Conversation-level rollup: peak context across visible messages, sums
/// for everything else.
#[derive(Debug, Clone, Default)]
pub struct ConversationStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
}

/// Whether a raw message survives normalization filtering.
pub fn is_visible(msg: &RawMessage) -> bool {
    !msg.is_internal && !msg.content.trim().is_empty()
}

/// Compute per-message aggregates for every visible message, keyed by raw
/// index, plus the conversation rollup.
///
/// Filtered assistant-role messages (tool-only entries, sidechain output)
/// fold backward into the nearest preceding visible assistant message.
/// Filtered user-role messages are not merged anywhere. The scan is an
/// indexed loop over the immutable message slice, so the step stays pure.
pub fn aggregate(raw: &RawConversation) -> (Vec<Option<MessageStats>>, ConversationStats) {
    let messages = &raw.messages;
    let mut per_message: Vec<Option<MessageStats>> = messages
        .iter()
        .map(|m| is_visible(m).then(|| MessageStats::seed(m)))
        .collect();

    for idx in 0..messages.len() {
        let msg = &messages[idx];
        if per_message[idx].is_some() || msg.role != Role::Assistant {
            continue;
        }
        // Nearest preceding visible assistant message absorbs this one.
        for prev in (0..idx).rev() {
            if per_message[prev].is_some() && messages[prev].role == Role::Assistant {
                if let Some(stats) = per_message[prev].as_mut() {
                    stats.merge(msg);
                }
                break;
            }
        }
    }

    let mut rollup = ConversationStats::default();
    let mut peak = 0u64;
    for stats in per_message.iter().flatten() {
        rollup.output_tokens += stats.output_tokens;
        rollup.lines_added += stats.lines_added;
        rollup.lines_removed += stats.lines_removed;
        let context = stats.context_total();
        if context > peak {
            peak = context;
            rollup.input_tokens = stats.input_tokens;
            rollup.cache_creation_tokens = stats.cache_creation_tokens;
            rollup.cache_read_tokens = stats.cache_read_tokens;
        }
    }

    (per_message, rollup)
}

/// Zero aggregates become `None` so serialization omits them.
pub fn nonzero(value: u64) -> Option<u64> {
    (value != 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{EditKind, RawFileEdit};

    fn assistant(content: &str, input: u64, output: u64) -> RawMessage {
        RawMessage {
            id: format!("m-{content}-{input}-{output}"),
            role: Role::Assistant,
            content: content.to_string(),
            input_tokens: (input != 0).then_some(input),
            output_tokens: (output != 0).then_some(output),
            ..Default::default()
        }
    }

    #[test]
    fn test_peak_vs_sum() {
        let raw = RawConversation {
            session_id: "s".into(),
            messages: vec![
                assistant("one", 100, 0),
                assistant("two", 500, 200),
                assistant("three", 600, 0),
                assistant("four", 800, 150),
            ],
            ..Default::default()
        };
        let (_, rollup) = aggregate(&raw);
        assert_eq!(rollup.input_tokens, 800);
        assert_eq!(rollup.output_tokens, 350);
    }

    #[test]
    fn test_tool_only_propagation() {
        let mut tool_only = assistant("", 0, 100);
        tool_only.file_edits.push(RawFileEdit {
            path: "a.rs".into(),
            kind: EditKind::Modify,
            lines_added: 3,
            lines_removed: 1,
            range: None,
            content: None,
        });
        let raw = RawConversation {
            session_id: "s".into(),
            messages: vec![assistant("visible", 400, 50), tool_only],
            ..Default::default()
        };
        let (per_message, rollup) = aggregate(&raw);

        assert!(per_message[1].is_none());
        let stats = per_message[0].as_ref().unwrap();
        assert_eq!(stats.output_tokens, 150);
        assert_eq!(stats.extra_file_edits.len(), 1);
        assert_eq!(rollup.output_tokens, 150);
    }

    #[test]
    fn test_merged_peak_replaces_triplet() {
        let mut tool_only = assistant("", 0, 0);
        tool_only.input_tokens = Some(300);
        tool_only.cache_read_tokens = Some(700);
        let raw = RawConversation {
            session_id: "s".into(),
            messages: vec![assistant("visible", 400, 0), tool_only],
            ..Default::default()
        };
        let (per_message, _) = aggregate(&raw);
        let stats = per_message[0].as_ref().unwrap();
        // 300 + 700 beats 400: the whole triplet comes from the merged call.
        assert_eq!(stats.input_tokens, 300);
        assert_eq!(stats.cache_read_tokens, 700);
        assert_eq!(stats.context_total(), 1000);
    }

    #[test]
    fn test_filtered_user_not_merged() {
        let mut hidden_user = RawMessage {
            id: "u1".into(),
            role: Role::User,
            content: "   ".into(),
            output_tokens: Some(999),
            ..Default::default()
        };
        hidden_user.is_internal = false;
        let raw = RawConversation {
            session_id: "s".into(),
            messages: vec![assistant("visible", 100, 10), hidden_user],
            ..Default::default()
        };
        let (per_message, rollup) = aggregate(&raw);
        assert_eq!(per_message[0].as_ref().unwrap().output_tokens, 10);
        assert_eq!(rollup.output_tokens, 10);
    }

    #[test]
    fn test_internal_message_filtered_even_with_content() {
        let mut sidechain = assistant("sidechain text", 0, 40);
        sidechain.is_internal = true;
        let raw = RawConversation {
            session_id: "s".into(),
            messages: vec![assistant("visible", 100, 10), sidechain],
            ..Default::default()
        };
        let (per_message, rollup) = aggregate(&raw);
        assert!(per_message[1].is_none());
        assert_eq!(rollup.output_tokens, 50);
    }
}

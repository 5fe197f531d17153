//! Logical-turn combination for display and export
//!
//! Sources that log one entry per API call produce runs of consecutive
//! assistant messages where a reader expects one turn. Consumers that
//! render or export a conversation collapse those runs here; storage
//! never does.

use crate::record::Message;

/// Result of combining: the merged message list plus a map from every
/// original message index to its combined-group index, used to resolve a
/// single-message reference (e.g. a search hit) to its logical turn.
#[derive(Debug, Clone)]
pub struct CombinedMessages {
    pub messages: Vec<Message>,
    pub index_map: Vec<usize>,
}

/// Merge consecutive same-role `user`/`assistant` messages into logical
/// turns. System messages never merge, even with each other.
///
/// Within a group: content joins with a blank-line separator in original
/// order; output tokens and line counts sum; the input/cache context
/// triplet comes from the member with the largest combined context; the
/// timestamp comes from the first member.
pub fn combine_messages(messages: &[Message]) -> CombinedMessages {
    let mut combined: Vec<Message> = Vec::new();
    let mut index_map: Vec<usize> = Vec::with_capacity(messages.len());

    for msg in messages {
        let mergeable = msg.role == "user" || msg.role == "assistant";
        let joins_previous = mergeable
            && combined
                .last()
                .map(|prev| prev.role == msg.role)
                .unwrap_or(false);

        if joins_previous {
            let group = combined.last_mut().expect("joins_previous implies a group");
            if !msg.content.is_empty() {
                if !group.content.is_empty() {
                    group.content.push_str("\n\n");
                }
                group.content.push_str(&msg.content);
            }
            group.output_tokens = sum_opt(group.output_tokens, msg.output_tokens);
            group.lines_added = sum_opt(group.lines_added, msg.lines_added);
            group.lines_removed = sum_opt(group.lines_removed, msg.lines_removed);

            if context_of(msg) > context_of(group) {
                group.input_tokens = msg.input_tokens;
                group.cache_creation_tokens = msg.cache_creation_tokens;
                group.cache_read_tokens = msg.cache_read_tokens;
            }
        } else {
            combined.push(msg.clone());
        }
        index_map.push(combined.len() - 1);
    }

    CombinedMessages {
        messages: combined,
        index_map,
    }
}

fn context_of(msg: &Message) -> u64 {
    msg.input_tokens.unwrap_or(0)
        + msg.cache_creation_tokens.unwrap_or(0)
        + msg.cache_read_tokens.unwrap_or(0)
}

fn sum_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

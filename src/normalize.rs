//! Raw-to-canonical normalization
//!
//! Ids are content-addressed: a conversation id is the first 32 hex
//! characters of a SHA-256 over `"<source tag>:<raw session id>"`, and
//! every child id is namespaced under it. Re-running normalization on
//! unchanged raw input yields byte-identical ids, which makes re-sync
//! idempotent — the id scheme is the idempotency key and must not change.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::raw::{FileRole, RawConversation, RawTimestamp};
use crate::record::{
    Conversation, ConversationFile, FileEdit, Message, MessageFile, NormalizedConversation,
    SourceRef, ToolCall,
};
use crate::source::SourceLocation;
use crate::stats::{self, nonzero};
use crate::workspace::{infer_workspace_root, workspace_display_name};

const UNTITLED: &str = "Untitled session";

/// Deterministic conversation id: first 32 hex chars of a 256-bit digest.
pub fn conversation_id(tag: &str, session_id: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", tag, session_id).as_bytes());
    hex::encode(digest)[..32].to_string()
}

fn edit_fingerprint(message_id: &str, position: usize, path: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", message_id, position, path).as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Parse a source-native timestamp into ISO-8601. Failures drop the field;
/// nothing is ever defaulted to "now".
pub fn normalize_timestamp(ts: &RawTimestamp) -> Option<String> {
    match ts {
        RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .map(|dt| dt.to_rfc3339()),
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .map(|dt| dt.to_rfc3339()),
    }
}

/// Normalize one raw conversation against its source location.
pub fn normalize(raw: &RawConversation, location: &SourceLocation) -> NormalizedConversation {
    let source = location.source;
    let conv_id = conversation_id(source.tag(), &raw.session_id);

    let (per_message, rollup) = stats::aggregate(raw);

    let mut messages: Vec<Message> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut message_files: Vec<MessageFile> = Vec::new();
    let mut file_edits: Vec<FileEdit> = Vec::new();
    let mut conversation_files: Vec<(String, FileRole)> = Vec::new();

    let mut first_ts: Option<String> = None;
    let mut last_ts: Option<String> = None;

    for (raw_idx, msg) in raw.messages.iter().enumerate() {
        let Some(agg) = per_message[raw_idx].as_ref() else {
            continue;
        };
        let message_index = messages.len();
        let message_id = format!("{}:{}", conv_id, msg.id);
        let timestamp = msg.timestamp.as_ref().and_then(normalize_timestamp);

        if let Some(ts) = &timestamp {
            if first_ts.is_none() {
                first_ts = Some(ts.clone());
            }
            last_ts = Some(ts.clone());
        }

        for (pos, call) in msg.tool_calls.iter().enumerate() {
            tool_calls.push(ToolCall {
                id: format!("{}:{}", message_id, pos),
                conversation_id: conv_id.clone(),
                message_id: message_id.clone(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.input.clone(),
                output: call.output.clone(),
                file_path: call.file_path.clone(),
            });
        }

        for (pos, file) in msg.files.iter().enumerate() {
            message_files.push(MessageFile {
                id: format!("{}:{}", message_id, pos),
                conversation_id: conv_id.clone(),
                message_id: message_id.clone(),
                path: file.path.clone(),
                role: file.role.as_str().to_string(),
            });
            note_conversation_file(&mut conversation_files, &file.path, file.role);
        }

        let edits = msg.file_edits.iter().chain(agg.extra_file_edits.iter());
        for (pos, edit) in edits.enumerate() {
            file_edits.push(FileEdit {
                id: format!(
                    "{}:{}:{}",
                    message_id,
                    pos,
                    edit_fingerprint(&message_id, pos, &edit.path)
                ),
                conversation_id: conv_id.clone(),
                message_id: message_id.clone(),
                path: edit.path.clone(),
                edit_type: edit.kind.as_str().to_string(),
                lines_added: edit.lines_added,
                lines_removed: edit.lines_removed,
            });
            note_conversation_file(&mut conversation_files, &edit.path, FileRole::Edited);
        }

        messages.push(Message {
            id: message_id,
            conversation_id: conv_id.clone(),
            message_index,
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
            timestamp,
            input_tokens: nonzero(agg.input_tokens),
            output_tokens: nonzero(agg.output_tokens),
            cache_creation_tokens: nonzero(agg.cache_creation_tokens),
            cache_read_tokens: nonzero(agg.cache_read_tokens),
            lines_added: nonzero(agg.lines_added),
            lines_removed: nonzero(agg.lines_removed),
        });
    }

    for file in &raw.files {
        note_conversation_file(&mut conversation_files, &file.path, file.role);
    }
    for edit in &raw.file_edits {
        note_conversation_file(&mut conversation_files, &edit.path, FileRole::Edited);
    }

    let conversation_files: Vec<ConversationFile> = conversation_files
        .into_iter()
        .enumerate()
        .map(|(pos, (path, role))| ConversationFile {
            id: format!("{}:{}", conv_id, pos),
            conversation_id: conv_id.clone(),
            path,
            role: role.as_str().to_string(),
        })
        .collect();

    let workspace_path = raw
        .workspace_path
        .clone()
        .or_else(|| location.workspace_path.clone())
        .or_else(|| {
            let paths: Vec<String> = conversation_files
                .iter()
                .map(|f| f.path.clone())
                .collect();
            infer_workspace_root(&paths)
        });
    let project_name = workspace_path
        .as_deref()
        .and_then(workspace_display_name);

    let created_at = raw
        .created_at
        .as_ref()
        .and_then(normalize_timestamp)
        .or(first_ts);
    let updated_at = raw
        .updated_at
        .as_ref()
        .and_then(normalize_timestamp)
        .or(last_ts);

    let conversation = Conversation {
        id: conv_id.clone(),
        source,
        title: raw.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
        workspace_path,
        project_name,
        git_branch: raw.git_branch.clone(),
        model: raw.model.clone(),
        mode: raw.mode.clone(),
        created_at,
        updated_at,
        message_count: messages.len(),
        total_input_tokens: nonzero(rollup.input_tokens).or(raw.total_input_tokens),
        total_output_tokens: nonzero(rollup.output_tokens).or(raw.total_output_tokens),
        total_cache_creation_tokens: nonzero(rollup.cache_creation_tokens),
        total_cache_read_tokens: nonzero(rollup.cache_read_tokens),
        total_lines_added: nonzero(rollup.lines_added).or(raw.total_lines_added),
        total_lines_removed: nonzero(rollup.lines_removed).or(raw.total_lines_removed),
        source_ref: SourceRef {
            source,
            session_id: raw.session_id.clone(),
            path: location.store_path.to_string_lossy().to_string(),
        },
    };

    NormalizedConversation {
        conversation,
        messages,
        tool_calls,
        conversation_files,
        message_files,
        file_edits,
    }
}

/// First-seen role wins when the same path recurs.
fn note_conversation_file(files: &mut Vec<(String, FileRole)>, path: &str, role: FileRole) {
    if !files.iter().any(|(p, _)| p == path) {
        files.push((path.to_string(), role));
    }
}

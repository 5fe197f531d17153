//! Canonical record set
//!
//! The normalizer's output contract. These records are the entire surface
//! handed to the storage collaborator; the pipeline never issues storage
//! writes itself. All ids are pure functions of stable source fields, so
//! re-running normalization on unchanged input yields byte-identical ids.
//!
//! Aggregate fields are `Option` and skipped during serialization when
//! absent: a field that sums to zero is omitted, distinguishing "no data"
//! from "no change".

use serde::Serialize;

use crate::source::Source;

/// One conversation plus every record scoped under it. The output of a
/// single normalization pass for a single session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConversation {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub conversation_files: Vec<ConversationFile>,
    pub message_files: Vec<MessageFile>,
    pub file_edits: Vec<FileEdit>,
}

/// Enough information to re-locate the raw session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub source: Source,
    pub session_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub source: Source,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Always the filtered message list's length
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines_added: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines_removed: Option<u64>,
    pub source_ref: SourceRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// Position within the filtered list: 0-based, contiguous
    pub message_index: usize,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// A file's role across the whole conversation (first-seen role wins).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFile {
    pub id: String,
    pub conversation_id: String,
    pub path: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFile {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub path: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEdit {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub path: String,
    pub edit_type: String,
    pub lines_added: u64,
    pub lines_removed: u64,
}

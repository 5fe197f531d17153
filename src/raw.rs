//! Source-specific intermediate representation
//!
//! Every reader produces `RawConversation`s; only the paired normalizer
//! consumes them. Nothing here is persisted — raw structures are rebuilt
//! from disk on every extraction pass.

/// One session as parsed from a source, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawConversation {
    /// Source-native session identifier
    pub session_id: String,
    pub title: Option<String>,
    /// Working directory / workspace path as recorded by the tool
    pub workspace_path: Option<String>,
    pub git_branch: Option<String>,
    pub model: Option<String>,
    /// Interaction mode where the tool distinguishes one (e.g. agent vs chat)
    pub mode: Option<String>,
    /// Source-native timestamps; ISO-normalized later
    pub created_at: Option<RawTimestamp>,
    pub updated_at: Option<RawTimestamp>,
    pub messages: Vec<RawMessage>,
    /// Session-level file list, when the source records one outside messages
    pub files: Vec<RawFile>,
    /// Session-level edits, when the source records them outside messages
    pub file_edits: Vec<RawFileEdit>,
    /// Session-level totals, when the source records them directly
    pub total_input_tokens: Option<u64>,
    pub total_output_tokens: Option<u64>,
    pub total_lines_added: Option<u64>,
    pub total_lines_removed: Option<u64>,
}

/// One message entry as parsed from a source.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// Stable id within the session: a UUID, a bubble id, or an index
    pub id: String,
    pub role: Role,
    /// Extracted text content, possibly empty
    pub content: String,
    pub timestamp: Option<RawTimestamp>,
    pub tool_calls: Vec<RawToolCall>,
    pub files: Vec<RawFile>,
    pub file_edits: Vec<RawFileEdit>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub lines_added: Option<u64>,
    pub lines_removed: Option<u64>,
    /// Background / sub-agent entry; kept for stat attribution, never
    /// surfaced as a canonical message
    pub is_internal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A timestamp as the source recorded it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// RFC 3339 / ISO-8601 style text
    Text(String),
    /// Unix epoch milliseconds
    Millis(i64),
}

#[derive(Debug, Clone)]
pub struct RawToolCall {
    pub call_id: String,
    pub tool_name: String,
    /// Serialized tool input
    pub input: String,
    pub output: Option<String>,
    pub file_path: Option<String>,
}

/// How a file entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// Read/search-oriented tool touched it
    Context,
    /// Write/patch-oriented tool touched it
    Edited,
    /// Referenced without a recognized tool
    Mentioned,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Context => "context",
            FileRole::Edited => "edited",
            FileRole::Mentioned => "mentioned",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: String,
    pub role: FileRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Create,
    Modify,
    Delete,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Create => "create",
            EditKind::Modify => "modify",
            EditKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawFileEdit {
    pub path: String,
    pub kind: EditKind,
    pub lines_added: u64,
    pub lines_removed: u64,
    /// Original line range for structured range edits: [start, end)
    pub range: Option<(u64, u64)>,
    /// Resulting file content, when the tool recorded it
    pub content: Option<String>,
}

/// Lines in a tool payload: empty string is zero lines, anything else is
/// its split-by-newline length, trailing newline or not.
pub fn count_lines(text: &str) -> u64 {
    if text.is_empty() {
        0
    } else {
        text.split('\n').count() as u64
    }
}

/// Classify a file by the tool that touched it. First-seen role wins when
/// the same path recurs, which callers enforce by inserting in order.
pub fn classify_tool(tool_name: &str) -> FileRole {
    let name = tool_name.to_ascii_lowercase();
    const READ_TOOLS: &[&str] = &["read", "list", "ls", "glob", "grep", "search", "cat", "view"];
    const WRITE_TOOLS: &[&str] = &["write", "create", "apply_patch", "applypatch", "edit", "patch"];
    if READ_TOOLS.iter().any(|t| name.contains(t)) {
        FileRole::Context
    } else if WRITE_TOOLS.iter().any(|t| name.contains(t)) {
        FileRole::Edited
    } else {
        FileRole::Mentioned
    }
}

//! Cursor session reader
//!
//! Data format: SQLite state databases under Cursor's user directory.
//! Each workspace-storage directory holds a `workspace.json` (folder URI)
//! and a `state.vscdb` whose ItemTable lists that workspace's composers.
//! Conversation content lives in the global storage `state.vscdb`, in the
//! `cursorDiskKV` key/value table: a `composerData:<id>` JSON blob per
//! session, with messages either inline in a `conversation` array (legacy
//! shape) or one `bubbleId:<composerId>:<bubbleId>` row per message.
//! Bubbles use numeric type codes: 1 = user, 2 = assistant.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{derive_title, SessionSource, Source, SourceLocation};
use crate::diff::parse_range_blob;
use crate::raw::{
    classify_tool, FileRole, RawConversation, RawFile, RawMessage, RawTimestamp, RawToolCall, Role,
};

pub struct CursorSource {
    base_path: PathBuf,
}

impl CursorSource {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            if cfg!(target_os = "macos") {
                home.join("Library/Application Support/Cursor/User")
            } else {
                home.join(".config/Cursor/User")
            }
        });
        Self { base_path }
    }

    fn workspace_storage_dir(&self) -> PathBuf {
        self.base_path.join("workspaceStorage")
    }

    fn global_db_path(&self) -> PathBuf {
        self.base_path.join("globalStorage/state.vscdb")
    }
}

// Composer index stored per workspace under ItemTable key
// 'composer.composerData'.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ComposerIndex {
    all_composers: Vec<ComposerHead>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ComposerHead {
    composer_id: String,
    name: Option<String>,
    created_at: Option<i64>,
    last_updated_at: Option<i64>,
    unified_mode: Option<String>,
}

// composerData:<id> blob in cursorDiskKV.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ComposerData {
    name: Option<String>,
    created_at: Option<i64>,
    last_updated_at: Option<i64>,
    unified_mode: Option<String>,
    conversation: Vec<Value>,
    full_conversation_headers_only: Vec<BubbleHeader>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct BubbleHeader {
    bubble_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Bubble {
    #[serde(rename = "type")]
    bubble_type: Option<i64>,
    bubble_id: Option<String>,
    text: Option<String>,
    model_type: Option<String>,
    token_count: Option<BubbleTokens>,
    tool_former_data: Option<Value>,
    timing_info: Option<TimingInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct BubbleTokens {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct TimingInfo {
    client_start_time: Option<i64>,
}

impl SessionSource for CursorSource {
    fn source(&self) -> Source {
        Source::Cursor
    }

    fn description(&self) -> &str {
        "Cursor editor"
    }

    fn detect(&self) -> bool {
        self.workspace_storage_dir().exists()
    }

    fn discover(&self) -> Result<Vec<SourceLocation>> {
        let mut locations = vec![];
        let storage = self.workspace_storage_dir();

        if !storage.exists() {
            return Ok(locations);
        }

        for entry in std::fs::read_dir(&storage)? {
            let dir = entry?.path();
            if !dir.is_dir() || !dir.join("state.vscdb").exists() {
                continue;
            }
            let workspace_path = read_workspace_folder(&dir.join("workspace.json"));
            locations.push(
                SourceLocation::new(Source::Cursor, dir).with_workspace(workspace_path),
            );
        }

        Ok(locations)
    }

    fn extract(&self, location: &SourceLocation) -> Result<Vec<RawConversation>> {
        let workspace_db = location.store_path.join("state.vscdb");
        let conn = open_readonly(&workspace_db)
            .with_context(|| format!("failed to open {}", workspace_db.display()))?;

        let Some(index) = load_composer_index(&conn) else {
            return Ok(vec![]);
        };

        // Conversation blobs moved to global storage; older installs kept
        // them in the workspace database itself.
        let global = open_readonly(&self.global_db_path()).ok();
        let blob_conn = global.as_ref().unwrap_or(&conn);

        let mut conversations = vec![];
        for head in &index.all_composers {
            match read_composer(blob_conn, head, location.workspace_path.as_deref()) {
                Some(conversation) => conversations.push(conversation),
                None => debug!(composer = %head.composer_id, "skipping composer with no content"),
            }
        }

        Ok(conversations)
    }
}

fn open_readonly(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(Into::into)
}

/// Folder URI from workspace.json, e.g. "file:///home/u/proj".
fn read_workspace_folder(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    let folder = json.get("folder")?.as_str()?;
    folder.strip_prefix("file://").map(String::from)
}

fn load_composer_index(conn: &Connection) -> Option<ComposerIndex> {
    // Values may be stored as TEXT or BLOB depending on the writer.
    let value: Vec<u8> = conn
        .query_row(
            "SELECT value FROM ItemTable WHERE key = 'composer.composerData'",
            [],
            |row| row.get(0),
        )
        .ok()?;
    serde_json::from_slice(&value).ok()
}

fn kv_get(conn: &Connection, key: &str) -> Option<String> {
    let value: Vec<u8> = conn
        .query_row(
            "SELECT value FROM cursorDiskKV WHERE key = ?",
            [key],
            |row| row.get(0),
        )
        .ok()?;
    String::from_utf8(value).ok()
}

fn read_composer(
    conn: &Connection,
    head: &ComposerHead,
    workspace: Option<&str>,
) -> Option<RawConversation> {
    let data: ComposerData = kv_get(conn, &format!("composerData:{}", head.composer_id))
        .and_then(|blob| serde_json::from_str(&blob).ok())
        .unwrap_or_default();

    // Row-per-entry shape wins over the legacy inline array: the inline
    // copy can be truncated once bubbles are split out.
    let mut bubbles: Vec<Value> = vec![];
    if !data.full_conversation_headers_only.is_empty() {
        for header in &data.full_conversation_headers_only {
            let key = format!("bubbleId:{}:{}", head.composer_id, header.bubble_id);
            if let Some(blob) = kv_get(conn, &key) {
                match serde_json::from_str::<Value>(&blob) {
                    Ok(value) => bubbles.push(value),
                    Err(_) => debug!(%key, "dropping unparseable bubble row"),
                }
            }
        }
    }
    if bubbles.is_empty() {
        bubbles = data.conversation.clone();
    }
    if bubbles.is_empty() {
        return None;
    }

    let mut conversation = RawConversation {
        session_id: head.composer_id.clone(),
        title: head.name.clone().or(data.name.clone()).filter(|t| !t.is_empty()),
        workspace_path: workspace.map(String::from),
        mode: head.unified_mode.clone().or(data.unified_mode.clone()),
        created_at: head
            .created_at
            .or(data.created_at)
            .map(RawTimestamp::Millis),
        updated_at: head
            .last_updated_at
            .or(data.last_updated_at)
            .map(RawTimestamp::Millis),
        ..Default::default()
    };
    let mut fallback_title: Option<String> = None;

    for (idx, raw_bubble) in bubbles.iter().enumerate() {
        let bubble: Bubble = match serde_json::from_value(raw_bubble.clone()) {
            Ok(b) => b,
            Err(_) => {
                debug!("dropping malformed bubble");
                continue;
            }
        };
        let Some(message) = parse_bubble(&bubble, idx, workspace) else {
            continue;
        };

        if conversation.model.is_none() {
            conversation.model = bubble.model_type.clone().filter(|m| !m.is_empty());
        }
        if fallback_title.is_none()
            && message.role == Role::User
            && !message.content.trim().is_empty()
        {
            fallback_title = Some(derive_title(&message.content));
        }

        conversation.messages.push(message);
    }

    if conversation.messages.is_empty() {
        return None;
    }
    if conversation.title.is_none() {
        conversation.title = fallback_title;
    }

    Some(conversation)
}

fn parse_bubble(bubble: &Bubble, idx: usize, workspace: Option<&str>) -> Option<RawMessage> {
    // Numeric type codes; anything but user/assistant is dropped.
    let role = match bubble.bubble_type {
        Some(1) => Role::User,
        Some(2) => Role::Assistant,
        _ => return None,
    };

    let mut message = RawMessage {
        id: bubble
            .bubble_id
            .clone()
            .unwrap_or_else(|| idx.to_string()),
        role,
        content: bubble.text.clone().unwrap_or_default(),
        timestamp: bubble
            .timing_info
            .as_ref()
            .and_then(|t| t.client_start_time)
            .map(RawTimestamp::Millis),
        ..Default::default()
    };

    if let Some(tokens) = &bubble.token_count {
        message.input_tokens = tokens.input_tokens.filter(|t| *t != 0);
        message.output_tokens = tokens.output_tokens.filter(|t| *t != 0);
    }

    if let Some(tool_data) = &bubble.tool_former_data {
        parse_tool_former(tool_data, workspace, &mut message);
    }

    Some(message)
}

/// Tool invocations ride on assistant bubbles as `toolFormerData`:
/// a tool name, JSON-encoded args, and a JSON-encoded result that may
/// carry structured line-range diff blobs.
fn parse_tool_former(tool_data: &Value, workspace: Option<&str>, message: &mut RawMessage) {
    let tool_name = tool_data
        .get("name")
        .and_then(|v| v.as_str())
        .or_else(|| tool_data.get("tool").and_then(|v| v.as_str()))
        .unwrap_or("unknown")
        .to_string();
    let raw_args = tool_data
        .get("rawArgs")
        .and_then(|v| v.as_str())
        .or_else(|| tool_data.get("params").and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();
    let result_text = tool_data
        .get("result")
        .and_then(|v| v.as_str())
        .map(String::from);

    let args: Option<Value> = serde_json::from_str(&raw_args).ok();
    let file_path = args.as_ref().and_then(|a| tool_arg_path(a, workspace));

    message.tool_calls.push(RawToolCall {
        call_id: tool_data
            .get("toolCallId")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_name: tool_name.clone(),
        input: raw_args,
        output: result_text.clone(),
        file_path: file_path.clone(),
    });

    if let Some(path) = &file_path {
        let role = classify_tool(&tool_name);
        if !message.files.iter().any(|f| f.path == *path) {
            message.files.push(RawFile {
                path: path.clone(),
                role,
            });
        }

        if role == FileRole::Edited {
            if let Some(result) = result_text
                .as_deref()
                .and_then(|r| serde_json::from_str::<Value>(r).ok())
            {
                for blob in diff_blobs(&result) {
                    // Malformed blobs skipped one by one.
                    if let Some(edit) = parse_range_blob(path, blob) {
                        message.file_edits.push(edit);
                    }
                }
            }
        }
    }
}

/// Diff blobs sit either directly in the result, under a `diff` object,
/// or as a `diff` array.
fn diff_blobs(result: &Value) -> Vec<&Value> {
    match result.get("diff") {
        Some(Value::Array(blobs)) => blobs.iter().collect(),
        Some(blob @ Value::Object(_)) => vec![blob],
        _ => {
            if result.get("original").is_some() {
                vec![result]
            } else {
                vec![]
            }
        }
    }
}

fn tool_arg_path(args: &Value, workspace: Option<&str>) -> Option<String> {
    for key in ["relativeWorkspacePath", "targetFile", "path", "file_path", "fileName"] {
        if let Some(path) = args.get(key).and_then(|v| v.as_str()) {
            if path.starts_with('/') {
                return Some(path.to_string());
            }
            return match workspace {
                Some(ws) => Some(format!("{}/{}", ws.trim_end_matches('/'), path)),
                None => Some(path.to_string()),
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::EditKind;
    use serde_json::json;

    fn setup_db(dir: &Path, composers: Value, blobs: &[(String, Value)]) -> Connection {
        let path = dir.join("state.vscdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE cursorDiskKV (key TEXT PRIMARY KEY, value TEXT);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES ('composer.composerData', ?)",
            [composers.to_string().into_bytes()],
        )
        .unwrap();
        for (key, value) in blobs {
            conn.execute(
                "INSERT INTO cursorDiskKV (key, value) VALUES (?, ?)",
                rusqlite::params![key.as_str(), value.to_string().into_bytes()],
            )
            .unwrap();
        }
        conn
    }

    fn head(id: &str, name: &str) -> Value {
        json!({
            "composerId": id,
            "name": name,
            "createdAt": 1_750_000_000_000i64,
            "lastUpdatedAt": 1_750_000_600_000i64,
            "unifiedMode": "agent"
        })
    }

    fn composer_head(id: &str, name: &str) -> ComposerHead {
        serde_json::from_value(head(id, name)).unwrap()
    }

    #[test]
    fn test_inline_conversation_shape() {
        let dir = tempfile::tempdir().unwrap();
        let blob = json!({
            "composerId": "c1",
            "conversation": [
                { "type": 1, "bubbleId": "b1", "text": "make it faster" },
                { "type": 2, "bubbleId": "b2", "text": "done",
                  "tokenCount": { "inputTokens": 900, "outputTokens": 40 } },
                { "type": 99, "bubbleId": "b3", "text": "checkpoint noise" }
            ]
        });
        let conn = setup_db(
            dir.path(),
            json!({ "allComposers": [head("c1", "Speed work")] }),
            &[("composerData:c1".to_string(), blob)],
        );

        let conv = read_composer(&conn, &composer_head("c1", "Speed work"), Some("/home/u/proj"))
            .unwrap();
        assert_eq!(conv.session_id, "c1");
        assert_eq!(conv.title.as_deref(), Some("Speed work"));
        assert_eq!(conv.mode.as_deref(), Some("agent"));
        // The unknown numeric type code was dropped.
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].input_tokens, Some(900));
        assert_eq!(conv.created_at, Some(RawTimestamp::Millis(1_750_000_000_000)));
    }

    #[test]
    fn test_bubble_rows_preferred_over_inline() {
        let dir = tempfile::tempdir().unwrap();
        let blob = json!({
            "composerId": "c1",
            "conversation": [
                { "type": 1, "bubbleId": "stale", "text": "stale inline copy" }
            ],
            "fullConversationHeadersOnly": [
                { "bubbleId": "b1" },
                { "bubbleId": "b2" }
            ]
        });
        let conn = setup_db(
            dir.path(),
            json!({ "allComposers": [head("c1", "")] }),
            &[
                ("composerData:c1".to_string(), blob),
                (
                    "bubbleId:c1:b1".to_string(),
                    json!({ "type": 1, "bubbleId": "b1", "text": "row one" }),
                ),
                (
                    "bubbleId:c1:b2".to_string(),
                    json!({ "type": 2, "bubbleId": "b2", "text": "row two" }),
                ),
            ],
        );

        let conv = read_composer(&conn, &composer_head("c1", ""), None).unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].content, "row one");
        assert_eq!(conv.title.as_deref(), Some("row one"));
    }

    #[test]
    fn test_tool_former_range_diff() {
        let dir = tempfile::tempdir().unwrap();
        let result = json!({
            "diff": [{
                "original": { "startLineNumber": 4, "endLineNumberExclusive": 6 },
                "modified": ["x", "y", "z"]
            }]
        });
        let blob = json!({
            "composerId": "c1",
            "conversation": [
                { "type": 2, "bubbleId": "b1", "text": "editing",
                  "toolFormerData": {
                      "name": "edit_file",
                      "toolCallId": "tc1",
                      "rawArgs": json!({ "relativeWorkspacePath": "src/main.rs" }).to_string(),
                      "result": result.to_string()
                  } }
            ]
        });
        let conn = setup_db(
            dir.path(),
            json!({ "allComposers": [head("c1", "t")] }),
            &[("composerData:c1".to_string(), blob)],
        );

        let conv = read_composer(&conn, &composer_head("c1", "t"), Some("/home/u/proj"))
            .unwrap();
        let msg = &conv.messages[0];
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.files[0].path, "/home/u/proj/src/main.rs");
        assert_eq!(msg.files[0].role, FileRole::Edited);
        let edit = &msg.file_edits[0];
        assert_eq!(edit.kind, EditKind::Modify);
        assert_eq!(edit.lines_removed, 2);
        assert_eq!(edit.lines_added, 3);
    }

    #[test]
    fn test_malformed_diff_blob_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let blob = json!({
            "composerId": "c1",
            "conversation": [
                { "type": 2, "bubbleId": "b1", "text": "editing",
                  "toolFormerData": {
                      "name": "edit_file",
                      "rawArgs": json!({ "relativeWorkspacePath": "a.rs" }).to_string(),
                      "result": "{\"diff\": [{\"broken\": true}]}"
                  } }
            ]
        });
        let conn = setup_db(
            dir.path(),
            json!({ "allComposers": [head("c1", "t")] }),
            &[("composerData:c1".to_string(), blob)],
        );
        let conv = read_composer(&conn, &composer_head("c1", "t"), None).unwrap();
        // The edit is gone but the message and tool call survive.
        assert!(conv.messages[0].file_edits.is_empty());
        assert_eq!(conv.messages[0].tool_calls.len(), 1);
    }

    #[test]
    fn test_missing_blob_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let conn = setup_db(
            dir.path(),
            json!({ "allComposers": [head("ghost", "g")] }),
            &[],
        );
        assert!(read_composer(&conn, &composer_head("ghost", "g"), None).is_none());
    }

    #[test]
    fn test_read_workspace_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        std::fs::write(&path, r#"{"folder": "file:///home/u/proj"}"#).unwrap();
        assert_eq!(
            read_workspace_folder(&path).as_deref(),
            Some("/home/u/proj")
        );
        assert_eq!(read_workspace_folder(&dir.path().join("missing.json")), None);
    }
}

//! Gemini CLI session reader
//!
//! Data format: one JSON document per session at
//! ~/.gemini/tmp/<project_hash>/chats/session-*.json. The project hash is
//! opaque, so no workspace path is available here; the normalizer infers
//! one from referenced file paths when it can.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{derive_title, SessionSource, Source, SourceLocation};
use crate::raw::{
    classify_tool, RawConversation, RawFile, RawMessage, RawTimestamp, RawToolCall, Role,
};

pub struct GeminiSource {
    base_path: PathBuf,
}

impl GeminiSource {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".gemini/tmp")
        });
        Self { base_path }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GeminiSession {
    session_id: String,
    start_time: Option<String>,
    last_updated: Option<String>,
    messages: Vec<GeminiMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GeminiMessage {
    id: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    message_type: Option<String>,
    content: Option<String>,
    model: Option<String>,
    tokens: Option<GeminiTokens>,
    tool_calls: Vec<GeminiToolCall>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GeminiTokens {
    input: Option<u64>,
    output: Option<u64>,
    cached: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GeminiToolCall {
    id: Option<String>,
    name: Option<String>,
    args: Option<Value>,
    result: Option<String>,
}

impl SessionSource for GeminiSource {
    fn source(&self) -> Source {
        Source::Gemini
    }

    fn description(&self) -> &str {
        "Gemini CLI"
    }

    fn detect(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SourceLocation>> {
        let mut locations = vec![];

        if !self.base_path.exists() {
            return Ok(locations);
        }

        for entry in fs::read_dir(&self.base_path)? {
            let dir = entry?.path();
            let chats = dir.join("chats");
            if chats.is_dir() {
                locations.push(SourceLocation::new(Source::Gemini, chats));
            }
        }

        Ok(locations)
    }

    fn extract(&self, location: &SourceLocation) -> Result<Vec<RawConversation>> {
        let mut conversations = vec![];

        let entries = fs::read_dir(&location.store_path)
            .with_context(|| format!("failed to read {}", location.store_path.display()))?;

        for file_entry in entries {
            let file_path = file_entry?.path();
            let is_session = file_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("session-") && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_session {
                continue;
            }
            if let Some(conversation) = read_chat(&file_path) {
                conversations.push(conversation);
            }
        }

        Ok(conversations)
    }
}

fn read_chat(path: &Path) -> Option<RawConversation> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!(path = %path.display(), "chat file unreadable, treating as empty");
            return None;
        }
    };
    let session: GeminiSession = match serde_json::from_str(&content) {
        Ok(s) => s,
        Err(_) => {
            debug!(path = %path.display(), "dropping unparseable chat file");
            return None;
        }
    };
    if session.messages.is_empty() {
        return None;
    }

    let session_id = if session.session_id.is_empty() {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    } else {
        session.session_id.clone()
    };

    let mut conversation = RawConversation {
        session_id,
        created_at: session.start_time.clone().map(RawTimestamp::Text),
        updated_at: session.last_updated.clone().map(RawTimestamp::Text),
        ..Default::default()
    };
    let mut fallback_title: Option<String> = None;

    for (idx, msg) in session.messages.iter().enumerate() {
        let role = match msg.message_type.as_deref() {
            Some("user") => Role::User,
            Some("gemini") | Some("assistant") => Role::Assistant,
            _ => continue,
        };

        let mut message = RawMessage {
            id: msg.id.clone().unwrap_or_else(|| idx.to_string()),
            role,
            content: msg.content.clone().unwrap_or_default(),
            timestamp: msg.timestamp.clone().map(RawTimestamp::Text),
            ..Default::default()
        };

        if let Some(tokens) = &msg.tokens {
            message.input_tokens = tokens.input.filter(|t| *t != 0);
            message.output_tokens = tokens.output.filter(|t| *t != 0);
            message.cache_read_tokens = tokens.cached.filter(|t| *t != 0);
        }

        for (call_idx, call) in msg.tool_calls.iter().enumerate() {
            let tool_name = call.name.clone().unwrap_or_else(|| "unknown".to_string());
            let file_path = call
                .args
                .as_ref()
                .and_then(|a| {
                    ["file_path", "path", "absolute_path"]
                        .iter()
                        .find_map(|k| a.get(k).and_then(|v| v.as_str()))
                })
                .map(String::from);

            if let Some(path) = &file_path {
                if !message.files.iter().any(|f| f.path == *path) {
                    message.files.push(RawFile {
                        path: path.clone(),
                        role: classify_tool(&tool_name),
                    });
                }
            }

            message.tool_calls.push(RawToolCall {
                call_id: call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}-{}", message.id, call_idx)),
                tool_name,
                input: call
                    .args
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                output: call.result.clone(),
                file_path,
            });
        }

        if conversation.model.is_none() {
            conversation.model = msg.model.clone().filter(|m| !m.is_empty());
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
    conversation.title = fallback_title;

    Some(conversation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::FileRole;
    use serde_json::json;

    fn write_chat(dir: &Path, name: &str, body: &Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[test]
    fn test_basic_chat() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_chat(
            dir.path(),
            "session-1.json",
            &json!({
                "sessionId": "g-123",
                "startTime": "2026-05-01T08:00:00Z",
                "lastUpdated": "2026-05-01T08:30:00Z",
                "messages": [
                    { "id": "m1", "type": "user", "content": "summarize the repo",
                      "timestamp": "2026-05-01T08:00:00Z" },
                    { "id": "m2", "type": "gemini", "content": "sure",
                      "model": "gemini-2.5-pro",
                      "tokens": { "input": 500, "output": 30, "cached": 100 } }
                ]
            }),
        );
        let conv = read_chat(&path).unwrap();
        assert_eq!(conv.session_id, "g-123");
        assert_eq!(conv.title.as_deref(), Some("summarize the repo"));
        assert_eq!(conv.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(conv.messages[1].input_tokens, Some(500));
        assert_eq!(conv.messages[1].cache_read_tokens, Some(100));
    }

    #[test]
    fn test_tool_call_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_chat(
            dir.path(),
            "session-1.json",
            &json!({
                "sessionId": "g-1",
                "messages": [
                    { "id": "m1", "type": "gemini", "content": "reading",
                      "toolCalls": [
                          { "id": "t1", "name": "read_file",
                            "args": { "absolute_path": "/home/u/proj/src/a.rs" },
                            "result": "contents" }
                      ] }
                ]
            }),
        );
        let conv = read_chat(&path).unwrap();
        let msg = &conv.messages[0];
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.files[0].path, "/home/u/proj/src/a.rs");
        assert_eq!(msg.files[0].role, FileRole::Context);
    }

    #[test]
    fn test_unparseable_chat_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-1.json");
        fs::write(&path, "{ truncated").unwrap();
        assert!(read_chat(&path).is_none());
    }

    #[test]
    fn test_unknown_message_types_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_chat(
            dir.path(),
            "session-1.json",
            &json!({
                "sessionId": "g-1",
                "messages": [
                    { "id": "m1", "type": "info", "content": "banner" }
                ]
            }),
        );
        assert!(read_chat(&path).is_none());
    }
}

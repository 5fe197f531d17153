//! Claude Code session reader
//!
//! Data format: JSONL files in ~/.claude/projects/<project_dir>/<session_id>.jsonl
//! with one JSON event per line (discriminant `type` field, nested
//! message/usage objects). Sub-agent activity lands in sidecar files under
//! a sibling directory named after the session id; sidecar entries carry
//! the same session id and are merged into the main log.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{derive_title, SessionSource, Source, SourceLocation};
use crate::raw::{
    classify_tool, count_lines, EditKind, FileRole, RawConversation, RawFile, RawFileEdit,
    RawMessage, RawTimestamp, RawToolCall, Role,
};

pub struct ClaudeCodeSource {
    base_path: PathBuf,
}

impl ClaudeCodeSource {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        Self { base_path }
    }
}

impl SessionSource for ClaudeCodeSource {
    fn source(&self) -> Source {
        Source::ClaudeCode
    }

    fn description(&self) -> &str {
        "Claude Code CLI"
    }

    fn detect(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SourceLocation>> {
        let mut locations = vec![];

        if !self.base_path.exists() {
            return Ok(locations);
        }

        for project_entry in std::fs::read_dir(&self.base_path)? {
            let project_dir = project_entry?.path();
            if !project_dir.is_dir() {
                continue;
            }
            locations.push(SourceLocation::new(Source::ClaudeCode, project_dir));
        }

        Ok(locations)
    }

    fn extract(&self, location: &SourceLocation) -> Result<Vec<RawConversation>> {
        let mut conversations = vec![];

        let entries = std::fs::read_dir(&location.store_path)
            .with_context(|| format!("failed to read {}", location.store_path.display()))?;

        for file_entry in entries {
            let file_path = file_entry?.path();
            if !file_path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                continue;
            }
            let session_id = file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();

            if let Some(conversation) = read_session(&file_path, &session_id) {
                conversations.push(conversation);
            }
        }

        Ok(conversations)
    }
}

/// Parse one session: the main log plus any sidecar files, merged,
/// deduplicated by entry uuid and sorted by timestamp. Returns `None`
/// when nothing parseable survives.
fn read_session(main_path: &Path, session_id: &str) -> Option<RawConversation> {
    let mut entries = parse_jsonl(main_path);

    // Sidecar logs: <project>/<session_id>/*.jsonl
    let sidecar_dir = main_path.with_extension("");
    if sidecar_dir.is_dir() {
        if let Ok(dir) = std::fs::read_dir(&sidecar_dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                    entries.extend(parse_jsonl(&path));
                }
            }
        }
    }

    if entries.is_empty() {
        return None;
    }

    // First occurrence wins when the same uuid shows up in both the main
    // log and a sidecar.
    let mut seen: HashMap<String, ()> = HashMap::new();
    entries.retain(|e| match e.get("uuid").and_then(|v| v.as_str()) {
        Some(uuid) => seen.insert(uuid.to_string(), ()).is_none(),
        None => true,
    });

    // Stable sort by timestamp; ties keep original order. An entry with
    // no timestamp inherits its predecessor's key so it stays in place.
    let mut last_ts = String::new();
    let mut keyed: Vec<(String, Value)> = entries
        .into_iter()
        .map(|e| {
            if let Some(ts) = e.get("timestamp").and_then(|v| v.as_str()) {
                last_ts = ts.to_string();
            }
            (last_ts.clone(), e)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    let entries: Vec<Value> = keyed.into_iter().map(|(_, e)| e).collect();

    // Results can land on an earlier line than their call, so the map is
    // built over all entries before any content is reconstructed.
    let results = collect_tool_results(&entries);

    let mut conversation = RawConversation {
        session_id: session_id.to_string(),
        ..Default::default()
    };
    let mut fallback_title: Option<String> = None;

    for (idx, entry) in entries.iter().enumerate() {
        let entry_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");

        if entry_type == "summary" {
            if conversation.title.is_none() {
                conversation.title = entry
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            continue;
        }

        if conversation.workspace_path.is_none() {
            conversation.workspace_path =
                entry.get("cwd").and_then(|v| v.as_str()).map(String::from);
        }
        if conversation.git_branch.is_none() {
            conversation.git_branch = entry
                .get("gitBranch")
                .and_then(|v| v.as_str())
                .filter(|b| !b.is_empty())
                .map(String::from);
        }
        if conversation.model.is_none() {
            conversation.model = entry
                .pointer("/message/model")
                .and_then(|v| v.as_str())
                .map(String::from);
        }

        let Some(message) = parse_entry(entry, idx, &results) else {
            continue;
        };

        if fallback_title.is_none()
            && message.role == Role::User
            && !message.is_internal
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

/// Parse a JSONL file, silently dropping lines that fail to parse.
fn parse_jsonl(path: &Path) -> Vec<Value> {
    let Ok(file) = File::open(path) else {
        debug!(path = %path.display(), "session file unreadable, treating as empty");
        return vec![];
    };
    let reader = BufReader::new(file);
    let mut entries = vec![];
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(value) => entries.push(value),
            Err(_) => debug!(path = %path.display(), "dropping unparseable line"),
        }
    }
    entries
}

/// Map tool_use id to result text across the whole session.
fn collect_tool_results(entries: &[Value]) -> HashMap<String, String> {
    let mut results = HashMap::new();
    for entry in entries {
        let Some(blocks) = entry.pointer("/message/content").and_then(|c| c.as_array()) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                continue;
            }
            let Some(id) = block.get("tool_use_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let text = match block.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            results.entry(id.to_string()).or_insert(text);
        }
    }
    results
}

fn parse_entry(
    entry: &Value,
    idx: usize,
    results: &HashMap<String, String>,
) -> Option<RawMessage> {
    let entry_type = entry.get("type").and_then(|v| v.as_str())?;
    let timestamp = entry
        .get("timestamp")
        .and_then(|v| v.as_str())
        .map(|s| RawTimestamp::Text(s.to_string()));
    let is_sidechain = entry
        .get("isSidechain")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let id = entry
        .get("uuid")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| idx.to_string());

    let mut message = RawMessage {
        id,
        timestamp,
        is_internal: is_sidechain,
        ..Default::default()
    };

    match entry_type {
        "system" => {
            message.role = Role::System;
            message.content = entry
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let is_meta = entry.get("isMeta").and_then(|v| v.as_bool()).unwrap_or(false);
            message.is_internal = message.is_internal || is_meta;
        }
        "user" => {
            message.role = Role::User;
            message.content = extract_user_text(entry.pointer("/message/content"));
        }
        "assistant" => {
            message.role = Role::Assistant;
            extract_assistant(entry, &mut message, results);
            if let Some(usage) = entry.pointer("/message/usage") {
                message.input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64());
                message.output_tokens = usage.get("output_tokens").and_then(|v| v.as_u64());
                message.cache_creation_tokens = usage
                    .get("cache_creation_input_tokens")
                    .and_then(|v| v.as_u64());
                message.cache_read_tokens = usage
                    .get("cache_read_input_tokens")
                    .and_then(|v| v.as_u64());
            }
        }
        _ => return None,
    }

    Some(message)
}

/// User content: plain text only. Tool results riding on user entries are
/// plumbing, not something the user typed.
fn extract_user_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    }
}

/// Assistant content: text segments verbatim, tool invocations replaced
/// in place by a formatted block when a matching result exists. Unmatched
/// invocations add no text but are still recorded as tool calls.
fn extract_assistant(entry: &Value, message: &mut RawMessage, results: &HashMap<String, String>) {
    let Some(blocks) = entry.pointer("/message/content").and_then(|c| c.as_array()) else {
        if let Some(text) = entry.pointer("/message/content").and_then(|c| c.as_str()) {
            message.content = text.to_string();
        }
        return;
    };

    let mut parts: Vec<String> = vec![];
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    parts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let call_id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let tool_name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                let file_path = tool_file_path(&input);
                let output = results.get(&call_id).cloned();

                if let Some(output) = &output {
                    parts.push(render_tool_block(&tool_name, file_path.as_deref(), output));
                }

                record_tool_call(message, &call_id, &tool_name, &input, output, file_path);
            }
            _ => {}
        }
    }
    message.content = parts.join("\n\n");
}

fn render_tool_block(tool_name: &str, file_path: Option<&str>, output: &str) -> String {
    let file_name = file_path
        .and_then(|p| Path::new(p).file_name())
        .and_then(|n| n.to_str());
    let header = match file_name {
        Some(name) => format!("[Tool: {} ({})]", tool_name, name),
        None => format!("[Tool: {}]", tool_name),
    };
    format!("{}\n```\n{}\n```", header, output)
}

fn record_tool_call(
    message: &mut RawMessage,
    call_id: &str,
    tool_name: &str,
    input: &Value,
    output: Option<String>,
    file_path: Option<String>,
) {
    message.tool_calls.push(RawToolCall {
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        input: serde_json::to_string(input).unwrap_or_default(),
        output,
        file_path: file_path.clone(),
    });

    if let Some(path) = &file_path {
        let role = classify_tool(tool_name);
        if !message.files.iter().any(|f| f.path == *path) {
            message.files.push(RawFile {
                path: path.clone(),
                role,
            });
        }
        if role == FileRole::Edited {
            if let Some(edit) = extract_file_edit(tool_name, path, input) {
                message.file_edits.push(edit);
            }
        }
    }
}

/// File paths hide under a few different input keys depending on the tool.
fn tool_file_path(input: &Value) -> Option<String> {
    for key in ["file_path", "path", "notebook_path"] {
        if let Some(path) = input.get(key).and_then(|v| v.as_str()) {
            return Some(path.to_string());
        }
    }
    None
}

fn extract_file_edit(tool_name: &str, path: &str, input: &Value) -> Option<RawFileEdit> {
    let name = tool_name.to_ascii_lowercase();
    if name.contains("write") || name.contains("create") {
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        return Some(RawFileEdit {
            path: path.to_string(),
            kind: EditKind::Create,
            lines_added: count_lines(content),
            lines_removed: 0,
            range: None,
            content: Some(content.to_string()),
        });
    }
    if name.contains("edit") {
        // MultiEdit carries an edits array; plain Edit a single pair.
        if let Some(edits) = input.get("edits").and_then(|v| v.as_array()) {
            let mut added = 0;
            let mut removed = 0;
            for edit in edits {
                removed += count_lines(edit.get("old_string").and_then(|v| v.as_str()).unwrap_or(""));
                added += count_lines(edit.get("new_string").and_then(|v| v.as_str()).unwrap_or(""));
            }
            return Some(RawFileEdit {
                path: path.to_string(),
                kind: EditKind::Modify,
                lines_added: added,
                lines_removed: removed,
                range: None,
                content: None,
            });
        }
        let old = input.get("old_string").and_then(|v| v.as_str()).unwrap_or("");
        let new = input.get("new_string").and_then(|v| v.as_str()).unwrap_or("");
        return Some(RawFileEdit {
            path: path.to_string(),
            kind: EditKind::Modify,
            lines_added: count_lines(new),
            lines_removed: count_lines(old),
            range: None,
            content: None,
        });
    }
    None
}

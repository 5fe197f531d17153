//! Codex CLI session reader
//!
//! Data format: rollout files at ~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl.
//! Each line is an envelope {timestamp, type, payload}: session_meta
//! carries the session id and cwd, turn_context the model, response_item
//! the messages and function calls, event_msg the token counters. Patches
//! arrive as apply_patch calls whose argument is a multi-file textual
//! patch document.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{derive_title, SessionSource, Source, SourceLocation};
use crate::diff::parse_patch;
use crate::raw::{FileRole, RawConversation, RawFile, RawMessage, RawTimestamp, RawToolCall, Role};

pub struct CodexSource {
    base_path: PathBuf,
}

impl CodexSource {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".codex/sessions")
        });
        Self { base_path }
    }
}

impl SessionSource for CodexSource {
    fn source(&self) -> Source {
        Source::Codex
    }

    fn description(&self) -> &str {
        "Codex CLI"
    }

    fn detect(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SourceLocation>> {
        let mut locations = vec![];

        if !self.base_path.exists() {
            return Ok(locations);
        }

        // Sessions are filed under YYYY/MM/DD; one location per day.
        for entry in WalkDir::new(&self.base_path)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                locations.push(SourceLocation::new(
                    Source::Codex,
                    entry.path().to_path_buf(),
                ));
            }
        }

        Ok(locations)
    }

    fn extract(&self, location: &SourceLocation) -> Result<Vec<RawConversation>> {
        let mut conversations = vec![];

        let entries = std::fs::read_dir(&location.store_path)
            .with_context(|| format!("failed to read {}", location.store_path.display()))?;

        for file_entry in entries {
            let file_path = file_entry?.path();
            let is_rollout = file_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("rollout-") && n.ends_with(".jsonl"))
                .unwrap_or(false);
            if !is_rollout {
                continue;
            }
            if let Some(conversation) = read_rollout(&file_path) {
                conversations.push(conversation);
            }
        }

        Ok(conversations)
    }
}

fn read_rollout(path: &Path) -> Option<RawConversation> {
    let Ok(file) = File::open(path) else {
        debug!(path = %path.display(), "rollout unreadable, treating as empty");
        return None;
    };
    let reader = BufReader::new(file);

    let mut entries: Vec<Value> = vec![];
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
    if entries.is_empty() {
        return None;
    }

    // Output rows can precede their call row after retries; match by
    // call id over the whole file before building content.
    let outputs = collect_call_outputs(&entries);

    let mut conversation = RawConversation {
        session_id: path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string(),
        ..Default::default()
    };
    let mut fallback_title: Option<String> = None;

    for (idx, entry) in entries.iter().enumerate() {
        let entry_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let payload = entry.get("payload").unwrap_or(&Value::Null);
        let timestamp = entry
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(|s| RawTimestamp::Text(s.to_string()));

        match entry_type {
            "session_meta" => {
                if let Some(id) = payload.get("id").and_then(|v| v.as_str()) {
                    conversation.session_id = id.to_string();
                }
                if conversation.workspace_path.is_none() {
                    conversation.workspace_path = payload
                        .get("cwd")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
                if conversation.git_branch.is_none() {
                    conversation.git_branch = payload
                        .pointer("/git/branch")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
                if conversation.created_at.is_none() {
                    conversation.created_at = timestamp.clone();
                }
            }
            "turn_context" => {
                if conversation.model.is_none() {
                    conversation.model = payload
                        .get("model")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
                if conversation.workspace_path.is_none() {
                    conversation.workspace_path = payload
                        .get("cwd")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
            }
            "response_item" => {
                if let Some(message) = parse_response_item(payload, idx, timestamp, &outputs) {
                    if fallback_title.is_none()
                        && message.role == Role::User
                        && !message.is_internal
                        && !message.content.trim().is_empty()
                    {
                        fallback_title = Some(derive_title(&message.content));
                    }
                    conversation.messages.push(message);
                }
            }
            "event_msg" => {
                if payload.get("type").and_then(|v| v.as_str()) == Some("token_count") {
                    apply_token_count(payload, &mut conversation.messages);
                }
            }
            _ => {}
        }
    }

    if conversation.messages.is_empty() {
        return None;
    }
    if conversation.title.is_none() {
        conversation.title = fallback_title;
    }
    conversation.updated_at = conversation
        .messages
        .iter()
        .rev()
        .find_map(|m| m.timestamp.clone());

    Some(conversation)
}

fn collect_call_outputs(entries: &[Value]) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    for entry in entries {
        let payload = entry.get("payload").unwrap_or(&Value::Null);
        if payload.get("type").and_then(|v| v.as_str()) != Some("function_call_output") {
            continue;
        }
        let Some(call_id) = payload.get("call_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let text = match payload.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(obj)) => obj
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        outputs.entry(call_id.to_string()).or_insert(text);
    }
    outputs
}

fn parse_response_item(
    payload: &Value,
    idx: usize,
    timestamp: Option<RawTimestamp>,
    outputs: &HashMap<String, String>,
) -> Option<RawMessage> {
    let item_type = payload.get("type").and_then(|v| v.as_str())?;

    match item_type {
        "message" => {
            let role = match payload.get("role").and_then(|v| v.as_str()) {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                Some("system") => Role::System,
                _ => return None,
            };
            let content = extract_item_text(payload.get("content"));
            // Injected context wrappers are plumbing, not user input.
            let is_internal = role == Role::User
                && (content.starts_with("<environment_context>")
                    || content.starts_with("<user_instructions>"));
            Some(RawMessage {
                id: idx.to_string(),
                role,
                content,
                timestamp,
                is_internal,
                ..Default::default()
            })
        }
        "function_call" => {
            let name = payload
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let arguments = payload
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let call_id = payload
                .get("call_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let output = outputs.get(&call_id).cloned();

            // A tool-only entry: no renderable text, but stats and edits
            // propagate to the preceding visible assistant message.
            let mut message = RawMessage {
                id: idx.to_string(),
                role: Role::Assistant,
                content: String::new(),
                timestamp,
                ..Default::default()
            };

            if let Some(patch) = patch_document(&name, &arguments) {
                for edit in parse_patch(&patch) {
                    if !message.files.iter().any(|f| f.path == edit.path) {
                        message.files.push(RawFile {
                            path: edit.path.clone(),
                            role: FileRole::Edited,
                        });
                    }
                    message.file_edits.push(edit);
                }
            }

            message.tool_calls.push(RawToolCall {
                call_id,
                tool_name: name,
                input: arguments,
                output,
                file_path: None,
            });
            Some(message)
        }
        _ => None,
    }
}

fn extract_item_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| {
                matches!(
                    p.get("type").and_then(|t| t.as_str()),
                    Some("input_text") | Some("output_text") | Some("text")
                )
            })
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    }
}

/// Pull the patch document out of an apply_patch call, whichever of the
/// two argument shapes it used: a dedicated tool ({"input": patch} or the
/// bare patch string) or a shell exec ({"command": ["apply_patch", patch]}).
fn patch_document(tool_name: &str, arguments: &str) -> Option<String> {
    let parsed: Option<Value> = serde_json::from_str(arguments).ok();

    if tool_name == "apply_patch" {
        if let Some(parsed) = &parsed {
            if let Some(input) = parsed.get("input").and_then(|v| v.as_str()) {
                return Some(input.to_string());
            }
        }
        if arguments.contains("*** Begin Patch") {
            return Some(arguments.to_string());
        }
        return None;
    }

    if tool_name == "shell" || tool_name == "local_shell" {
        let parsed = parsed?;
        let command = parsed.get("command")?.as_array()?;
        if command.first().and_then(|v| v.as_str()) == Some("apply_patch") {
            return command.get(1).and_then(|v| v.as_str()).map(String::from);
        }
    }

    None
}

/// Token counters arrive as separate events; the usage belongs to the
/// API call behind the nearest preceding assistant entry. Events arriving
/// before any assistant entry are dropped.
fn apply_token_count(payload: &Value, messages: &mut [RawMessage]) {
    let Some(usage) = payload
        .pointer("/info/last_token_usage")
        .or_else(|| payload.get("last_token_usage"))
    else {
        return;
    };
    let Some(target) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant)
    else {
        return;
    };
    if target.input_tokens.is_none() {
        target.input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64());
    }
    if target.output_tokens.is_none() {
        target.output_tokens = usage.get("output_tokens").and_then(|v| v.as_u64());
    }
    if target.cache_read_tokens.is_none() {
        target.cache_read_tokens = usage.get("cached_input_tokens").and_then(|v| v.as_u64());
    }
}

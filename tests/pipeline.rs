//! End-to-end pipeline tests: discover, extract, normalize over fixture
//! trees laid out the way each tool writes them.

use serde_json::json;
use std::fs;
use std::path::Path;

use annal::combine::combine_messages;
use annal::source::{
    ClaudeCodeSource, CursorSource, GeminiSource, SessionSource, Source,
};

fn write_jsonl(path: &Path, entries: &[serde_json::Value]) {
    let body = entries
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body).unwrap();
}

fn claude_fixture(root: &Path) {
    let project = root.join("-home-u-proj");
    fs::create_dir_all(&project).unwrap();
    write_jsonl(
        &project.join("11111111-aaaa.jsonl"),
        &[
            json!({
                "type": "user", "uuid": "u1", "timestamp": "2026-03-01T10:00:00Z",
                "cwd": "/home/u/proj", "gitBranch": "main",
                "message": { "role": "user", "content": "rename the helper" }
            }),
            json!({
                "type": "assistant", "uuid": "a1", "timestamp": "2026-03-01T10:00:05Z",
                "message": {
                    "role": "assistant", "model": "claude-sonnet-4-5",
                    "content": [
                        { "type": "text", "text": "renaming now" },
                        { "type": "tool_use", "id": "t1", "name": "Edit",
                          "input": { "file_path": "/home/u/proj/src/util.rs",
                                     "old_string": "fn helper()",
                                     "new_string": "fn lookup()" } }
                    ],
                    "usage": { "input_tokens": 1000, "output_tokens": 50,
                               "cache_read_input_tokens": 200 }
                }
            }),
            json!({
                "type": "user", "uuid": "u2", "timestamp": "2026-03-01T10:00:06Z",
                "message": { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "t1", "content": "ok" }
                ]}
            }),
            json!({
                "type": "assistant", "uuid": "a2", "timestamp": "2026-03-01T10:00:09Z",
                "message": {
                    "role": "assistant",
                    "content": [{ "type": "tool_use", "id": "t2", "name": "Bash",
                                  "input": { "command": "cargo check" } }],
                    "usage": { "input_tokens": 1500, "output_tokens": 30 }
                }
            }),
        ],
    );
}

#[test]
fn claude_code_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    claude_fixture(dir.path());

    let source = ClaudeCodeSource::new(Some(dir.path().to_path_buf()));
    assert!(source.detect());

    let locations = source.discover().unwrap();
    assert_eq!(locations.len(), 1);

    let conversations = source.extract(&locations[0]).unwrap();
    assert_eq!(conversations.len(), 1);

    let normalized = source.normalize(&conversations[0], &locations[0]);
    let conv = &normalized.conversation;

    assert_eq!(conv.source, Source::ClaudeCode);
    assert_eq!(conv.title, "rename the helper");
    assert_eq!(conv.workspace_path.as_deref(), Some("/home/u/proj"));
    assert_eq!(conv.project_name.as_deref(), Some("proj"));
    assert_eq!(conv.git_branch.as_deref(), Some("main"));
    assert_eq!(conv.model.as_deref(), Some("claude-sonnet-4-5"));

    // The tool_result-only user entry and the tool-only assistant entry
    // are filtered; the count invariant holds over what remains.
    assert_eq!(conv.message_count, normalized.messages.len());
    assert_eq!(conv.message_count, 2);

    // Tool-only stats landed on the visible assistant message.
    let assistant = &normalized.messages[1];
    assert_eq!(assistant.role, "assistant");
    assert_eq!(assistant.output_tokens, Some(80));
    // Peak context: 1500 beats 1000 + 200.
    assert_eq!(assistant.input_tokens, Some(1500));
    assert_eq!(conv.total_input_tokens, Some(1500));
    assert_eq!(conv.total_output_tokens, Some(80));

    // The edit survived with its line counts.
    assert_eq!(normalized.file_edits.len(), 1);
    assert_eq!(normalized.file_edits[0].path, "/home/u/proj/src/util.rs");
    assert_eq!(normalized.file_edits[0].edit_type, "modify");

    // Re-running yields byte-identical ids.
    let again = source.normalize(&conversations[0], &locations[0]);
    assert_eq!(conv.id, again.conversation.id);
    assert_eq!(
        normalized.messages[0].id,
        again.messages[0].id
    );
    assert_eq!(normalized.file_edits[0].id, again.file_edits[0].id);
}

#[test]
fn gemini_end_to_end_with_workspace_inference() {
    let dir = tempfile::tempdir().unwrap();
    let chats = dir.path().join("hash123/chats");
    fs::create_dir_all(&chats).unwrap();
    fs::write(
        chats.join("session-1.json"),
        json!({
            "sessionId": "g-9",
            "startTime": "2026-05-01T08:00:00Z",
            "messages": [
                { "id": "m1", "type": "user", "content": "check both files",
                  "timestamp": "2026-05-01T08:00:00Z" },
                { "id": "m2", "type": "gemini", "content": "checked",
                  "model": "gemini-2.5-pro",
                  "tokens": { "input": 400, "output": 25 },
                  "toolCalls": [
                      { "id": "t1", "name": "read_file",
                        "args": { "absolute_path": "/home/u/web/src/a.ts" } },
                      { "id": "t2", "name": "read_file",
                        "args": { "absolute_path": "/home/u/web/src/b.ts" } }
                  ] }
            ]
        })
        .to_string(),
    )
    .unwrap();

    let source = GeminiSource::new(Some(dir.path().to_path_buf()));
    let locations = source.discover().unwrap();
    assert_eq!(locations.len(), 1);

    let conversations = source.extract(&locations[0]).unwrap();
    let normalized = source.normalize(&conversations[0], &locations[0]);

    // No workspace on disk: inferred from the two referenced paths,
    // truncated at the src indicator.
    assert_eq!(
        normalized.conversation.workspace_path.as_deref(),
        Some("/home/u/web")
    );
    assert_eq!(normalized.conversation.project_name.as_deref(), Some("web"));
    assert_eq!(normalized.tool_calls.len(), 2);
    assert_eq!(normalized.conversation_files.len(), 2);
}

#[test]
fn cursor_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let ws_dir = dir.path().join("workspaceStorage/abc123");
    fs::create_dir_all(&ws_dir).unwrap();
    fs::create_dir_all(dir.path().join("globalStorage")).unwrap();

    fs::write(
        ws_dir.join("workspace.json"),
        r#"{"folder": "file:///home/u/proj"}"#,
    )
    .unwrap();

    let ws_conn = rusqlite::Connection::open(ws_dir.join("state.vscdb")).unwrap();
    ws_conn
        .execute_batch("CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT);")
        .unwrap();
    ws_conn
        .execute(
            "INSERT INTO ItemTable (key, value) VALUES ('composer.composerData', ?)",
            [json!({
                "allComposers": [{
                    "composerId": "c77",
                    "name": "Refactor pass",
                    "createdAt": 1_750_000_000_000i64,
                    "unifiedMode": "agent"
                }]
            })
            .to_string()
            .into_bytes()],
        )
        .unwrap();

    let global_conn =
        rusqlite::Connection::open(dir.path().join("globalStorage/state.vscdb")).unwrap();
    global_conn
        .execute_batch("CREATE TABLE cursorDiskKV (key TEXT PRIMARY KEY, value TEXT);")
        .unwrap();
    global_conn
        .execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES ('composerData:c77', ?)",
            [json!({
                "composerId": "c77",
                "conversation": [
                    { "type": 1, "bubbleId": "b1", "text": "tidy up main" },
                    { "type": 2, "bubbleId": "b2", "text": "tidied",
                      "tokenCount": { "inputTokens": 700, "outputTokens": 45 } }
                ]
            })
            .to_string()
            .into_bytes()],
        )
        .unwrap();

    let source = CursorSource::new(Some(dir.path().to_path_buf()));
    assert!(source.detect());

    let locations = source.discover().unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(
        locations[0].workspace_path.as_deref(),
        Some("/home/u/proj")
    );

    let conversations = source.extract(&locations[0]).unwrap();
    assert_eq!(conversations.len(), 1);

    let normalized = source.normalize(&conversations[0], &locations[0]);
    assert_eq!(normalized.conversation.source, Source::Cursor);
    assert_eq!(normalized.conversation.title, "Refactor pass");
    assert_eq!(normalized.conversation.mode.as_deref(), Some("agent"));
    assert_eq!(normalized.conversation.message_count, 2);
    assert_eq!(normalized.conversation.total_input_tokens, Some(700));
}

#[test]
fn combiner_over_normalized_messages() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("-p");
    fs::create_dir_all(&project).unwrap();
    write_jsonl(
        &project.join("s1.jsonl"),
        &[
            json!({ "type": "assistant", "uuid": "a1", "timestamp": "2026-03-01T10:00:00Z",
                    "message": { "role": "assistant",
                                 "content": [{ "type": "text", "text": "a" }] } }),
            json!({ "type": "assistant", "uuid": "a2", "timestamp": "2026-03-01T10:00:01Z",
                    "message": { "role": "assistant",
                                 "content": [{ "type": "text", "text": "b" }] } }),
            json!({ "type": "user", "uuid": "u1", "timestamp": "2026-03-01T10:00:02Z",
                    "message": { "role": "user", "content": "next" } }),
        ],
    );

    let source = ClaudeCodeSource::new(Some(dir.path().to_path_buf()));
    let locations = source.discover().unwrap();
    let conversations = source.extract(&locations[0]).unwrap();
    let normalized = source.normalize(&conversations[0], &locations[0]);

    let combined = combine_messages(&normalized.messages);
    assert_eq!(combined.messages.len(), 2);
    assert_eq!(combined.messages[0].content, "a\n\nb");
    assert_eq!(combined.index_map, vec![0, 0, 1]);
}

#[test]
fn empty_and_broken_containers_degrade_quietly() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("-empty");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("s1.jsonl"), "not json\n").unwrap();
    fs::write(project.join("ignored.txt"), "not a session").unwrap();

    let source = ClaudeCodeSource::new(Some(dir.path().to_path_buf()));
    let locations = source.discover().unwrap();
    let conversations = source.extract(&locations[0]).unwrap();
    assert!(conversations.is_empty());
}

//! Diff and patch parsing
//!
//! Two encodings feed file-edit extraction: textual patch documents (one
//! tool call whose input is a multi-file patch) and structured line-range
//! replacement blobs. Either can describe several files per payload.

use serde::Deserialize;
use serde_json::Value;

use crate::raw::{EditKind, RawFileEdit};

/// Parse a textual patch document into per-file edits.
///
/// File blocks open with `*** Add File:`, `*** Update File:` or
/// `*** Delete File:` marker lines. Within a block, a `+` line (but not a
/// `+++` file header) counts as added and a `-` line (but not `---`) as
/// removed. One document may describe multiple files.
pub fn parse_patch(patch: &str) -> Vec<RawFileEdit> {
    let mut edits: Vec<RawFileEdit> = Vec::new();
    let mut current: Option<RawFileEdit> = None;

    for line in patch.lines() {
        let marker = line
            .trim()
            .strip_prefix("*** Add File: ")
            .map(|p| (EditKind::Create, p))
            .or_else(|| {
                line.trim()
                    .strip_prefix("*** Update File: ")
                    .map(|p| (EditKind::Modify, p))
            })
            .or_else(|| {
                line.trim()
                    .strip_prefix("*** Delete File: ")
                    .map(|p| (EditKind::Delete, p))
            });

        if let Some((kind, path)) = marker {
            if let Some(edit) = current.take() {
                edits.push(edit);
            }
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            current = Some(RawFileEdit {
                path: path.to_string(),
                kind,
                lines_added: 0,
                lines_removed: 0,
                range: None,
                content: None,
            });
            continue;
        }

        if let Some(edit) = current.as_mut() {
            if line.starts_with('+') && !line.starts_with("+++") {
                edit.lines_added += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                edit.lines_removed += 1;
            }
        }
    }

    if let Some(edit) = current.take() {
        edits.push(edit);
    }
    edits
}

/// A structured line-range replacement: the original range
/// `[startLineNumber, endLineNumberExclusive)` is replaced by `modified`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeBlob {
    original: OriginalRange,
    #[serde(default)]
    modified: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginalRange {
    start_line_number: u64,
    end_line_number_exclusive: u64,
}

/// Parse one structured line-range blob into an edit against `path`.
///
/// Removed-line count is the original range's width; added-line count is
/// the replacement list's length. A blob replacing an empty range is a
/// `create`, otherwise a `modify`. Malformed blobs yield `None` so the
/// caller can skip them without aborting the rest of the session.
pub fn parse_range_blob(path: &str, blob: &Value) -> Option<RawFileEdit> {
    let blob: RangeBlob = serde_json::from_value(blob.clone()).ok()?;
    let (start, end) = (
        blob.original.start_line_number,
        blob.original.end_line_number_exclusive,
    );
    if end < start {
        return None;
    }
    let lines_removed = end - start;
    let lines_added = blob.modified.len() as u64;
    let kind = if lines_removed == 0 {
        EditKind::Create
    } else {
        EditKind::Modify
    };
    Some(RawFileEdit {
        path: path.to_string(),
        kind,
        lines_added,
        lines_removed,
        range: Some((start, end)),
        content: None,
    })
}

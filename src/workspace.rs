//! Workspace root inference
//!
//! Some sources never record a working directory; the only signal left is
//! the set of absolute file paths the session touched. The inferred root
//! is the longest path prefix shared by all of them, trimmed back past
//! conventional source-tree directories.

use std::collections::HashMap;

/// Directory names that mark the inside of a project rather than its root.
/// A shared prefix is cut just before the first of these.
const PROJECT_INDICATORS: &[&str] = &[
    "src",
    "lib",
    "app",
    "apps",
    "source",
    "sources",
    "pkg",
    "packages",
    "node_modules",
    "vendor",
    "target",
    "build",
    "dist",
    "out",
    "test",
    "tests",
    "spec",
    "__tests__",
];

/// Infer a project root from absolute file paths referenced in a session.
///
/// Returns `None` when no paths are given or no candidate survives.
pub fn infer_workspace_root(paths: &[String]) -> Option<String> {
    let split: Vec<Vec<&str>> = paths
        .iter()
        .filter(|p| p.starts_with('/'))
        .map(|p| p.split('/').filter(|s| !s.is_empty()).collect())
        .filter(|segs: &Vec<&str>| !segs.is_empty())
        .collect();

    if split.is_empty() {
        return None;
    }

    let prefix = shared_prefix(&split);
    if !prefix.is_empty() {
        return finish_candidate(&prefix);
    }

    // No single prefix covers all paths: vote across per-path candidates,
    // preferring the most frequent, then the longest.
    let mut votes: HashMap<String, usize> = HashMap::new();
    for segs in &split {
        if let Some(candidate) = finish_candidate(segs) {
            *votes.entry(candidate).or_insert(0) += 1;
        }
    }
    votes
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then(a.len().cmp(&b.len())))
        .map(|(candidate, _)| candidate)
}

/// Display name for an inferred root: its final segment.
pub fn workspace_display_name(root: &str) -> Option<String> {
    root.rsplit('/')
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Longest run of segments shared positionally by every path.
fn shared_prefix<'a>(split: &[Vec<&'a str>]) -> Vec<&'a str> {
    let first = &split[0];
    let mut len = first.len();
    for segs in &split[1..] {
        let common = first
            .iter()
            .zip(segs.iter())
            .take_while(|(a, b)| a == b)
            .count();
        len = len.min(common);
        if len == 0 {
            return vec![];
        }
    }
    first[..len].to_vec()
}

/// Turn a segment run into a root path: cut before the first project
/// indicator, else drop a trailing filename-looking segment.
fn finish_candidate(segments: &[&str]) -> Option<String> {
    let mut segs = segments;
    if let Some(idx) = segs.iter().position(|s| PROJECT_INDICATORS.contains(s)) {
        segs = &segs[..idx];
    } else if segs.len() > 1 && segs[segs.len() - 1].contains('.') {
        segs = &segs[..segs.len() - 1];
    }
    if segs.is_empty() {
        return None;
    }
    Some(format!("/{}", segs.join("/")))
}

//! Session source trait and registry
//!
//! One reader per tool, all behind the same trait: detect the tool,
//! enumerate its session containers, extract raw conversations, and
//! normalize them into the canonical record set. Readers are synchronous
//! and side-effect-free; they hold no state between invocations.

mod claudecode;
mod codex;
mod cursor;
mod gemini;

pub use claudecode::ClaudeCodeSource;
pub use codex::CodexSource;
pub use cursor::CursorSource;
pub use gemini::GeminiSource;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::normalize;
use crate::raw::RawConversation;
use crate::record::NormalizedConversation;

/// The tools this pipeline can ingest. Closed on purpose: adding a source
/// is a compile-time-checked change everywhere the tag is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    ClaudeCode,
    Codex,
    Cursor,
    Gemini,
}

impl Source {
    /// Stable tag used in deterministic ids and source refs. Changing a
    /// tag invalidates every previously-synced id for that source.
    pub fn tag(&self) -> &'static str {
        match self {
            Source::ClaudeCode => "claude-code",
            Source::Codex => "codex",
            Source::Cursor => "cursor",
            Source::Gemini => "gemini",
        }
    }

    pub fn all() -> [Source; 4] {
        [
            Source::ClaudeCode,
            Source::Codex,
            Source::Cursor,
            Source::Gemini,
        ]
    }
}

/// One session container: a directory of session files or a database.
/// Supplied to `extract`; the pipeline does not decide which locations to
/// scan beyond enumerating them here.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub source: Source,
    /// Workspace the container belongs to, when the source records one
    pub workspace_path: Option<String>,
    /// Directory of session files, or a single database file
    pub store_path: PathBuf,
    /// Change-detection hint for the sync orchestrator
    pub modified: Option<DateTime<Utc>>,
}

impl SourceLocation {
    pub fn new(source: Source, store_path: PathBuf) -> Self {
        let modified = std::fs::metadata(&store_path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self {
            source,
            workspace_path: None,
            store_path,
            modified,
        }
    }

    pub fn with_workspace(mut self, workspace_path: Option<String>) -> Self {
        self.workspace_path = workspace_path;
        self
    }
}

/// Session source trait: everything a tool adapter implements.
pub trait SessionSource: Send + Sync {
    fn source(&self) -> Source;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Whether this tool's data exists on the machine
    fn detect(&self) -> bool;

    /// Enumerate session containers (one per workspace/project where the
    /// tool organizes things that way)
    fn discover(&self) -> Result<Vec<SourceLocation>>;

    /// Parse one container's sessions into raw conversations. A session
    /// with zero parseable records yields no conversation.
    fn extract(&self, location: &SourceLocation) -> Result<Vec<RawConversation>>;

    /// Convert one raw conversation into the canonical record set. The
    /// same rules apply to every source so cross-source counts compare.
    fn normalize(
        &self,
        raw: &RawConversation,
        location: &SourceLocation,
    ) -> NormalizedConversation {
        normalize::normalize(raw, location)
    }
}

/// Registry of configured sources.
pub struct SourceRegistry {
    sources: Vec<Box<dyn SessionSource>>,
}

impl SourceRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self { sources: vec![] };

        if config.is_source_enabled(Source::ClaudeCode) {
            registry.register(Box::new(ClaudeCodeSource::new(
                config.source_path(Source::ClaudeCode),
            )));
        }
        if config.is_source_enabled(Source::Codex) {
            registry.register(Box::new(CodexSource::new(
                config.source_path(Source::Codex),
            )));
        }
        if config.is_source_enabled(Source::Cursor) {
            registry.register(Box::new(CursorSource::new(
                config.source_path(Source::Cursor),
            )));
        }
        if config.is_source_enabled(Source::Gemini) {
            registry.register(Box::new(GeminiSource::new(
                config.source_path(Source::Gemini),
            )));
        }

        registry
    }

    pub fn register(&mut self, source: Box<dyn SessionSource>) {
        self.sources.push(source);
    }

    pub fn detected_sources(&self) -> Vec<&dyn SessionSource> {
        self.sources
            .iter()
            .filter(|s| s.detect())
            .map(|s| s.as_ref())
            .collect()
    }

    pub fn all_sources(&self) -> Vec<&dyn SessionSource> {
        self.sources.iter().map(|s| s.as_ref()).collect()
    }

    pub fn get_source(&self, tag: &str) -> Option<&dyn SessionSource> {
        self.sources
            .iter()
            .find(|s| s.source().tag() == tag)
            .map(|s| s.as_ref())
    }
}

/// Session title from the first non-empty user text: first line only,
/// bounded length. Explicit summary records take precedence upstream.
pub fn derive_title(text: &str) -> String {
    const MAX: usize = 80;
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let first_line = first_line.trim();
    if first_line.chars().count() > MAX {
        let truncated: String = first_line.chars().take(MAX - 3).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

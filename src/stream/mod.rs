//! Line-delimited event streams emitted by agent CLIs.
//!
//! Each backend prints one JSON object per line. The types in [`claude`] and
//! [`codex`] describe those objects; [`fold`] reduces a stream of lines to a
//! single [`fold::FoldOutcome`] without any shared mutable state.

pub mod claude;
pub mod codex;
pub mod fold;

pub use claude::{ClaudeFold, ContentBlock, StreamEvent};
pub use codex::{CodexEvent, CodexFold};
pub use fold::{FoldOutcome, LineFold};

use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::util::normalize_path;

/// Keys under which tool inputs carry the path they operate on.
const PATH_KEYS: &[&str] = &["file_path", "notebook_path", "path"];

/// Tools whose path argument is a file the agent creates or edits.
const EDITING_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// File paths an editing tool invocation touches, resolved against `work_dir`.
///
/// Read-only tools (Read, Glob, Grep, ...) touch nothing.
pub fn touched_paths(tool: &str, input: &Value, work_dir: &Path) -> Vec<PathBuf> {
    if !EDITING_TOOLS.contains(&tool) {
        return Vec::new();
    }
    PATH_KEYS
        .iter()
        .filter_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .filter(|p| !p.trim().is_empty())
        .map(|p| absolutize(p, work_dir))
        .collect()
}

/// Resolve `path` against `work_dir` unless it is already absolute, with
/// `.` and `..` collapsed the same way delete targets are.
pub fn absolutize(path: &str, work_dir: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        normalize_path(candidate)
    } else {
        normalize_path(&work_dir.join(candidate))
    }
}

/// Extract a human-readable description from a tool use event
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let path_of = |input: &Value| {
        input
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(shorten_path)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("Reading: {}", path_of(input)),
        "Write" => format!("Creating: {}", path_of(input)),
        "Edit" | "MultiEdit" => format!("Editing: {}", path_of(input)),
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" | "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "*".to_string());
            format!("Searching: {}", pattern)
        }
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate a string with ellipsis, on a character boundary.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

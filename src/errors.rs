//! Typed error hierarchy for anvil.
//!
//! Three top-level enums cover the three subsystems:
//! - `AgentError`: spawning and supervising one agent process
//! - `PermissionError`: the permission gateway and its persistence
//! - `OrchestratorError`: collaborator failures that abort `execute()` before a phase runs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which of the two process timeouts fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No output at all was seen before the initial deadline.
    Initial,
    /// Output stopped arriving for longer than the inactivity window.
    Inactivity,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Initial => write!(f, "initial"),
            TimeoutKind::Inactivity => write!(f, "inactivity"),
        }
    }
}

/// Errors from a single agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent produced no result before the {kind} timeout ({secs}s)", secs = .after.as_secs())]
    Timeout { kind: TimeoutKind, after: Duration },

    #[error("Agent exited with code {exit_code} without a result: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },

    #[error("Failed to write temporary file {path}: {source}")]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the permission gateway subsystem.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Failed to bind permission socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed permission message: {0}")]
    Protocol(String),

    #[error("Failed to persist permission rule to {path}: {message}")]
    Persist { path: PathBuf, message: String },

    #[error("Permission prompt failed: {0}")]
    Prompt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors that abort an orchestration run outright.
///
/// Phase failures are not represented here; they become structured
/// `ExecutionResult`s instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to read plan {path}: {source}")]
    Plan {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::fold::{FoldOutcome, LineFold};
use super::{absolutize, truncate_str};

/// Events from `codex exec --json`.
///
/// Codex wraps each event as `{"id": "...", "msg": {"type": ...}}`; bare
/// events without the envelope are accepted too.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodexEvent {
    TaskStarted {},
    AgentMessage {
        message: String,
    },
    ExecCommandBegin {
        #[serde(default)]
        command: Vec<String>,
    },
    PatchApplyBegin {
        #[serde(default)]
        changes: serde_json::Map<String, Value>,
    },
    TaskComplete {
        #[serde(default)]
        last_agent_message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl CodexEvent {
    /// Parse one output line, unwrapping the `msg` envelope when present.
    pub fn parse_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let inner = match value.get("msg") {
            Some(msg) if msg.is_object() => msg.clone(),
            _ => value,
        };
        serde_json::from_value(inner).ok()
    }
}

/// Fold state for Codex's JSON event stream.
#[derive(Debug, Clone)]
pub struct CodexFold {
    work_dir: PathBuf,
    started: bool,
    last_message: Option<String>,
    completion_message: Option<String>,
    error_message: Option<String>,
    result_seen: bool,
    touched: BTreeSet<PathBuf>,
    activity: Option<String>,
}

impl CodexFold {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            started: false,
            last_message: None,
            completion_message: None,
            error_message: None,
            result_seen: false,
            touched: BTreeSet::new(),
            activity: None,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }
}

impl LineFold for CodexFold {
    fn fold(mut self, line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return self;
        }
        let Some(event) = CodexEvent::parse_line(line) else {
            tracing::trace!(line = %truncate_str(line, 80), "Skipping unrecognised codex event");
            return self;
        };

        match event {
            CodexEvent::TaskStarted {} => self.started = true,
            CodexEvent::AgentMessage { message } => {
                self.started = true;
                self.last_message = Some(message);
            }
            CodexEvent::ExecCommandBegin { command } => {
                self.activity = Some(format!("Running: {}", truncate_str(&command.join(" "), 40)));
            }
            CodexEvent::PatchApplyBegin { changes } => {
                for path in changes.keys() {
                    self.touched.insert(absolutize(path, &self.work_dir));
                }
                self.activity = Some(format!("Patching {} file(s)", changes.len()));
            }
            CodexEvent::TaskComplete { last_agent_message } => {
                self.result_seen = true;
                self.completion_message = last_agent_message;
            }
            CodexEvent::Error { message } => {
                self.error_message = Some(message);
            }
        }
        self
    }

    fn result_seen(&self) -> bool {
        self.result_seen
    }

    fn touched_paths(&self) -> &BTreeSet<PathBuf> {
        &self.touched
    }

    fn last_activity(&self) -> Option<&str> {
        self.activity.as_deref()
    }

    fn finish(self) -> FoldOutcome {
        let final_message = self
            .completion_message
            .filter(|m| !m.trim().is_empty())
            .or(self.last_message)
            .unwrap_or_default();
        FoldOutcome {
            final_message,
            failure_message: self.error_message,
            touched_paths: self.touched,
        }
    }
}

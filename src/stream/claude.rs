use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::fold::{FoldOutcome, LineFold};
use super::{describe_tool_use, touched_paths};

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },

    /// Thinking blocks and anything newer than this parser.
    #[serde(other)]
    Other,
}

/// Fold state for Claude's stream-json output.
#[derive(Debug, Clone)]
pub struct ClaudeFold {
    work_dir: PathBuf,
    started: bool,
    accumulated_text: String,
    final_result: Option<String>,
    error_message: Option<String>,
    result_seen: bool,
    touched: BTreeSet<PathBuf>,
    activity: Option<String>,
}

impl ClaudeFold {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            started: false,
            accumulated_text: String::new(),
            final_result: None,
            error_message: None,
            result_seen: false,
            touched: BTreeSet::new(),
            activity: None,
        }
    }

    /// Whether the session init event ("task started") has been seen.
    pub fn started(&self) -> bool {
        self.started
    }

    fn push_text(&mut self, text: &str) {
        self.accumulated_text.push_str(text);
        self.accumulated_text.push('\n');
    }
}

impl LineFold for ClaudeFold {
    fn fold(mut self, line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return self;
        }

        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                // Plain text from a wrapper script or an older CLI.
                self.push_text(line);
                return self;
            }
        };

        let event = match serde_json::from_value::<StreamEvent>(value) {
            Ok(event) => event,
            Err(e) => {
                tracing::trace!(error = %e, "Skipping unrecognised stream event");
                return self;
            }
        };

        match event {
            StreamEvent::System { subtype } => {
                if subtype == "init" {
                    self.started = true;
                }
            }
            StreamEvent::Assistant { message, .. } => {
                self.started = true;
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.push_text(&text);
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            self.activity = Some(describe_tool_use(&name, &input));
                            self.touched
                                .extend(touched_paths(&name, &input, &self.work_dir));
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result {
                subtype,
                result,
                is_error,
            } => {
                self.result_seen = true;
                if is_error {
                    self.error_message = Some(
                        result
                            .clone()
                            .filter(|r| !r.trim().is_empty())
                            .unwrap_or_else(|| format!("Agent ended with {}", subtype)),
                    );
                }
                self.final_result = result;
            }
            StreamEvent::User {} => {}
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
            .final_result
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| self.accumulated_text.trim_end().to_string());
        FoldOutcome {
            final_message,
            failure_message: self.error_message,
            touched_paths: self.touched,
        }
    }
}

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;

use super::process::{ProcessSpec, Timeouts, run_streaming};
use super::{AgentBackend, InvocationRequest};
use crate::classify::{Verdict, parse_verdict};
use crate::errors::AgentError;
use crate::orchestrator::Role;
use crate::stream::{CodexFold, FoldOutcome};
use crate::util::extract_json_object;

/// `codex exec` in JSON event mode. Codex has no permission prompt hook, so
/// tool use is governed by its own sandbox settings.
pub struct CodexBackend {
    command: String,
    timeouts: Timeouts,
}

/// Structured output requested from reviewer phases.
pub fn verdict_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": { "type": "string", "enum": ["ACCEPTABLE", "NEEDS_FIXES"] },
            "summary": { "type": "string" }
        },
        "required": ["verdict", "summary"],
        "additionalProperties": false
    })
}

impl CodexBackend {
    pub fn new(command: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            command: command.into(),
            timeouts,
        }
    }

    pub fn build_args(&self, request: &InvocationRequest, schema: Option<&Path>) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if let Some(model) = &request.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(schema) = schema {
            args.push("--output-schema".into());
            args.push(schema.to_string_lossy().into_owned());
        }
        // Read the prompt from stdin.
        args.push("-".into());
        args
    }
}

#[async_trait]
impl AgentBackend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<FoldOutcome, AgentError> {
        let schema_file = if request.role == Role::Reviewer {
            let file = tempfile::Builder::new()
                .prefix("anvil-verdict-")
                .suffix(".json")
                .tempfile()?;
            std::fs::write(file.path(), verdict_schema().to_string()).map_err(|source| {
                AgentError::TempFile {
                    path: file.path().to_path_buf(),
                    source,
                }
            })?;
            Some(file)
        } else {
            None
        };

        let spec = ProcessSpec {
            program: self.command.clone(),
            args: self.build_args(&request, schema_file.as_ref().map(|f| f.path())),
            work_dir: request.work_dir.clone(),
            stdin: request.prompt.clone(),
        };
        let outcome = run_streaming(
            &spec,
            CodexFold::new(&request.work_dir),
            self.timeouts,
            &request.tracked,
            request.ui.clone(),
        )
        .await;
        drop(schema_file);
        outcome
    }

    /// Structured `{"verdict": ...}` first, then the plain-text tokens.
    fn parse_verdict(&self, text: &str) -> Verdict {
        let structured = extract_json_object(text)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| value.get("verdict").cloned())
            .and_then(|verdict| serde_json::from_value::<Verdict>(verdict).ok());
        match structured {
            Some(verdict) if verdict != Verdict::Unknown => verdict,
            _ => parse_verdict(text),
        }
    }
}

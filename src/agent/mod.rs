//! Agent backends.
//!
//! An [`AgentBackend`] knows how to launch one coding-agent CLI and read its
//! output. The orchestrator only ever talks to this trait, so the Claude and
//! Codex backends share a single state machine.

pub mod claude;
pub mod codex;
pub mod process;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::anvil_config::BackendKind;
use crate::classify::{FailureReport, Verdict, parse_failure, parse_verdict};
use crate::errors::AgentError;
use crate::orchestrator::{Role, TrackedFiles};
use crate::stream::FoldOutcome;
use crate::ui::OrchestratorUI;

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use process::{ProcessSpec, Timeouts, run_streaming};

/// Everything one phase invocation needs.
#[derive(Clone)]
pub struct InvocationRequest {
    pub role: Role,
    pub prompt: String,
    pub work_dir: PathBuf,
    pub model: Option<String>,
    /// Socket of the running permission gateway, when one is active.
    pub permission_socket: Option<PathBuf>,
    /// Allow-rule entries the agent may use without asking.
    pub allowed_tools: Vec<String>,
    pub tracked: TrackedFiles,
    pub ui: Option<Arc<OrchestratorUI>>,
}

impl InvocationRequest {
    pub fn new(role: Role, prompt: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            work_dir: work_dir.into(),
            model: None,
            permission_socket: None,
            allowed_tools: Vec::new(),
            tracked: TrackedFiles::new(),
            ui: None,
        }
    }
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether tool requests from this backend can be routed through the
    /// permission gateway for this run.
    fn supports_permission_gateway(&self) -> bool {
        false
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<FoldOutcome, AgentError>;

    fn parse_verdict(&self, text: &str) -> Verdict {
        parse_verdict(text)
    }

    fn parse_failure(&self, text: &str) -> FailureReport {
        parse_failure(text)
    }
}

/// Settings shared by both concrete backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub command: String,
    pub timeouts: Timeouts,
    pub allow_all_tools: bool,
    pub disallowed_tools: Vec<String>,
}

pub fn build_backend(settings: BackendSettings) -> Arc<dyn AgentBackend> {
    match settings.kind {
        BackendKind::Claude => Arc::new(
            ClaudeBackend::new(settings.command, settings.timeouts)
                .with_allow_all_tools(settings.allow_all_tools)
                .with_disallowed_tools(settings.disallowed_tools),
        ),
        BackendKind::Codex => Arc::new(CodexBackend::new(settings.command, settings.timeouts)),
    }
}

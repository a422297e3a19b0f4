use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::classify::Verdict;

/// The agent role a phase runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Implementer,
    Tester,
    Verifier,
    Reviewer,
    Fixer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Implementer => "implementer",
            Role::Tester => "tester",
            Role::Verifier => "verifier",
            Role::Reviewer => "reviewer",
            Role::Fixer => "fixer",
        }
    }

    /// Heading used for this role in captured output.
    pub fn title(&self) -> &'static str {
        match self {
            Role::Implementer => "Implementation",
            Role::Tester => "Testing",
            Role::Verifier => "Verification",
            Role::Reviewer => "Review",
            Role::Fixer => "Fixes",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "implementer" | "implementor" => Ok(Role::Implementer),
            "tester" => Ok(Role::Tester),
            "verifier" => Ok(Role::Verifier),
            "reviewer" => Ok(Role::Reviewer),
            "fixer" => Ok(Role::Fixer),
            _ => anyhow::bail!("Unknown role '{}'", s),
        }
    }
}

/// One completed phase. Never mutated after it is appended to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub role: Role,
    pub raw_output: String,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

/// Structured description of why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    pub requirements: String,
    pub problems: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solutions: Option<String>,
    pub source_agent: Role,
}

/// How much of a run `Orchestrator::execute` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    None,
    All,
    Result,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::None => write!(f, "none"),
            CaptureMode::All => write!(f, "all"),
            CaptureMode::Result => write!(f, "result"),
        }
    }
}

impl std::str::FromStr for CaptureMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CaptureMode::None),
            "all" => Ok(CaptureMode::All),
            "result" => Ok(CaptureMode::Result),
            _ => anyhow::bail!("Invalid capture mode '{}'. Valid values: none, all, result", s),
        }
    }
}

/// The plan an orchestration run works against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInfo {
    pub path: PathBuf,
}

impl PlanInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStep {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub phases: usize,
    pub fix_iterations: u32,
    pub planning_retries: u32,
    pub max_iterations_reached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_verdict: Option<Verdict>,
    pub completed_tasks: Vec<String>,
    pub tracked_files: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub content: String,
    pub steps: Vec<ExecutionStep>,
    pub metadata: ExecutionMetadata,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
}

/// Return shape of `execute`, selected by [`CaptureMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutput {
    None,
    All(String),
    Result(ExecutionResult),
}

impl ExecutionResult {
    /// Every phase output, in order, under a heading per phase.
    pub fn transcript(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("## {}\n\n{}", step.title, step.body.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn into_output(self, capture: CaptureMode) -> ExecutionOutput {
        match capture {
            CaptureMode::None => ExecutionOutput::None,
            CaptureMode::All => ExecutionOutput::All(self.transcript()),
            CaptureMode::Result => ExecutionOutput::Result(self),
        }
    }
}

//! File configuration for anvil.
//!
//! Reads `.anvil/anvil.toml`. Every key is optional; missing sections fall
//! back to defaults. Effective values are layered file → environment → CLI,
//! with the CLI layer applied by [`crate::config::Config`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [agent]
//! backend = "claude"
//! command = "claude"
//! model = "sonnet"
//! initial_timeout_secs = 120
//! inactivity_timeout_secs = 1800
//!
//! [orchestration]
//! profile = "three-role"
//! max_fix_iterations = 5
//! planning_attempts = 4
//! planning_exhaustion = "proceed"
//! unknown_verdict = "acceptable"
//!
//! [permissions]
//! allow_all_tools = false
//! disallowed_tools = ["WebFetch"]
//! prompt_timeout_secs = 300
//! default_response = "disallow"
//! auto_approve_tracked_deletes = true
//! settings_file = ".claude/settings.local.json"
//! shared_store = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which agent CLI executes the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Claude,
    Codex,
}

impl BackendKind {
    /// Executable used when neither the file nor the environment names one.
    pub fn default_command(self) -> &'static str {
        match self {
            BackendKind::Claude => "claude",
            BackendKind::Codex => "codex",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Claude => write!(f, "claude"),
            BackendKind::Codex => write!(f, "codex"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "claude-code" => Ok(BackendKind::Claude),
            "codex" | "codex-cli" => Ok(BackendKind::Codex),
            _ => anyhow::bail!("Invalid backend '{}'. Valid values: claude, codex", s),
        }
    }
}

/// Which roles run between Implement and Review.
///
/// | Profile     | Roles                                  |
/// |-------------|----------------------------------------|
/// | `ThreeRole` | implementer, tester, reviewer (+fixer) |
/// | `TwoRole`   | implementer, verifier, reviewer (+fixer) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseProfile {
    #[default]
    ThreeRole,
    TwoRole,
}

impl std::fmt::Display for PhaseProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseProfile::ThreeRole => write!(f, "three-role"),
            PhaseProfile::TwoRole => write!(f, "two-role"),
        }
    }
}

impl std::str::FromStr for PhaseProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "three-role" | "three_role" | "3" => Ok(PhaseProfile::ThreeRole),
            "two-role" | "two_role" | "2" => Ok(PhaseProfile::TwoRole),
            _ => anyhow::bail!("Invalid profile '{}'. Valid values: three-role, two-role", s),
        }
    }
}

/// What a review without either verdict token means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownVerdictPolicy {
    /// Finish the run successfully, as if the reviewer had accepted.
    #[default]
    Acceptable,
    /// Enter the fix loop, as if the reviewer had asked for fixes.
    NeedsFixes,
    /// Fail the run, attributing the failure to the reviewer.
    Fail,
}

impl std::fmt::Display for UnknownVerdictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownVerdictPolicy::Acceptable => write!(f, "acceptable"),
            UnknownVerdictPolicy::NeedsFixes => write!(f, "needs-fixes"),
            UnknownVerdictPolicy::Fail => write!(f, "fail"),
        }
    }
}

/// What happens when every Implement attempt only produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanningExhaustionPolicy {
    /// Log a warning and move on to the next phase.
    #[default]
    Proceed,
    /// Fail the run, attributing the failure to the implementer.
    Fail,
}

impl std::fmt::Display for PlanningExhaustionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningExhaustionPolicy::Proceed => write!(f, "proceed"),
            PlanningExhaustionPolicy::Fail => write!(f, "fail"),
        }
    }
}

/// Decision applied when a permission prompt times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultResponse {
    Allow,
    #[default]
    Disallow,
}

impl DefaultResponse {
    pub fn approves(self) -> bool {
        matches!(self, DefaultResponse::Allow)
    }
}

impl std::fmt::Display for DefaultResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultResponse::Allow => write!(f, "allow"),
            DefaultResponse::Disallow => write!(f, "disallow"),
        }
    }
}

impl std::str::FromStr for DefaultResponse {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" | "yes" => Ok(DefaultResponse::Allow),
            "disallow" | "deny" | "no" => Ok(DefaultResponse::Disallow),
            _ => anyhow::bail!("Invalid default response '{}'. Valid values: allow, disallow", s),
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub backend: BackendKind,
    /// Agent executable (default depends on backend)
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Deadline for the first line of output
    #[serde(default = "default_initial_timeout_secs")]
    pub initial_timeout_secs: u64,
    /// Maximum silence between two lines of output
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

fn default_initial_timeout_secs() -> u64 {
    120
}

fn default_inactivity_timeout_secs() -> u64 {
    30 * 60
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            command: None,
            model: None,
            initial_timeout_secs: default_initial_timeout_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

/// `[orchestration]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default)]
    pub profile: PhaseProfile,
    #[serde(default = "default_max_fix_iterations")]
    pub max_fix_iterations: u32,
    /// Total Implement attempts, including the first
    #[serde(default = "default_planning_attempts")]
    pub planning_attempts: u32,
    #[serde(default)]
    pub planning_exhaustion: PlanningExhaustionPolicy,
    #[serde(default)]
    pub unknown_verdict: UnknownVerdictPolicy,
}

fn default_max_fix_iterations() -> u32 {
    5
}

fn default_planning_attempts() -> u32 {
    4
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            profile: PhaseProfile::default(),
            max_fix_iterations: default_max_fix_iterations(),
            planning_attempts: default_planning_attempts(),
            planning_exhaustion: PlanningExhaustionPolicy::default(),
            unknown_verdict: UnknownVerdictPolicy::default(),
        }
    }
}

/// `[permissions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsSection {
    #[serde(default)]
    pub allow_all_tools: bool,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    /// 0 waits for the operator indefinitely
    #[serde(default)]
    pub prompt_timeout_secs: u64,
    #[serde(default)]
    pub default_response: DefaultResponse,
    #[serde(default = "default_true")]
    pub auto_approve_tracked_deletes: bool,
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
    #[serde(default = "default_true")]
    pub shared_store: bool,
}

fn default_true() -> bool {
    true
}

fn default_settings_file() -> String {
    ".claude/settings.local.json".to_string()
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            allow_all_tools: false,
            disallowed_tools: Vec::new(),
            prompt_timeout_secs: 0,
            default_response: DefaultResponse::default(),
            auto_approve_tracked_deletes: true,
            settings_file: default_settings_file(),
            shared_store: true,
        }
    }
}

/// The complete anvil.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnvilToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
    #[serde(default)]
    pub permissions: PermissionsSection,
}

impl AnvilToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse anvil.toml")
    }

    /// Load `anvil.toml` from the given `.anvil` directory, or defaults when absent.
    pub fn load_or_default(anvil_dir: &Path) -> Result<Self> {
        let config_path = anvil_dir.join("anvil.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize anvil.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent executable (file → `ANVIL_AGENT_CMD` → backend default).
    pub fn agent_cmd(&self) -> String {
        std::env::var("ANVIL_AGENT_CMD")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.agent.command.clone())
            .unwrap_or_else(|| self.agent.backend.default_command().to_string())
    }

    /// Model selector (file, overridden by `ANVIL_MODEL`).
    pub fn model(&self) -> Option<String> {
        std::env::var("ANVIL_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.agent.model.clone())
    }

    /// Allow-all override (file, overridden by `ANVIL_ALLOW_ALL_TOOLS`).
    pub fn allow_all_tools(&self) -> bool {
        if let Ok(env_val) = std::env::var("ANVIL_ALLOW_ALL_TOOLS") {
            return env_val != "false" && env_val != "0";
        }
        self.permissions.allow_all_tools
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.orchestration.max_fix_iterations == 0 {
            warnings.push(
                "max_fix_iterations = 0: a NEEDS_FIXES review will never be fixed".to_string(),
            );
        }
        if self.orchestration.planning_attempts == 0 {
            warnings.push("planning_attempts = 0 is treated as 1".to_string());
        }
        if self.agent.inactivity_timeout_secs == 0 {
            warnings.push("inactivity_timeout_secs = 0 kills the agent immediately".to_string());
        }
        if self.agent.initial_timeout_secs > self.agent.inactivity_timeout_secs {
            warnings.push(format!(
                "initial_timeout_secs ({}) exceeds inactivity_timeout_secs ({})",
                self.agent.initial_timeout_secs, self.agent.inactivity_timeout_secs
            ));
        }
        if self.permissions.settings_file.trim().is_empty() {
            warnings.push("permissions.settings_file is empty; always-allow rules cannot persist".to_string());
        }
        if self.agent.backend == BackendKind::Codex && self.permissions.prompt_timeout_secs > 0 {
            warnings.push(
                "prompt_timeout_secs has no effect with the codex backend (no permission gateway)"
                    .to_string(),
            );
        }

        warnings
    }
}

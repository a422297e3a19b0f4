use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{BackendSettings, Timeouts};
use crate::anvil_config::{AnvilToml, BackendKind, DefaultResponse, PhaseProfile};
use crate::orchestrator::{CaptureMode, OrchestratorOptions};
use crate::permissions::rules::AllowRuleSet;
use crate::permissions::settings::{PermissionFile, PermissionPersistence, shared_store_path};
use crate::permissions::GatewayConfig;

/// Flags from the command line. `None` and empty values leave the file and
/// environment settings in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
    pub profile: Option<PhaseProfile>,
    pub capture: Option<CaptureMode>,
    pub allow_all_tools: bool,
    pub disallowed_tools: Vec<String>,
    pub permission_timeout_secs: Option<u64>,
    pub default_response: Option<DefaultResponse>,
}

/// Runtime configuration for one anvil invocation.
///
/// Layers `.anvil/anvil.toml`, the `ANVIL_*` environment variables and CLI
/// flags, in that order of precedence from lowest to highest.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub anvil_dir: PathBuf,
    pub backend: BackendKind,
    pub agent_cmd: String,
    pub model: Option<String>,
    pub profile: PhaseProfile,
    pub capture: CaptureMode,
    pub allow_all_tools: bool,
    pub disallowed_tools: Vec<String>,
    pub verbose: bool,
    file: AnvilToml,
}

impl Config {
    pub fn new(project_dir: &Path, cli: CliOverrides, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let anvil_dir = project_dir.join(".anvil");
        let file = AnvilToml::load_or_default(&anvil_dir)?;
        Ok(Self::from_parts(project_dir, anvil_dir, file, cli, verbose))
    }

    /// Combine an already-loaded file with CLI flags.
    pub fn from_parts(
        project_dir: PathBuf,
        anvil_dir: PathBuf,
        mut file: AnvilToml,
        cli: CliOverrides,
        verbose: bool,
    ) -> Self {
        if let Some(backend) = cli.backend
            && backend != file.agent.backend
        {
            // A command configured for the other backend does not apply.
            file.agent.backend = backend;
            file.agent.command = None;
        }
        if let Some(profile) = cli.profile {
            file.orchestration.profile = profile;
        }
        if let Some(secs) = cli.permission_timeout_secs {
            file.permissions.prompt_timeout_secs = secs;
        }
        if let Some(response) = cli.default_response {
            file.permissions.default_response = response;
        }

        let mut disallowed_tools = file.permissions.disallowed_tools.clone();
        for tool in cli.disallowed_tools {
            if !disallowed_tools.contains(&tool) {
                disallowed_tools.push(tool);
            }
        }

        Self {
            backend: file.agent.backend,
            agent_cmd: file.agent_cmd(),
            model: cli.model.or_else(|| file.model()),
            profile: file.orchestration.profile,
            capture: cli.capture.unwrap_or_default(),
            allow_all_tools: cli.allow_all_tools || file.allow_all_tools(),
            disallowed_tools,
            verbose,
            project_dir,
            anvil_dir,
            file,
        }
    }

    pub fn file(&self) -> &AnvilToml {
        &self.file
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_secs(
            self.file.agent.initial_timeout_secs,
            self.file.agent.inactivity_timeout_secs,
        )
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        let orchestration = &self.file.orchestration;
        OrchestratorOptions {
            profile: self.profile,
            max_fix_iterations: orchestration.max_fix_iterations,
            planning_attempts: orchestration.planning_attempts,
            planning_exhaustion: orchestration.planning_exhaustion,
            unknown_verdict: orchestration.unknown_verdict,
            capture: self.capture,
            model: self.model.clone(),
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            kind: self.backend,
            command: self.agent_cmd.clone(),
            timeouts: self.timeouts(),
            allow_all_tools: self.allow_all_tools,
            disallowed_tools: self.disallowed_tools.clone(),
        }
    }

    /// Gateway behaviour. `denied_entries` come from the settings file's
    /// `permissions.deny` list.
    pub fn gateway_config(&self, denied_entries: &[String]) -> GatewayConfig {
        let permissions = &self.file.permissions;
        let mut denied = AllowRuleSet::from_entries(&self.disallowed_tools);
        denied.merge(&AllowRuleSet::from_entries(denied_entries));
        GatewayConfig {
            prompt_timeout: (permissions.prompt_timeout_secs > 0)
                .then(|| Duration::from_secs(permissions.prompt_timeout_secs)),
            default_response: permissions.default_response,
            auto_approve_tracked_deletes: permissions.auto_approve_tracked_deletes,
            denied,
        }
    }

    /// Workspace settings file holding persisted allow rules.
    pub fn settings_path(&self) -> PathBuf {
        self.project_dir.join(&self.file.permissions.settings_file)
    }

    /// Persistence for allow rules. `identity` keys the shared store.
    pub fn permission_persistence(&self, identity: &str) -> PermissionPersistence {
        let shared = if self.file.permissions.shared_store {
            shared_store_path(identity).map(PermissionFile::new)
        } else {
            None
        };
        PermissionPersistence::new(PermissionFile::new(self.settings_path()), shared)
    }
}

//! Plan execution: `anvil run <plan>`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::super::{Cli, RunArgs};

impl RunArgs {
    fn overrides(&self) -> anvil::config::CliOverrides {
        anvil::config::CliOverrides {
            backend: self.backend,
            model: self.model.clone(),
            profile: self.profile,
            capture: self.capture,
            allow_all_tools: self.allow_all_tools,
            disallowed_tools: self.disallow.clone(),
            permission_timeout_secs: self.permission_timeout,
            default_response: self.default_response,
        }
    }
}

/// Run the orchestrator. Returns whether the run succeeded.
pub async fn cmd_run(cli: &Cli, project_dir: &Path, args: &RunArgs) -> Result<bool> {
    use anvil::agent::build_backend;
    use anvil::config::Config;
    use anvil::orchestrator::{ExecutionOutput, Orchestrator, PlanInfo};
    use anvil::permissions::rules::shared;
    use anvil::permissions::{PermissionGateway, TerminalPrompter};
    use anvil::plan::{PlanStore, YamlPlanStore};
    use anvil::repo::{GitRepository, Repository};
    use anvil::ui::OrchestratorUI;

    let config = Config::new(project_dir, args.overrides(), cli.verbose)?;
    for warning in config.file().validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let repository = GitRepository::discover(&config.project_dir).context(
        "anvil must run inside a git repository; run 'git init' first",
    )?;
    let plan_path = if args.plan.is_absolute() {
        args.plan.clone()
    } else {
        config.project_dir.join(&args.plan)
    };
    if !plan_path.exists() {
        anyhow::bail!("Plan file not found: {}", plan_path.display());
    }

    let store = Arc::new(YamlPlanStore::new());
    let plan = store.read_plan(&plan_path)?;
    let prompt_content = match &args.prompt {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?,
        None => plan.body.clone().unwrap_or_default(),
    };

    let identity = repository.identity();
    tracing::debug!(%identity, root = %repository.root().display(), "Resolved repository");
    let persistence = Arc::new(config.permission_persistence(&identity));

    let ui = Arc::new(OrchestratorUI::new(cli.verbose));
    let backend = build_backend(config.backend_settings());
    ui.print_header(
        &plan_path.display().to_string(),
        backend.name(),
        plan.pending_tasks().len(),
    );

    let mut orchestrator = Orchestrator::new(backend, Arc::new(repository), store)
        .with_ui(ui.clone())
        .with_options(config.orchestrator_options());

    if !config.allow_all_tools {
        let rules = shared(persistence.load_rules());
        let gateway = PermissionGateway::new(
            rules,
            Arc::new(TerminalPrompter::new().with_ui(ui.clone())),
            config.gateway_config(&persistence.load_denied()),
        )
        .with_persistence(persistence);
        orchestrator = orchestrator.with_gateway(Arc::new(gateway));
    }

    let result = orchestrator
        .run(&prompt_content, &PlanInfo::new(&plan_path))
        .await?;
    let success = result.success;

    match result.into_output(config.capture) {
        ExecutionOutput::None => {}
        ExecutionOutput::All(transcript) => println!("{}", transcript),
        ExecutionOutput::Result(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(success)
}

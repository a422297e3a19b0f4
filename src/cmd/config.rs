//! Configuration view and validation: `anvil config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use anvil::anvil_config::AnvilToml;
    use anvil::config::{CliOverrides, Config};

    let anvil_dir = project_dir.join(".anvil");
    let config_path = anvil_dir.join("anvil.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Anvil Configuration");
            println!("===================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                AnvilToml::load(&config_path)?
            } else {
                println!("No anvil.toml found at {}", config_path.display());
                println!("Using default configuration.");
                AnvilToml::default()
            };
            println!();
            print_toml(&toml);

            println!("Effective values (with env overrides):");
            let config = Config::new(project_dir, CliOverrides::default(), false)?;
            println!("  backend = \"{}\"", config.backend);
            println!("  command = \"{}\"", config.agent_cmd);
            match &config.model {
                Some(model) => println!("  model = \"{}\"", model),
                None => println!("  model = (backend default)"),
            }
            println!("  allow_all_tools = {}", config.allow_all_tools);
            println!("  settings_file = {}", config.settings_path().display());
            println!();

            if !config_path.exists() {
                println!("Run 'anvil config init' to create an anvil.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No anvil.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = AnvilToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("anvil.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&anvil_dir)?;
            AnvilToml::default().save(&config_path)?;

            println!("Created anvil.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [agent] backend, command, model, timeouts");
            println!("  - [orchestration] profile, max_fix_iterations, planning_attempts");
            println!("  - [permissions] disallowed_tools, prompt_timeout_secs, default_response");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &anvil::anvil_config::AnvilToml) {
    let agent = &toml.agent;
    println!("[agent]");
    println!("  backend = \"{}\"", agent.backend);
    if let Some(cmd) = &agent.command {
        println!("  command = \"{}\"", cmd);
    }
    if let Some(model) = &agent.model {
        println!("  model = \"{}\"", model);
    }
    println!("  initial_timeout_secs = {}", agent.initial_timeout_secs);
    println!("  inactivity_timeout_secs = {}", agent.inactivity_timeout_secs);
    println!();

    let orchestration = &toml.orchestration;
    println!("[orchestration]");
    println!("  profile = \"{}\"", orchestration.profile);
    println!("  max_fix_iterations = {}", orchestration.max_fix_iterations);
    println!("  planning_attempts = {}", orchestration.planning_attempts);
    println!(
        "  planning_exhaustion = \"{}\"",
        orchestration.planning_exhaustion
    );
    println!("  unknown_verdict = \"{}\"", orchestration.unknown_verdict);
    println!();

    let permissions = &toml.permissions;
    println!("[permissions]");
    println!("  allow_all_tools = {}", permissions.allow_all_tools);
    if !permissions.disallowed_tools.is_empty() {
        println!("  disallowed_tools = {:?}", permissions.disallowed_tools);
    }
    println!("  prompt_timeout_secs = {}", permissions.prompt_timeout_secs);
    println!("  default_response = \"{}\"", permissions.default_response);
    println!(
        "  auto_approve_tracked_deletes = {}",
        permissions.auto_approve_tracked_deletes
    );
    println!("  settings_file = \"{}\"", permissions.settings_file);
    println!("  shared_store = {}", permissions.shared_store);
    println!();
}

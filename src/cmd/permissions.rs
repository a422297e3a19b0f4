//! Persisted permission rules: `anvil permissions`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::PermissionsCommands;

pub fn cmd_permissions(project_dir: &Path, command: Option<PermissionsCommands>) -> Result<()> {
    use anvil::config::{CliOverrides, Config};
    use anvil::repo::{GitRepository, Repository, local_identity};

    match command {
        None | Some(PermissionsCommands::List) => {
            let config = Config::new(project_dir, CliOverrides::default(), false)?;
            // Outside a git repository there is no remote; fall back to the path identity.
            let identity = match GitRepository::discover(&config.project_dir) {
                Ok(repo) => repo.identity(),
                Err(_) => local_identity(&config.project_dir),
            };
            let persistence = config.permission_persistence(&identity);

            println!();
            print_file("Workspace settings", persistence.settings())?;
            match persistence.shared() {
                Some(shared) => print_file("Shared store", shared)?,
                None => println!("{}", style("Shared store disabled").dim()),
            }

            let rules = persistence.load_rules();
            println!();
            println!(
                "{} effective allow rule(s) for {}",
                rules.len(),
                style(&identity).cyan()
            );
            println!();
        }
    }

    Ok(())
}

fn print_file(label: &str, file: &anvil::permissions::settings::PermissionFile) -> Result<()> {
    println!(
        "{} {}",
        style(label).bold(),
        style(file.path().display()).dim()
    );
    let lists = file.load()?;
    if lists.allow.is_empty() && lists.deny.is_empty() {
        println!("  (no rules)");
    }
    for entry in &lists.allow {
        println!("  {} {}", style("allow").green(), entry);
    }
    for entry in &lists.deny {
        println!("  {} {}", style("deny ").red(), entry);
    }
    println!();
    Ok(())
}

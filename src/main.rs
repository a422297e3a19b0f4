use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use anvil::anvil_config::{BackendKind, DefaultResponse, PhaseProfile};
use anvil::orchestrator::CaptureMode;

mod cmd;

#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about = "Drive coding agents through implement, verify, review and fix phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the phase loop against a plan file
    Run(RunArgs),
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Inspect persisted tool permissions
    Permissions {
        #[command(subcommand)]
        command: Option<PermissionsCommands>,
    },
    /// MCP stdio server that forwards agent permission requests to a run
    #[command(hide = true)]
    PermissionBridge {
        #[arg(long)]
        socket: PathBuf,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct RunArgs {
    /// Plan file (YAML, or Markdown with YAML front matter)
    pub plan: PathBuf,

    /// Agent backend: claude, codex
    #[arg(long)]
    pub backend: Option<BackendKind>,

    #[arg(long)]
    pub model: Option<String>,

    /// Phase profile: three-role, two-role
    #[arg(long)]
    pub profile: Option<PhaseProfile>,

    /// What to print when the run ends: none, all, result
    #[arg(long)]
    pub capture: Option<CaptureMode>,

    /// Skip permission checks entirely
    #[arg(long)]
    pub allow_all_tools: bool,

    /// Tool to deny, e.g. `WebFetch` or `Bash(git push:*)`. Repeatable.
    #[arg(long = "disallow", value_name = "TOOL")]
    pub disallow: Vec<String>,

    /// Seconds to wait for a permission answer before the default applies
    #[arg(long, value_name = "SECS")]
    pub permission_timeout: Option<u64>,

    /// Answer used when a permission prompt times out: allow, disallow
    #[arg(long)]
    pub default_response: Option<DefaultResponse>,

    /// File with extra instructions appended to every phase prompt
    #[arg(long, value_name = "FILE")]
    pub prompt: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default anvil.toml file
    Init,
}

#[derive(Subcommand, Clone)]
pub enum PermissionsCommands {
    /// List allow and deny rules from the settings file and shared store
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    anvil::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => {
            let success = cmd::cmd_run(&cli, &project_dir, args).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Permissions { command } => cmd::cmd_permissions(&project_dir, command.clone())?,
        Commands::PermissionBridge { socket } => {
            anvil::permissions::bridge::run_bridge(socket.clone()).await?;
        }
    }

    Ok(())
}

//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::{build_cmd, cache_cmd, clean_cmd, plan_cmd, verify_cmd};

#[derive(Parser)]
#[command(name = "stbl")]
#[command(author, version)]
#[command(about = "Static site build planner with an incremental, cached executor")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Site root (contains stbl.toml and articles/)
    #[arg(long, short = 's', global = true, default_value = ".")]
    pub source_dir: PathBuf,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan and execute a build
    Build(build_cmd::BuildArgs),

    /// Show the build plan without executing anything
    Plan(plan_cmd::PlanArgs),

    /// Check config and content without building
    Verify(verify_cmd::VerifyArgs),

    /// Remove cached outputs and the cache database for this site
    Clean(clean_cmd::CleanArgs),

    /// Inspect or clear the task cache
    #[command(subcommand)]
    Cache(cache_cmd::CacheCommands),
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = Output::new(cli.format);

    tracing::debug!(source_dir = %cli.source_dir.display(), "stbl starting");

    match cli.command {
        Commands::Build(args) => build_cmd::run(args, &cli.source_dir, &output)?,
        Commands::Plan(args) => plan_cmd::run(args, &cli.source_dir, &output)?,
        Commands::Verify(args) => verify_cmd::run(args, &cli.source_dir, &output)?,
        Commands::Clean(args) => clean_cmd::run(args, &cli.source_dir, &output)?,
        Commands::Cache(cmd) => cache_cmd::run(cmd, &cli.source_dir, &output)?,
    }

    tracing::debug!("command completed successfully");
    Ok(())
}

/// Logs to stderr; `RUST_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default = if verbose { "stbl=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

//! # Command Line Interface
//!
//! Subcommands for running, planning, and inspecting secret syncs.

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::{load_config, AppConfig};
use crate::context::RequestContext;
use crate::diff::{DiffFormat, RenderOptions};
use crate::discovery;
use crate::errors::VaultSyncError;
use crate::observability::{init_logging, init_metrics};
use crate::pipeline::{self, RunOptions, RunReport};
use crate::startup;

#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(about = "Synchronize secrets from hierarchical sources into external secret stores")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "vaultsync.yml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the merge and sync phases
    Sync {
        /// Compute diffs but apply nothing
        #[arg(long)]
        dry_run: bool,

        /// Render per-target diffs in this format
        #[arg(long, value_enum)]
        output: Option<DiffFormat>,

        /// Disable diff value masking
        #[arg(long)]
        show_values: bool,
    },

    /// Show what a sync would change (dry-run with diff output)
    Diff {
        /// Diff output format
        #[arg(long, value_enum, default_value = "text")]
        output: DiffFormat,

        /// Disable diff value masking
        #[arg(long)]
        show_values: bool,
    },

    /// Print the topological target order
    Plan,

    /// Validate the configuration and exit
    Validate,
}

/// Exit code for plan/config-level failures
const EXIT_PLAN_FAILURE: i32 = 2;
/// Exit code for run-level failures outside any target
const EXIT_RUN_FAILURE: i32 = 4;

/// Run the CLI, returning the process exit code
pub async fn run_cli() -> i32 {
    let cli = Cli::parse();
    match try_run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for(&err)
        }
    }
}

async fn try_run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from '{}'", cli.config))?;

    let mut observability = config.observability.clone();
    if cli.verbose {
        observability.log_level = "debug".to_string();
    }
    init_logging(&observability)?;
    init_metrics(&observability)?;

    match cli.command {
        Commands::Validate => {
            println!(
                "Configuration OK: {} source(s), {} target(s)",
                config.sources.len(),
                config.targets.len()
            );
            Ok(0)
        }
        Commands::Plan => print_plan(&config),
        Commands::Sync { dry_run, output, show_values } => {
            let options = RunOptions {
                dry_run: if dry_run { Some(true) } else { None },
                render_diff: output
                    .map(|format| RenderOptions { format, show_values, color: true }),
            };
            execute(config, options).await
        }
        Commands::Diff { output, show_values } => {
            let options = RunOptions {
                dry_run: Some(true),
                render_diff: Some(RenderOptions { format: output, show_values, color: true }),
            };
            execute(config, options).await
        }
    }
}

fn print_plan(config: &AppConfig) -> anyhow::Result<i32> {
    let plan = pipeline::plan(&config.targets)?;
    for (level_index, level) in plan.levels().iter().enumerate() {
        for target in level {
            println!("{}: {}", level_index, target.name);
        }
    }
    if config.targets.iter().any(discovery::is_template) {
        println!("(template targets expand per discovered account at run time)");
    }
    Ok(0)
}

async fn execute(config: AppConfig, options: RunOptions) -> anyhow::Result<i32> {
    let executor = startup::build_executor(config)?;
    let ctx = RequestContext::new();
    let report = executor.run(&ctx, options).await?;
    print_report(&report);
    Ok(report.exit_code())
}

/// Map a failed run to its process exit code: plan-level failures (cycles,
/// invalid config) exit 2, everything else 4
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<VaultSyncError>() {
        Some(err) if err.is_plan_failure() => EXIT_PLAN_FAILURE,
        _ => EXIT_RUN_FAILURE,
    }
}

fn print_report(report: &RunReport) {
    for target in &report.targets {
        if let Some(rendered) = &target.rendered_diff {
            println!("--- {} ---", target.target);
            print!("{}", rendered);
        }
        let status = match (&target.error, target.failures.is_empty()) {
            (Some(err), _) => format!("error: {}", err),
            (None, false) => format!("{} entry failure(s)", target.failures.len()),
            (None, true) if target.dry_run => "dry-run".to_string(),
            (None, true) => "ok".to_string(),
        };
        println!(
            "{}: +{} ~{} -{} applied={} [{}]",
            target.target,
            target.summary.added,
            target.summary.modified,
            target.summary.deleted,
            target.applied,
            status
        );
        for failure in &target.failures {
            println!("  {} {}: {}", failure.operation, failure.path, failure.error);
        }
    }

    if report.discovery_skipped_subtrees > 0 {
        println!(
            "warning: discovery skipped {} OU subtree(s); results may be incomplete",
            report.discovery_skipped_subtrees
        );
    }
    if report.cancelled {
        println!("run cancelled; partial progress reported above");
    }
    println!(
        "{}: {} merged path(s), {} target(s), {:?}",
        report.outcome.as_str(),
        report.merged_paths,
        report.targets.len(),
        report.elapsed
    );
}

//! deep-gate: run the deep verification tier from the command line
//!
//! ```bash
//! deep-gate                                   # every check, current directory
//! deep-gate complexity --workspace ../svc     # one check
//! deep-gate benchmarks --save-baseline baselines/main.json
//! deep-gate --list                            # what would run, and why not
//! ```
//!
//! Exit codes: 0 pass or warn, 1 fail (including an invalid workspace),
//! 2 usage or configuration error.

mod console;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tiergate::workspace::validate_workspace;
use tiergate::{GateConfig, GateEngine, GateError, RunMode, WorkspaceProfile};

const EXIT_FAIL: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "deep-gate", author, version, about, long_about = None)]
struct Args {
    /// Checks to run: `all` or a single check id
    #[arg(default_value = "all")]
    mode: String,

    /// Workspace to verify (overrides DEEP_GATE_WORKSPACE)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Benchmark baseline to compare against
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(long)]
    report: Option<PathBuf>,

    /// POST the report to this URL after writing it
    #[arg(long)]
    collector_url: Option<String>,

    /// Wall-clock budget for the whole run, in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    budget_secs: Option<u64>,

    /// Maximum checks running at once
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    parallelism: Option<u64>,

    /// TOML file overriding the threshold table
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Copy this run's benchmark results to PATH as the next baseline
    #[arg(long)]
    save_baseline: Option<PathBuf>,

    /// Write the report without the console summary
    #[arg(long, default_value_t = false)]
    report_only: bool,

    /// List the registered checks and whether they would run, then exit
    #[arg(long, default_value_t = false)]
    list: bool,
}

impl Args {
    /// Environment configuration with command-line flags on top
    fn config(&self) -> Result<GateConfig> {
        let mut config = GateConfig::from_env().context("invalid DEEP_GATE_* environment")?;
        if let Some(workspace) = &self.workspace {
            config.workspace = workspace.clone();
        }
        if let Some(baseline) = &self.baseline {
            config.baseline = Some(baseline.clone());
        }
        if let Some(report) = &self.report {
            config.report_path = report.clone();
        }
        if let Some(url) = &self.collector_url {
            config.collector_url = Some(url.clone());
        }
        if let Some(secs) = self.budget_secs {
            config.time_budget_secs = secs;
        }
        if let Some(n) = self.parallelism {
            config.parallelism = n as usize;
        }
        if let Some(policy) = &self.policy {
            config.policy_path = Some(policy.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the console summary
    let default_level = if args.report_only { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let (engine, mode) = match setup(&args) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("deep-gate: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.list {
        return list(&engine);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let outcome = match engine.run(&mode, cancel).await {
        Ok(outcome) => outcome,
        Err(e @ GateError::InvalidWorkspace { .. }) => {
            eprintln!("deep-gate: {e}");
            eprintln!(
                "deep-gate: wrote failing report to {}",
                engine.config().report_path.display()
            );
            return ExitCode::from(EXIT_FAIL);
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("deep-gate: {e}");
            return ExitCode::from(EXIT_FAIL);
        }
    };

    if !args.report_only {
        print!(
            "{}",
            console::render_report(&outcome.report, Some(&outcome.sink))
        );
    }

    if let Some(dest) = &args.save_baseline {
        match tiergate::sink::save_baseline(&outcome.report, dest) {
            Ok(Some(path)) => info!(path = %path.display(), "Baseline updated"),
            Ok(None) => warn!("No benchmark results to save as a baseline"),
            Err(e) => warn!(error = %e, "Could not save baseline"),
        }
    }

    ExitCode::from(outcome.report.exit_code() as u8)
}

/// Configuration, policy and mode; any failure here is a usage error
fn setup(args: &Args) -> Result<(GateEngine, RunMode)> {
    let config = args.config()?;
    let engine = GateEngine::new(config).context("cannot build the check registry")?;
    let mode = RunMode::parse(engine.registry(), &args.mode)?;
    Ok((engine, mode))
}

fn list(engine: &GateEngine) -> ExitCode {
    let profile = validate_workspace(&engine.config().workspace)
        .and_then(|root| WorkspaceProfile::scan(root, &[]));
    match profile {
        Ok(profile) => {
            print!("{}", console::render_listing(&engine.registry().describe(&profile)));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("deep-gate: {e}");
            ExitCode::from(EXIT_FAIL)
        }
    }
}

//! cbert-precompute - ClinicalBERT embedding precomputation batch driver
//!
//! ## Commands
//!
//! - `run`: invoke the precomputation program once per readmission mode
//! - `plan`: print the commands a run would issue
//! - `validate`: check the batch configuration without running anything

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use cbert_precompute::{
    init_tracing, load_plan, render_command, render_shell_script, BatchPlan, BatchReport,
    BatchRunner, FailurePolicy, OutputDirPolicy, ProcessInvoker, ReadmissionMode,
    RecordingInvoker, RunOptions, CONFIG_ENV,
};

#[derive(Parser)]
#[command(name = "cbert-precompute")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Precompute ClinicalBERT embeddings for every readmission dataset variant",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Batch config file (TOML); built-in defaults are used when omitted
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the precomputation program for each mode, one after another
    Run {
        /// Stop at the first invocation that does not succeed
        #[arg(long)]
        fail_fast: bool,

        /// Kill an invocation after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Capture the program's output into the report instead of printing it
        #[arg(long)]
        capture: bool,

        /// How to treat modes that share an output directory
        #[arg(long, value_enum, default_value_t = OutputDirsArg::Warn)]
        output_dirs: OutputDirsArg,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Only run these modes (repeatable)
        #[arg(short, long = "mode")]
        modes: Vec<String>,

        /// Print the commands without executing anything; no summary or report
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the commands a run would issue
    Plan {
        #[arg(long, value_enum, default_value_t = PlanFormat::Shell)]
        format: PlanFormat,

        /// Only include these modes (repeatable)
        #[arg(short, long = "mode")]
        modes: Vec<String>,
    },

    /// Check the configuration and the paths it names
    Validate {
        /// Treat shared output directories as an error
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputDirsArg {
    Allow,
    Warn,
    Reject,
}

impl From<OutputDirsArg> for OutputDirPolicy {
    fn from(value: OutputDirsArg) -> Self {
        match value {
            OutputDirsArg::Allow => OutputDirPolicy::Allow,
            OutputDirsArg::Warn => OutputDirPolicy::Warn,
            OutputDirsArg::Reject => OutputDirPolicy::Reject,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlanFormat {
    Shell,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let plan = load_plan(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load batch config {}", path.display()),
        None => "Failed to build default batch plan".to_string(),
    })?;

    match cli.command {
        Commands::Run {
            fail_fast,
            timeout_secs,
            capture,
            output_dirs,
            report,
            modes,
            dry_run,
        } => {
            let plan = select_modes(&plan, &modes)?;
            let options = RunOptions {
                failure_policy: if fail_fast {
                    FailurePolicy::AbortOnFirstFailure
                } else {
                    FailurePolicy::ContinueOnFailure
                },
                output_dirs: output_dirs.into(),
            };
            let invoker = ProcessInvoker::new()
                .with_capture(capture)
                .with_timeout(timeout_secs.map(Duration::from_secs));
            cmd_run(&plan, options, invoker, report.as_deref(), dry_run).await
        }
        Commands::Plan { format, modes } => {
            let plan = select_modes(&plan, &modes)?;
            cmd_plan(&plan, format)
        }
        Commands::Validate { strict } => cmd_validate(&plan, strict),
    }
}

/// Restrict the plan to the named modes; an empty list keeps everything.
fn select_modes(plan: &BatchPlan, names: &[String]) -> Result<BatchPlan> {
    if names.is_empty() {
        return Ok(plan.clone());
    }
    let modes = names
        .iter()
        .flat_map(|n| n.split(','))
        .map(|n| n.parse::<ReadmissionMode>())
        .collect::<cbert_precompute::Result<Vec<_>>>()?;
    plan.select(&modes)
        .context("None of the requested modes are in the batch plan")
}

/// Run the batch and print a per-mode summary
async fn cmd_run(
    plan: &BatchPlan,
    options: RunOptions,
    invoker: ProcessInvoker,
    report_path: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        // Nothing executes, so there is no outcome to summarize or record.
        let recorder = RecordingInvoker::new();
        BatchRunner::run(plan, &recorder, options)
            .await
            .context("Batch plan is invalid")?;
        for command in recorder.issued() {
            println!("{}", render_command(&command));
        }
        if let Some(path) = report_path {
            warn!(path = %path.display(), "Dry run: no report written");
        }
        return Ok(());
    }

    let report = BatchRunner::run(plan, &invoker, options)
        .await
        .context("Precomputation batch could not be started")?;

    print_summary(&report);

    if let Some(path) = report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    let verdict = report.verdict();
    if verdict.passed {
        Ok(())
    } else {
        for failure in &verdict.failures {
            println!("  - {}", failure);
        }
        anyhow::bail!(verdict.message)
    }
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("Batch ID: {}", report.batch_id);
    println!("Plan digest: {}", report.digest);
    println!("Duration: {}ms", report.duration_ms());
    println!();

    for entry in &report.entries {
        let status = if entry.passed() {
            "✓"
        } else if entry.is_skipped() {
            "-"
        } else {
            "✗"
        };
        let duration = entry
            .result
            .as_ref()
            .map(|r| format!("{}ms", r.duration_ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {:<24} {:<20} ({}) -> {}",
            status,
            entry.mode.name(),
            entry.status_label(),
            duration,
            entry.output_dir.display()
        );
    }

    println!();
    println!(
        "Summary: {}/{} invocations succeeded, {} failed, {} skipped",
        report.passed_count(),
        report.entries.len(),
        report.failed_count(),
        report.skipped_count()
    );
}

fn cmd_plan(plan: &BatchPlan, format: PlanFormat) -> Result<()> {
    print!("{}", render_plan(plan, format)?);
    Ok(())
}

fn render_plan(plan: &BatchPlan, format: PlanFormat) -> Result<String> {
    match format {
        PlanFormat::Shell => Ok(render_shell_script(plan)),
        PlanFormat::Json => {
            let doc = serde_json::json!({
                "digest": plan.digest(),
                "commands": plan.commands(),
            });
            Ok(format!("{}\n", serde_json::to_string_pretty(&doc)?))
        }
    }
}

fn cmd_validate(plan: &BatchPlan, strict: bool) -> Result<()> {
    print!("{}", render_validation(plan, strict)?);
    Ok(())
}

/// Apply the output directory policy (`--strict` rejects sharing) and
/// describe the plan. Missing paths are logged, never fatal.
fn render_validation(plan: &BatchPlan, strict: bool) -> Result<String> {
    let policy = if strict {
        OutputDirPolicy::Reject
    } else {
        OutputDirPolicy::Warn
    };
    let collisions = plan.validate(policy).context("Batch plan is invalid")?;

    for warning in missing_path_warnings(plan) {
        warn!("{}", warning);
    }

    let mut out = format!(
        "Invocations: {}\nPlan digest: {}\nShared output directories: {}\n",
        plan.len(),
        plan.digest(),
        collisions.len()
    );
    for c in &collisions {
        let modes: Vec<&str> = c.modes.iter().map(|m| m.name()).collect();
        out.push_str(&format!("  {} <- {}\n", c.output_dir.display(), modes.join(", ")));
    }
    Ok(out)
}

/// Input paths that do not exist yet. These are warnings only; the
/// precomputation program decides what is fatal.
fn missing_path_warnings(plan: &BatchPlan) -> Vec<String> {
    let mut warnings = Vec::new();
    if !plan.base().bert_model.exists() {
        warnings.push(format!(
            "bert_model directory {} does not exist",
            plan.base().bert_model.display()
        ));
    }
    for o in plan.overrides() {
        if !o.data_dir.exists() {
            warnings.push(format!(
                "data_dir {} for mode {} does not exist",
                o.data_dir.display(),
                o.mode
            ));
        }
    }
    warnings
}

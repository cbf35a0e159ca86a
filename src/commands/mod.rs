pub mod apply;
pub mod graph;
pub mod plan;

use anyhow::{Result, bail};
use colored::Colorize;
use std::sync::Arc;

use cloudtasks::SimCloud;
use converge::{CancelToken, ContextBuilder, RunReport, Target, TargetKind};

use crate::cli::RunArgs;
use crate::config::{Manifest, parse_overrides};
use crate::progress::RunProgress;
use crate::ui;

/// Build the engine context for one run from the manifest, state file and flags
pub(crate) fn build_context(
    args: &RunArgs,
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<Arc<converge::Context<SimCloud>>> {
    let manifest = Manifest::load(&args.manifest)?;
    let kind: TargetKind = args.target.into();

    // Declarative targets still discover tasks that validate existing resources
    let cloud = SimCloud::load(&args.state)?;

    let mut config = manifest.engine_config().dry_run(dry_run);
    if let Some(jobs) = args.jobs {
        config = config.with_jobs(jobs);
    }

    let mut overrides = manifest.overrides();
    for (task, lifecycle) in parse_overrides(&args.lifecycle)? {
        overrides.insert(task, lifecycle);
    }

    let ctx = ContextBuilder::new(cloud, Target::new(kind))
        .tasks(manifest.tasks())
        .lifecycle_overrides(overrides)
        .config(config)
        .cancel_token(cancel.clone())
        .build()?;
    log::debug!("built context: {ctx:?}");
    Ok(Arc::new(ctx))
}

/// Run the engine, returning the report whether or not every task converged
pub(crate) fn execute(ctx: &Arc<converge::Context<SimCloud>>, quiet: bool) -> Result<RunReport> {
    let mut progress = RunProgress::new(quiet);
    match converge::run_with(ctx, &mut progress) {
        Ok(report) => Ok(report),
        Err(converge::Error::RunFailed(report)) => Ok(*report),
        Err(e) => Err(e.into()),
    }
}

/// Print one line per task
pub(crate) fn print_report(report: &RunReport) {
    ui::header(if report.is_dry_run() { "Plan" } else { "Run" });
    for (name, outcome) in report.iter() {
        let attempts = match outcome.attempts() {
            n if n > 1 => format!(" ({n} attempts)").dimmed().to_string(),
            _ => String::new(),
        };
        println!("  {} {}: {}{}", ui::outcome_symbol(outcome), name.bold(), outcome, attempts);
    }
}

/// Summary line, and an error when some task did not converge
pub(crate) fn finish(report: &RunReport) -> Result<()> {
    let s = report.summary();
    println!();
    let verb = if report.is_dry_run() { "to change" } else { "changed" };
    println!(
        "  {} {verb}, {} unchanged, {} warned, {} ignored",
        s.changed.to_string().bold(),
        s.unchanged,
        s.warned,
        s.ignored
    );
    if report.is_success() {
        return Ok(());
    }
    println!(
        "  {} failed, {} skipped, {} cancelled",
        s.failed.to_string().red().bold(),
        s.skipped,
        s.cancelled
    );
    bail!("{}", report.failure_summary())
}

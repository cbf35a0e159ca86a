//! Plan command - discover and diff without changing anything

use anyhow::Result;
use colored::Colorize;

use converge::{Action, RunReport};

use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

use super::{build_context, execute, finish};

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let engine = build_context(args, true, &ctx.cancel)?;
    let report = execute(&engine, ctx.quiet)?;
    print_plan(&report);
    finish(&report)
}

/// Print every planned change, diff style
pub(crate) fn print_plan(report: &RunReport) {
    ui::header("Plan");

    let mut any = false;
    for (name, converged) in report.changes() {
        let (Action::Planned(kind) | Action::Applied(kind)) = converged.action else {
            continue;
        };
        any = true;
        println!("  {} {} {}", ui::change_marker(kind), name.bold(), kind.to_string().dimmed());
        if let Some(changes) = &converged.changes {
            ui::dim(&format!("    {changes}"));
        }
    }

    for (name, outcome) in report.iter() {
        if outcome.action() == Some(Action::Warned) {
            ui::warn(&format!("{name}: drift left in place"));
        }
    }

    for (name, outcome) in report.failures() {
        println!("  {} {}: {}", ui::outcome_symbol(outcome), name.bold(), outcome);
    }

    if !any {
        println!();
        ui::success("Everything is up to date");
    }
}

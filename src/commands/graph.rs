//! Graph command - show the order tasks would converge in

use anyhow::Result;
use colored::Colorize;

use cloudtasks::SimCloud;
use converge::{AnyTask, ContextBuilder, Target, TargetKind, TaskGraph};

use crate::Context;
use crate::cli::GraphArgs;
use crate::config::Manifest;
use crate::ui;

pub fn run(ctx: &Context, args: &GraphArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let engine = ContextBuilder::new(SimCloud::new(), Target::new(TargetKind::Api))
        .tasks(manifest.tasks())
        .lifecycle_overrides(manifest.overrides())
        .build()?;
    let graph = TaskGraph::for_run(&engine)?;

    ui::header(&format!("{} tasks", graph.len()));
    for (i, level) in graph.levels().iter().enumerate() {
        println!("  {}", format!("level {i}").dimmed());
        for name in level {
            let Some(task) = engine.registry().get(name) else {
                continue;
            };
            println!("    {} {}", name.bold(), task.resource_type().dimmed());
            let deps = graph.dependencies(name);
            if !deps.is_empty() {
                ui::dim(&format!("    after {}", deps.join(", ")));
            }
            if ctx.verbose > 0 {
                ui::dim(&format!("    {}", task.describe()));
            }
        }
    }
    Ok(())
}

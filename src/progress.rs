//! Progress display for engine runs.
//!
//! Adapts the engine's [`Observer`] callbacks to an indicatif bar. Retries and
//! failures are printed above the bar as they happen.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use converge::{Observer, RunReport, TaskOutcome};

pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { bar }
    }
}

impl Observer for RunProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_task_start(&mut self, name: &str, attempt: u32) {
        if attempt > 1 {
            self.bar.set_message(format!("{name} (attempt {attempt})"));
        } else {
            self.bar.set_message(name.to_string());
        }
    }

    fn on_task_retry(&mut self, name: &str, attempt: u32, delay: Duration, reason: &str) {
        self.bar.suspend(|| {
            println!(
                "  {} {} attempt {} {}; retrying in {:.1}s",
                "↻".yellow(),
                name,
                attempt,
                reason.dimmed(),
                delay.as_secs_f64()
            );
        });
    }

    fn on_task_complete(&mut self, name: &str, outcome: &TaskOutcome) {
        self.bar.inc(1);
        if let TaskOutcome::Failed { error, .. } = outcome {
            self.bar
                .suspend(|| println!("  {} {} {}", "✗".red(), name, error));
        }
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

use colored::Colorize;

use converge::{Action, ChangeKind, TaskOutcome};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Diff-style marker for a change
pub fn change_marker(kind: ChangeKind) -> String {
    match kind {
        ChangeKind::Create => "+".green().bold().to_string(),
        ChangeKind::Update => "~".yellow().bold().to_string(),
        ChangeKind::Delete => "-".red().bold().to_string(),
    }
}

/// Status symbol for a task outcome
pub fn outcome_symbol(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Converged { result, .. } => match result.action {
            Action::Unchanged | Action::Ignored => "·".dimmed().to_string(),
            Action::Applied(kind) | Action::Planned(kind) => change_marker(kind),
            Action::Warned => "⚠".yellow().to_string(),
        },
        TaskOutcome::Failed { .. } => "✗".red().to_string(),
        TaskOutcome::Skipped { .. } | TaskOutcome::Cancelled => "○".yellow().to_string(),
    }
}

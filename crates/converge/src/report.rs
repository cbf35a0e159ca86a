//! Per-task outcomes and the run report

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::delta::ChangeKind;
use crate::error::{Error, Result};

/// What a successful attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "action", content = "kind")]
pub enum Action {
    /// Actual state already matched
    Unchanged,
    /// A change was rendered to the target
    Applied(ChangeKind),
    /// Dry run: a change would have been rendered
    Planned(ChangeKind),
    /// Drift was found and left in place
    Warned,
    /// Lifecycle `Ignore`; not discovered
    Ignored,
}

impl Action {
    pub fn is_change(&self) -> bool {
        matches!(self, Action::Applied(_) | Action::Planned(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Unchanged => write!(f, "unchanged"),
            Action::Applied(kind) => write!(f, "{kind}d"),
            Action::Planned(kind) => write!(f, "will {kind}"),
            Action::Warned => write!(f, "drift left in place"),
            Action::Ignored => write!(f, "ignored"),
        }
    }
}

/// Result of one converged task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Converged {
    pub action: Action,
    /// Debug rendering of the changes that were (or would be) rendered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<String>,
}

impl Converged {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            changes: None,
        }
    }

    pub fn with_changes(action: Action, changes: impl fmt::Debug) -> Self {
        Self {
            action,
            changes: Some(format!("{changes:?}")),
        }
    }
}

/// Final state of one task in a run
#[derive(Debug)]
pub enum TaskOutcome {
    Converged { result: Converged, attempts: u32 },
    Failed { error: Error, attempts: u32 },
    /// Not attempted because a dependency failed
    Skipped { blocked_by: String },
    /// Not attempted because the run was cancelled
    Cancelled,
}

impl TaskOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, TaskOutcome::Converged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TaskOutcome::Converged { attempts, .. } | TaskOutcome::Failed { attempts, .. } => {
                *attempts
            }
            TaskOutcome::Skipped { .. } | TaskOutcome::Cancelled => 0,
        }
    }

    pub fn action(&self) -> Option<Action> {
        match self {
            TaskOutcome::Converged { result, .. } => Some(result.action),
            _ => None,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Converged { result, .. } => write!(f, "{}", result.action),
            TaskOutcome::Failed { error, .. } => write!(f, "failed: {error}"),
            TaskOutcome::Skipped { blocked_by } => write!(f, "skipped (dependency {blocked_by} failed)"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub warned: usize,
    pub ignored: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.unchanged
            + self.changed
            + self.warned
            + self.ignored
            + self.failed
            + self.skipped
            + self.cancelled
    }
}

/// Outcome of every task in a run, keyed by task name
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: BTreeMap<String, TaskOutcome>,
    dry_run: bool,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            outcomes: BTreeMap::new(),
            dry_run,
        }
    }

    pub(crate) fn record(&mut self, name: &str, outcome: TaskOutcome) {
        self.outcomes.insert(name.to_string(), outcome);
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn get(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every task converged
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_converged)
    }

    /// Tasks that did not converge, in name order
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.iter().filter(|(_, o)| !o.is_converged())
    }

    /// Tasks that changed (or would change in a dry run)
    pub fn changes(&self) -> impl Iterator<Item = (&str, &Converged)> {
        self.outcomes.iter().filter_map(|(name, o)| match o {
            TaskOutcome::Converged { result, .. } if result.action.is_change() => {
                Some((name.as_str(), result))
            }
            _ => None,
        })
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for outcome in self.outcomes.values() {
            match outcome {
                TaskOutcome::Converged { result, .. } => match result.action {
                    Action::Unchanged => summary.unchanged += 1,
                    Action::Applied(_) | Action::Planned(_) => summary.changed += 1,
                    Action::Warned => summary.warned += 1,
                    Action::Ignored => summary.ignored += 1,
                },
                TaskOutcome::Failed { .. } => summary.failed += 1,
                TaskOutcome::Skipped { .. } => summary.skipped += 1,
                TaskOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// One line per task that did not converge
    pub fn failure_summary(&self) -> String {
        let lines: Vec<String> = self
            .failures()
            .map(|(name, outcome)| format!("  {name}: {outcome}"))
            .collect();
        format!(
            "{} of {} tasks did not converge:\n{}",
            lines.len(),
            self.len(),
            lines.join("\n")
        )
    }

    /// `Ok` with the report when every task converged, `RunFailed` otherwise
    pub fn into_result(self) -> Result<RunReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::RunFailed(Box::new(self)))
        }
    }
}

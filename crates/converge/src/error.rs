//! Error types for the convergence engine.
//!
//! Errors are categorized so the scheduler can decide between retrying,
//! failing a single task, or failing the run before any work starts. Every
//! task-level variant carries the task name so an aggregated run failure can
//! attribute each problem to the resource that caused it.

use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::Lifecycle;
use crate::report::RunReport;
use crate::target::TargetKind;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid task set or task fields; never retried
    Configuration,
    /// Cloud transport, auth or backend failure
    Transport,
    /// Known eventual-consistency window; retried with backoff
    Retryable,
    /// Lifecycle policy rejected the discovered drift
    Policy,
    /// The run was cancelled before the task started
    Cancelled,
    /// Aggregate of several task failures
    Aggregate,
}

impl ErrorCategory {
    /// Whether the scheduler should requeue a task failing with this category.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::Transport => "Cloud or backend failure",
            Self::Retryable => "Transient condition",
            Self::Policy => "Lifecycle policy violation",
            Self::Cancelled => "Cancelled",
            Self::Aggregate => "Run did not converge",
        }
    }
}

/// Phase of a task attempt, used to attribute transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discover,
    Render,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "discover"),
            Self::Render => write!(f, "render"),
        }
    }
}

/// Errors produced by the engine and by tasks.
#[derive(Debug, Error)]
pub enum Error {
    /// A field that must be set on creation is missing
    #[error("{task}: field {field} is required")]
    RequiredField { task: String, field: String },

    /// A field that is immutable after creation differs from the cloud
    #[error("{task}: field {field} cannot be changed")]
    CannotChangeField { task: String, field: String },

    /// Field values are individually valid but invalid together
    #[error("{task}: {message}")]
    InvalidField { task: String, message: String },

    /// The dependency graph contains a cycle
    #[error("dependency cycle between tasks: {}", .tasks.join(" -> "))]
    DependencyCycle { tasks: Vec<String> },

    /// A task references a task that is not registered
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// Two tasks were registered under the same name
    #[error("duplicate task name: {name}")]
    DuplicateTask { name: String },

    /// The active target has no render implementation for a task
    #[error("task {task} ({resource_type}) does not support the {target} target")]
    UnsupportedTarget {
        task: String,
        resource_type: String,
        target: TargetKind,
    },

    /// Two renders emitted the same block or logical resource name
    #[error("{target} output already contains a resource named {name}")]
    DuplicateOutput { target: TargetKind, name: String },

    /// Discovery failed (transport, auth, malformed response)
    #[error("{task}: discovery failed: {source}")]
    Discovery {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// Render failed against the active target
    #[error("{task}: render failed: {source}")]
    Render {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// A call did not return within the configured bound
    #[error("{task}: {phase} timed out after {timeout:?}")]
    Timeout {
        task: String,
        phase: Phase,
        timeout: Duration,
    },

    /// A write from a call that had already timed out was refused
    #[error("{task}: write refused, call was abandoned after timing out")]
    Abandoned { task: String },

    /// Transient condition; the scheduler retries the task later
    #[error("try again later: {reason}")]
    TryAgainLater { reason: String },

    /// A retryable task kept failing until the attempt ceiling
    #[error("{task}: gave up after {attempts} attempts: {reason}")]
    RetriesExhausted {
        task: String,
        attempts: u32,
        reason: String,
    },

    /// Discovered state violates the task's lifecycle policy
    #[error("{task}: lifecycle {lifecycle} violated: {message}")]
    LifecycleViolation {
        task: String,
        lifecycle: Lifecycle,
        message: String,
    },

    /// A task attempt panicked
    #[error("{task}: task panicked: {message}")]
    Panicked { task: String, message: String },

    /// The worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// The run was cancelled before this task started
    #[error("run cancelled")]
    Cancelled,

    /// Some tasks failed, were skipped or cancelled
    #[error("{}", .0.failure_summary())]
    RunFailed(Box<RunReport>),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::RequiredField { .. }
            | Error::CannotChangeField { .. }
            | Error::InvalidField { .. }
            | Error::DependencyCycle { .. }
            | Error::UnknownDependency { .. }
            | Error::DuplicateTask { .. }
            | Error::UnsupportedTarget { .. }
            | Error::DuplicateOutput { .. }
            | Error::WorkerPool(_) => ErrorCategory::Configuration,
            Error::Discovery { .. }
            | Error::Render { .. }
            | Error::Timeout { .. }
            | Error::Abandoned { .. }
            | Error::Panicked { .. }
            | Error::RetriesExhausted { .. } => ErrorCategory::Transport,
            Error::TryAgainLater { .. } => ErrorCategory::Retryable,
            Error::LifecycleViolation { .. } => ErrorCategory::Policy,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::RunFailed(_) => ErrorCategory::Aggregate,
        }
    }

    /// Whether this error should requeue the task.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn required_field(task: &str, field: &str) -> Self {
        Error::RequiredField {
            task: task.to_string(),
            field: field.to_string(),
        }
    }

    pub fn cannot_change_field(task: &str, field: &str) -> Self {
        Error::CannotChangeField {
            task: task.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_field(task: &str, message: impl Into<String>) -> Self {
        Error::InvalidField {
            task: task.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported_target(task: &str, resource_type: &str, target: TargetKind) -> Self {
        Error::UnsupportedTarget {
            task: task.to_string(),
            resource_type: resource_type.to_string(),
            target,
        }
    }

    pub fn try_again_later(reason: impl Into<String>) -> Self {
        Error::TryAgainLater {
            reason: reason.into(),
        }
    }

    pub fn discovery(task: &str, source: impl Into<anyhow::Error>) -> Self {
        Error::Discovery {
            task: task.to_string(),
            source: source.into(),
        }
    }

    pub fn render(task: &str, source: impl Into<anyhow::Error>) -> Self {
        Error::Render {
            task: task.to_string(),
            source: source.into(),
        }
    }

    /// The run report carried by an aggregate failure.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Error::RunFailed(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_try_again_later_is_retryable() {
        assert!(Error::try_again_later("nat gateway not visible").is_retryable());
        assert!(!Error::required_field("route", "RouteTable").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            !Error::RetriesExhausted {
                task: "route".into(),
                attempts: 3,
                reason: "waiting".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_configuration_errors_name_task_and_field() {
        let err = Error::cannot_change_field("private-route", "CIDR");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.to_string(), "private-route: field CIDR cannot be changed");
    }

    #[test]
    fn test_cycle_message_lists_tasks() {
        let err = Error::DependencyCycle {
            tasks: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between tasks: a -> b -> a");
    }

    #[test]
    fn test_discovery_wraps_source() {
        let err = Error::discovery("main", anyhow::anyhow!("connection reset"));
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(err.to_string(), "main: discovery failed: connection reset");
    }
}

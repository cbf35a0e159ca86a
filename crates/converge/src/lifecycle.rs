//! Lifecycle policy - how discovered drift is treated per task

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Policy governing how a task's discovered state is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Create when missing, update when drifted
    #[default]
    Sync,
    /// Must exist unmodified; any drift is fatal
    ExistsAndValidates,
    /// Drift is logged and left alone
    ExistsAndWarns,
    /// Must not exist; deleted when found
    Absent,
    /// Task is skipped without discovery
    Ignore,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 5] = [
        Lifecycle::Sync,
        Lifecycle::ExistsAndValidates,
        Lifecycle::ExistsAndWarns,
        Lifecycle::Absent,
        Lifecycle::Ignore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::ExistsAndValidates => "exists-and-validates",
            Self::ExistsAndWarns => "exists-and-warns",
            Self::Absent => "absent",
            Self::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Lifecycle::ALL
            .into_iter()
            .find(|l| l.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown lifecycle {s:?} (expected one of: {})",
                    Lifecycle::ALL.map(|l| l.as_str()).join(", ")
                )
            })
    }
}

/// Run-scoped lifecycle overrides keyed by task name
#[derive(Debug, Clone, Default)]
pub struct LifecycleOverrides {
    overrides: HashMap<String, Lifecycle>,
}

impl LifecycleOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: impl Into<String>, lifecycle: Lifecycle) {
        self.overrides.insert(task.into(), lifecycle);
    }

    /// The effective lifecycle for a task: the override if any, else its own
    pub fn resolve(&self, task: &str, declared: Lifecycle) -> Lifecycle {
        self.overrides.get(task).copied().unwrap_or(declared)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl FromIterator<(String, Lifecycle)> for LifecycleOverrides {
    fn from_iter<I: IntoIterator<Item = (String, Lifecycle)>>(iter: I) -> Self {
        Self {
            overrides: iter.into_iter().collect(),
        }
    }
}

/// Knobs for the policy table that are not fixed by the lifecycle itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Whether `ExistsAndWarns` creates a resource that is missing
    pub create_missing_on_warn: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            create_missing_on_warn: true,
        }
    }
}

/// What discovery found, reduced to what the policy table needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    NoResource,
    Unchanged,
    Drifted,
}

/// Outcome of the policy table for one task attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do
    Noop,
    /// Validate and render the create
    Create,
    /// Validate and render the update
    Update,
    /// Render the delete
    Delete,
    /// Log the drift and skip rendering
    Warn(String),
    /// Fatal policy violation; render must not run
    Fail(String),
}

impl Decision {
    pub fn renders(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Apply the lifecycle state machine to what discovery observed.
pub fn decide(lifecycle: Lifecycle, observed: Observed, policy: &LifecyclePolicy) -> Decision {
    use Observed::{Drifted, NoResource, Unchanged};

    match (lifecycle, observed) {
        (Lifecycle::Ignore, _) => Decision::Noop,

        (Lifecycle::Sync, NoResource) => Decision::Create,
        (Lifecycle::Sync, Unchanged) => Decision::Noop,
        (Lifecycle::Sync, Drifted) => Decision::Update,

        (Lifecycle::ExistsAndValidates, NoResource) => {
            Decision::Fail("resource was not found".to_string())
        }
        (Lifecycle::ExistsAndValidates, Unchanged) => Decision::Noop,
        (Lifecycle::ExistsAndValidates, Drifted) => {
            Decision::Fail("resource differs from the desired state".to_string())
        }

        (Lifecycle::ExistsAndWarns, NoResource) if policy.create_missing_on_warn => {
            Decision::Create
        }
        (Lifecycle::ExistsAndWarns, NoResource) => {
            Decision::Fail("resource was not found".to_string())
        }
        (Lifecycle::ExistsAndWarns, Unchanged) => Decision::Noop,
        (Lifecycle::ExistsAndWarns, Drifted) => {
            Decision::Warn("resource differs from the desired state; leaving as is".to_string())
        }

        (Lifecycle::Absent, NoResource) => Decision::Noop,
        (Lifecycle::Absent, Unchanged | Drifted) => Decision::Delete,
    }
}

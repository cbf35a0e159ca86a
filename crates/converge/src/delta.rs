//! Delta computation between actual and desired task state
//!
//! Every task implements its own comparison returning a typed sparse
//! `Changes` value. The helpers here give those comparisons uniform
//! semantics: an unset desired field never counts as a change, references are
//! compared by identity, and collections are order-insensitive unless the
//! task opts into [`ordered`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::RwLock;

/// Sparse set of changed fields produced by a task's comparison
pub trait Changes: fmt::Debug + Send + 'static {
    /// True when no field differs. An empty value short-circuits rendering.
    fn is_empty(&self) -> bool;
}

/// What render is asked to do for one task attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta<C> {
    /// Actual matches desired
    Unchanged,
    /// Resource is missing; carries the full desired value
    Create(C),
    /// Resource drifted; carries only the differing fields
    Update(C),
    /// Resource exists but its lifecycle requires it gone
    Delete,
}

impl<C: Changes> Delta<C> {
    /// Build a delta from a comparison result, collapsing empty changes.
    pub fn from_changes(changes: C) -> Self {
        if changes.is_empty() {
            Delta::Unchanged
        } else {
            Delta::Update(changes)
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Delta::Unchanged)
    }

    pub fn changes(&self) -> Option<&C> {
        match self {
            Delta::Create(c) | Delta::Update(c) => Some(c),
            Delta::Unchanged | Delta::Delete => None,
        }
    }

    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            Delta::Unchanged => None,
            Delta::Create(_) => Some(ChangeKind::Create),
            Delta::Update(_) => Some(ChangeKind::Update),
            Delta::Delete => Some(ChangeKind::Delete),
        }
    }
}

/// Kind of mutation a delta asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Reference from one task to another
///
/// Desired tasks name the referenced task; discovered tasks carry the cloud
/// id found on the live resource. Either side may carry both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl TaskRef {
    /// Reference a task by name
    pub fn to(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    /// Reference a discovered resource by its cloud id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            name: None,
            id: Some(id.into()),
        }
    }

    /// The cloud id, either carried or resolved through the run's identities
    pub fn resolve(&self, ids: &Identities) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.name.as_deref().and_then(|n| ids.get(n)))
    }

    /// Whether two references point at the same resource
    pub fn same_identity(&self, other: &TaskRef, ids: &Identities) -> bool {
        if let (Some(a), Some(b)) = (self.resolve(ids), other.resolve(ids)) {
            return a == b;
        }
        matches!((&self.name, &other.name), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.id) {
            (Some(name), Some(id)) => write!(f, "{name} ({id})"),
            (Some(name), None) => write!(f, "{name}"),
            (None, Some(id)) => write!(f, "{id}"),
            (None, None) => write!(f, "<unset>"),
        }
    }
}

/// Run-scoped table of task name to cloud id
#[derive(Debug, Default)]
pub struct Identities {
    ids: RwLock<HashMap<String, String>>,
}

impl Identities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cloud id of a task's resource
    pub fn record(&self, task: &str, id: impl Into<String>) {
        let id = id.into();
        log::debug!("identity {task} -> {id}");
        match self.ids.write() {
            Ok(mut ids) => ids.insert(task.to_string(), id),
            Err(poisoned) => poisoned.into_inner().insert(task.to_string(), id),
        };
    }

    pub fn get(&self, task: &str) -> Option<String> {
        match self.ids.read() {
            Ok(ids) => ids.get(task).cloned(),
            Err(poisoned) => poisoned.into_inner().get(task).cloned(),
        }
    }
}

/// Scalar field: populated iff desired is set and differs from actual.
pub fn scalar<T: PartialEq + Clone>(actual: &Option<T>, desired: &Option<T>) -> Option<T> {
    match desired {
        Some(d) if actual.as_ref() != Some(d) => Some(d.clone()),
        _ => None,
    }
}

/// Reference field: compared by identity, not by value.
pub fn reference(
    actual: &Option<TaskRef>,
    desired: &Option<TaskRef>,
    ids: &Identities,
) -> Option<TaskRef> {
    match (actual, desired) {
        (_, None) => None,
        (Some(a), Some(d)) if a.same_identity(d, ids) => None,
        (_, Some(d)) => Some(d.clone()),
    }
}

/// Unordered collection: order and duplicates are ignored.
pub fn set<T: Eq + Hash + Clone>(actual: &Option<Vec<T>>, desired: &Option<Vec<T>>) -> Option<Vec<T>> {
    let desired_items = desired.as_ref()?;
    let actual_set: HashSet<&T> = actual.iter().flatten().collect();
    let desired_set: HashSet<&T> = desired_items.iter().collect();
    if actual_set == desired_set {
        None
    } else {
        Some(desired_items.clone())
    }
}

/// Ordered collection: for fields whose order carries meaning.
pub fn ordered<T: PartialEq + Clone>(
    actual: &Option<Vec<T>>,
    desired: &Option<Vec<T>>,
) -> Option<Vec<T>> {
    scalar(actual, desired)
}

/// Unordered collection of references, compared by identity.
pub fn reference_set(
    actual: &Option<Vec<TaskRef>>,
    desired: &Option<Vec<TaskRef>>,
    ids: &Identities,
) -> Option<Vec<TaskRef>> {
    let desired_refs = desired.as_ref()?;
    let actual_refs: &[TaskRef] = actual.as_deref().unwrap_or_default();

    let covered = |from: &[TaskRef], to: &[TaskRef]| {
        from.iter()
            .all(|f| to.iter().any(|t| f.same_identity(t, ids)))
    };

    if covered(desired_refs, actual_refs) && covered(actual_refs, desired_refs) {
        None
    } else {
        Some(desired_refs.clone())
    }
}

/// Key/value map such as tags: compared as a whole.
pub fn map<K: Ord + Clone, V: PartialEq + Clone>(
    actual: &Option<BTreeMap<K, V>>,
    desired: &Option<BTreeMap<K, V>>,
) -> Option<BTreeMap<K, V>> {
    scalar(actual, desired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_unset_desired_is_dont_care() {
        assert_eq!(scalar(&Some("10.0.0.0/24".to_string()), &None), None);
        assert_eq!(scalar::<String>(&None, &None), None);
    }

    #[test]
    fn test_scalar_populated_only_on_difference() {
        let a = Some("10.0.0.0/24".to_string());
        assert_eq!(scalar(&a, &a.clone()), None);
        assert_eq!(
            scalar(&a, &Some("10.0.1.0/24".to_string())),
            Some("10.0.1.0/24".to_string())
        );
        assert_eq!(scalar(&None, &Some(3)), Some(3));
    }

    #[test]
    fn test_reference_compares_resolved_identity() {
        let ids = Identities::new();
        ids.record("main", "rtb-1");

        let desired = Some(TaskRef::to("main"));
        assert_eq!(reference(&Some(TaskRef::with_id("rtb-1")), &desired, &ids), None);
        assert_eq!(
            reference(&Some(TaskRef::with_id("rtb-2")), &desired, &ids),
            desired
        );
    }

    #[test]
    fn test_reference_unresolved_falls_back_to_name() {
        let ids = Identities::new();
        let desired = Some(TaskRef::to("main"));
        assert_eq!(reference(&Some(TaskRef::to("main")), &desired, &ids), None);
        // Actual carries an id we cannot match against anything yet
        assert_eq!(
            reference(&Some(TaskRef::with_id("rtb-9")), &desired, &ids),
            desired
        );
    }

    #[test]
    fn test_set_ignores_order() {
        let a = Some(vec!["anti-affinity".to_string(), "soft".to_string()]);
        let d = Some(vec!["soft".to_string(), "anti-affinity".to_string()]);
        assert_eq!(set(&a, &d), None);
        assert_eq!(set(&a, &Some(vec!["affinity".to_string()])), Some(vec!["affinity".to_string()]));
    }

    #[test]
    fn test_ordered_respects_order() {
        let a = Some(vec![1, 2]);
        assert_eq!(ordered(&a, &Some(vec![2, 1])), Some(vec![2, 1]));
        assert_eq!(ordered(&a, &Some(vec![1, 2])), None);
    }

    #[test]
    fn test_reference_set_by_identity() {
        let ids = Identities::new();
        ids.record("subnet-a", "subnet-111");
        ids.record("subnet-b", "subnet-222");

        let desired = Some(vec![TaskRef::to("subnet-b"), TaskRef::to("subnet-a")]);
        let actual = Some(vec![
            TaskRef::with_id("subnet-111"),
            TaskRef::with_id("subnet-222"),
        ]);
        assert_eq!(reference_set(&actual, &desired, &ids), None);

        let partial = Some(vec![TaskRef::with_id("subnet-111")]);
        assert_eq!(reference_set(&partial, &desired, &ids), desired);
    }

    #[test]
    fn test_delta_from_empty_changes_is_unchanged() {
        #[derive(Debug, PartialEq)]
        struct NoFields;
        impl Changes for NoFields {
            fn is_empty(&self) -> bool {
                true
            }
        }
        assert!(Delta::from_changes(NoFields).is_unchanged());
    }
}

//! Run context, task registry and run-scoped services
//!
//! A [`Context`] is built once per run and shared by every worker. It owns
//! the cloud handle, the active target, the registered tasks and the tables
//! the tasks coordinate through (identities and named locks).

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::delta::Identities;
use crate::erased::{AnyTask, SharedTask};
use crate::error::{Error, Phase, Result};
use crate::lifecycle::{Lifecycle, LifecycleOverrides};
use crate::report::{RunReport, TaskOutcome};
use crate::retry::ErrorCode;
use crate::target::Target;
use crate::task::Task;

/// Name-keyed arena of the tasks in a run
pub struct Registry<C> {
    tasks: BTreeMap<String, SharedTask<C>>,
}

impl<C> Registry<C> {
    pub fn get(&self, name: &str) -> Option<&SharedTask<C>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SharedTask<C>)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All registered tasks of concrete type `T`
    pub fn of_type<T: Any>(&self) -> impl Iterator<Item = &T> {
        self.tasks
            .values()
            .filter_map(|t| t.as_any().downcast_ref::<T>())
    }
}

impl<C> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tasks.keys()).finish()
    }
}

/// Table of named mutexes for process-wide external resources
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock named `name`
    pub fn with_lock<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        log::trace!("holding lock {name}");
        f()
    }
}

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching tasks that have not started
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callbacks for a run
///
/// Called from the scheduling thread only, so implementations need not be
/// thread-safe.
pub trait Observer {
    /// Called once the graph is built, before any task runs
    fn on_run_start(&mut self, _total: usize) {}

    /// Called when an attempt of a task is dispatched
    fn on_task_start(&mut self, _name: &str, _attempt: u32) {}

    /// Called when a task asked to be retried later
    fn on_task_retry(&mut self, _name: &str, _attempt: u32, _delay: Duration, _reason: &str) {}

    /// Called when a task reaches its final outcome
    fn on_task_complete(&mut self, _name: &str, _outcome: &TaskOutcome) {}

    /// Called after the last task finished
    fn on_run_complete(&mut self, _report: &RunReport) {}
}

/// Observer that ignores every event
pub struct NoObserver;

impl Observer for NoObserver {}

/// Shared state of one run
pub struct Context<C> {
    cloud: C,
    target: Target,
    registry: Registry<C>,
    overrides: LifecycleOverrides,
    identities: Identities,
    locks: LockTable,
    config: EngineConfig,
    cancel: CancelToken,
}

impl<C> Context<C> {
    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn identities(&self) -> &Identities {
        &self.identities
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn overrides(&self) -> &LifecycleOverrides {
        &self.overrides
    }

    /// Effective lifecycle of a task after run-scoped overrides
    pub fn lifecycle_for(&self, name: &str, declared: Lifecycle) -> Lifecycle {
        self.overrides.resolve(name, declared)
    }

    /// Run `f` while holding the named lock, e.g. `"package-manager"`
    pub fn with_lock<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with_lock(name, f)
    }

    /// Map a cloud error raised while working on `task` to an engine error.
    ///
    /// Codes listed in the engine config become `TryAgainLater`; everything
    /// else is a discovery or render failure.
    pub fn classify<E>(&self, task: &str, phase: Phase, err: E) -> Error
    where
        E: ErrorCode + std::error::Error + Send + Sync + 'static,
    {
        self.config.classifier.classify(task, phase, err)
    }
}

impl<C> std::fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("target", &self.target.kind())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder<C> {
    cloud: C,
    target: Target,
    tasks: Vec<SharedTask<C>>,
    overrides: LifecycleOverrides,
    config: EngineConfig,
    cancel: CancelToken,
}

impl<C: Send + Sync + 'static> ContextBuilder<C> {
    pub fn new(cloud: C, target: Target) -> Self {
        Self {
            cloud,
            target,
            tasks: Vec::new(),
            overrides: LifecycleOverrides::new(),
            config: EngineConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn task<T: Task<C>>(mut self, task: T) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn shared_task(mut self, task: SharedTask<C>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = SharedTask<C>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn lifecycle_override(mut self, task: impl Into<String>, lifecycle: Lifecycle) -> Self {
        self.overrides.insert(task, lifecycle);
        self
    }

    pub fn lifecycle_overrides(mut self, overrides: LifecycleOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the context, rejecting duplicate task names
    pub fn build(self) -> Result<Context<C>> {
        let mut tasks: BTreeMap<String, SharedTask<C>> = BTreeMap::new();
        for task in self.tasks {
            let name = task.name().to_string();
            if tasks.contains_key(&name) {
                return Err(Error::DuplicateTask { name });
            }
            tasks.insert(name, task);
        }

        for name in self.overrides.names() {
            if !tasks.contains_key(name) {
                log::warn!("lifecycle override for unknown task {name}");
            }
        }

        Ok(Context {
            cloud: self.cloud,
            target: self.target,
            registry: Registry { tasks },
            overrides: self.overrides,
            identities: Identities::new(),
            locks: LockTable::new(),
            config: self.config,
            cancel: self.cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Changes;
    use crate::target::{TargetKind, TargetSet};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Debug)]
    struct Noop {
        name: String,
    }

    #[derive(Debug)]
    struct NoChanges;

    impl Changes for NoChanges {
        fn is_empty(&self) -> bool {
            true
        }
    }

    impl Task<()> for Noop {
        type Changes = NoChanges;

        fn name(&self) -> &str {
            &self.name
        }

        fn resource_type(&self) -> &'static str {
            "noop"
        }

        fn find(&self, _ctx: &Context<()>) -> Result<Option<Self>> {
            Ok(None)
        }

        fn changes(&self, _actual: &Self, _ids: &Identities) -> NoChanges {
            NoChanges
        }

        fn creation(&self) -> NoChanges {
            NoChanges
        }

        fn supported_targets(&self) -> TargetSet {
            TargetSet::ALL
        }
    }

    fn noop(name: &str) -> Noop {
        Noop {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_build_rejects_duplicate_names() {
        let err = ContextBuilder::new((), Target::new(TargetKind::Api))
            .task(noop("a"))
            .task(noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTask { name } if name == "a"));
    }

    #[test]
    fn test_registry_lookup_and_downcast() {
        let ctx = ContextBuilder::new((), Target::new(TargetKind::Api))
            .task(noop("b"))
            .task(noop("a"))
            .build()
            .unwrap();
        assert_eq!(ctx.registry().names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(ctx.registry().contains("a"));
        assert_eq!(ctx.registry().of_type::<Noop>().count(), 2);
        assert_eq!(ctx.registry().of_type::<String>().count(), 0);
    }

    #[test]
    fn test_lifecycle_override_applies() {
        let ctx = ContextBuilder::new((), Target::new(TargetKind::Api))
            .task(noop("a"))
            .lifecycle_override("a", Lifecycle::Absent)
            .build()
            .unwrap();
        assert_eq!(ctx.lifecycle_for("a", Lifecycle::Sync), Lifecycle::Absent);
        assert_eq!(ctx.lifecycle_for("b", Lifecycle::Sync), Lifecycle::Sync);
    }

    #[test]
    fn test_named_lock_serializes_holders() {
        let locks = Arc::new(LockTable::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    locks.with_lock("package-manager", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}

//! Scheduler - walks the task graph on a bounded worker pool
//!
//! The main thread owns all bookkeeping. Workers run one task attempt each
//! and report back over a channel:
//! 1. Tasks whose dependencies have all converged are spawned on the pool.
//! 2. A converged task releases its dependents.
//! 3. `TryAgainLater` puts the task in a delay queue with exponential
//!    backoff, until the attempt ceiling turns it into a failure.
//! 4. A failed task marks every transitive dependent skipped; independent
//!    branches keep going.
//! 5. Cancellation stops dispatch and waits for in-flight attempts.

use crossbeam_channel::{RecvTimeoutError, unbounded};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{Context, NoObserver, Observer};
use crate::erased::AnyTask;
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::lifecycle::Lifecycle;
use crate::report::{Converged, RunReport, TaskOutcome};

/// How often the main loop checks for cancellation while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Completion = (String, u32, Result<Converged>);

/// Converge every task in the context
///
/// Returns the report when all tasks converged, `Error::RunFailed` carrying
/// the same report otherwise. Configuration errors (cycles, unknown
/// dependencies, unsupported targets) are returned before any task runs.
pub fn run<C: Send + Sync + 'static>(ctx: &Arc<Context<C>>) -> Result<RunReport> {
    run_with(ctx, &mut NoObserver)
}

/// [`run`] with progress callbacks
pub fn run_with<C, O>(ctx: &Arc<Context<C>>, observer: &mut O) -> Result<RunReport>
where
    C: Send + Sync + 'static,
    O: Observer,
{
    let graph = TaskGraph::for_run(ctx)?;
    check_targets(ctx)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config().jobs.max(1))
        .thread_name(|i| format!("converge-{i}"))
        .build()?;

    let mut scheduler = Scheduler::new(ctx, &graph);
    observer.on_run_start(graph.len());
    log::info!(
        "converging {} tasks on {} workers ({} target{})",
        graph.len(),
        ctx.config().jobs.max(1),
        ctx.target().kind(),
        if ctx.config().dry_run { ", dry run" } else { "" }
    );

    let (tx, rx) = unbounded::<Completion>();

    loop {
        scheduler.promote_due(Instant::now());

        if ctx.cancel_token().is_cancelled() {
            scheduler.cancel_unstarted(observer);
        } else {
            while let Some(name) = scheduler.ready.pop_first() {
                let Some(task) = ctx.registry().get(&name) else {
                    continue;
                };
                let attempt = scheduler.start(&name);
                observer.on_task_start(&name, attempt);

                let task = Arc::clone(task);
                let worker_ctx = Arc::clone(ctx);
                let tx = tx.clone();
                pool.spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| task.converge(worker_ctx)))
                        .unwrap_or_else(|panic| {
                            Err(Error::Panicked {
                                task: name.clone(),
                                message: panic_message(panic.as_ref()),
                            })
                        });
                    let _ = tx.send((name, attempt, result));
                });
            }
        }

        if scheduler.is_idle() {
            break;
        }

        let wait = scheduler
            .next_due()
            .map_or(POLL_INTERVAL, |due| {
                due.saturating_duration_since(Instant::now()).min(POLL_INTERVAL)
            });
        match rx.recv_timeout(wait) {
            Ok((name, attempt, result)) => {
                scheduler.complete(&name, attempt, result, observer);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let report = scheduler.report;
    let summary = report.summary();
    log::info!(
        "run finished: {} unchanged, {} changed, {} warned, {} failed, {} skipped, {} cancelled",
        summary.unchanged,
        summary.changed,
        summary.warned,
        summary.failed,
        summary.skipped,
        summary.cancelled
    );
    observer.on_run_complete(&report);
    report.into_result()
}

/// Fail fast when an active task cannot render to the run's target
fn check_targets<C>(ctx: &Context<C>) -> Result<()> {
    let kind = ctx.target().kind();
    for (name, task) in ctx.registry().iter() {
        if ctx.lifecycle_for(name, task.lifecycle()) == Lifecycle::Ignore {
            continue;
        }
        if !task.supported_targets().contains(kind) {
            return Err(Error::unsupported_target(name, task.resource_type(), kind));
        }
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Bookkeeping for one run; lives on the main thread
struct Scheduler<'a, C> {
    ctx: &'a Context<C>,
    graph: &'a TaskGraph,
    /// Unmet dependency count per task not yet dispatched
    waiting: HashMap<String, usize>,
    ready: BTreeSet<String>,
    delayed: BinaryHeap<Reverse<(Instant, String)>>,
    running: HashSet<String>,
    attempts: HashMap<String, u32>,
    report: RunReport,
}

impl<'a, C> Scheduler<'a, C> {
    fn new(ctx: &'a Context<C>, graph: &'a TaskGraph) -> Self {
        let mut waiting = HashMap::new();
        let mut ready = BTreeSet::new();
        for name in ctx.registry().names() {
            let deps = graph.dependencies(name).len();
            if deps == 0 {
                ready.insert(name.to_string());
            } else {
                waiting.insert(name.to_string(), deps);
            }
        }
        Self {
            ctx,
            graph,
            waiting,
            ready,
            delayed: BinaryHeap::new(),
            running: HashSet::new(),
            attempts: HashMap::new(),
            report: RunReport::new(ctx.config().dry_run),
        }
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.ready.is_empty() && self.delayed.is_empty()
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((due, _))| *due)
    }

    /// Move delayed tasks whose backoff elapsed back to the ready set
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((due, _))) = self.delayed.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, name))) = self.delayed.pop() {
                self.ready.insert(name);
            }
        }
    }

    fn start(&mut self, name: &str) -> u32 {
        self.running.insert(name.to_string());
        let attempt = self.attempts.entry(name.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    fn finish<O: Observer>(&mut self, name: &str, outcome: TaskOutcome, observer: &mut O) {
        observer.on_task_complete(name, &outcome);
        self.report.record(name, outcome);
    }

    fn complete<O: Observer>(
        &mut self,
        name: &str,
        attempt: u32,
        result: Result<Converged>,
        observer: &mut O,
    ) {
        self.running.remove(name);
        let ctx = self.ctx;
        let cancelled = ctx.cancel_token().is_cancelled();

        match result {
            Ok(converged) => {
                self.finish(
                    name,
                    TaskOutcome::Converged {
                        result: converged,
                        attempts: attempt,
                    },
                    observer,
                );
                self.release_dependents(name);
            }
            Err(err) if err.is_retryable() && cancelled => {
                log::debug!("{name}: not retried, run cancelled ({err})");
                self.finish(name, TaskOutcome::Cancelled, observer);
            }
            Err(err) if err.is_retryable() => {
                let reason = match err {
                    Error::TryAgainLater { reason } => reason,
                    other => other.to_string(),
                };
                let retry = &ctx.config().retry;
                if attempt >= retry.max_attempts {
                    log::warn!("{name}: giving up after {attempt} attempts: {reason}");
                    let error = Error::RetriesExhausted {
                        task: name.to_string(),
                        attempts: attempt,
                        reason,
                    };
                    self.fail(name, error, attempt, observer);
                } else {
                    let delay = retry.delay_for_attempt(attempt - 1);
                    log::info!("{name}: {reason}; retrying in {delay:?} (attempt {attempt})");
                    observer.on_task_retry(name, attempt, delay, &reason);
                    self.delayed
                        .push(Reverse((Instant::now() + delay, name.to_string())));
                }
            }
            Err(err) => {
                log::error!("{name}: {err}");
                self.fail(name, err, attempt, observer);
            }
        }
    }

    fn release_dependents(&mut self, name: &str) {
        let graph = self.graph;
        for dependent in graph.dependents(name) {
            if self.report.get(dependent).is_some() {
                continue;
            }
            if let Some(count) = self.waiting.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    self.waiting.remove(dependent);
                    self.ready.insert(dependent.to_string());
                }
            }
        }
    }

    fn fail<O: Observer>(&mut self, name: &str, error: Error, attempts: u32, observer: &mut O) {
        self.finish(name, TaskOutcome::Failed { error, attempts }, observer);
        for dependent in self.graph.transitive_dependents(name) {
            if self.report.get(&dependent).is_some() {
                continue;
            }
            log::warn!("{dependent}: skipped, dependency {name} failed");
            self.waiting.remove(&dependent);
            self.ready.remove(&dependent);
            self.finish(
                &dependent,
                TaskOutcome::Skipped {
                    blocked_by: name.to_string(),
                },
                observer,
            );
        }
    }

    /// Mark every task that has not started as cancelled
    fn cancel_unstarted<O: Observer>(&mut self, observer: &mut O) {
        let unstarted: Vec<String> = self
            .ctx
            .registry()
            .names()
            .filter(|n| self.report.get(n).is_none() && !self.running.contains(*n))
            .map(str::to_string)
            .collect();
        if !unstarted.is_empty() {
            log::warn!("run cancelled; {} tasks not started", unstarted.len());
        }
        for name in unstarted {
            self.finish(&name, TaskOutcome::Cancelled, observer);
        }
        self.ready.clear();
        self.delayed.clear();
        self.waiting.clear();
    }
}

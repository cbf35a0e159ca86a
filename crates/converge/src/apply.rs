//! One attempt of the discover, diff, check, render protocol for a task

use crossbeam_channel::RecvTimeoutError;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::context::{CancelToken, Context};
use crate::delta::{Changes, Delta};
use crate::error::{Error, Phase, Result};
use crate::lifecycle::{Decision, Lifecycle, Observed, decide};
use crate::report::{Action, Converged};
use crate::target;
use crate::task::Task;

/// Drive `task` through a single attempt against the context's target.
///
/// `TryAgainLater` from any phase is returned as is; the scheduler owns the
/// retry loop.
pub(crate) fn converge_task<C, T>(task: Arc<T>, ctx: Arc<Context<C>>) -> Result<Converged>
where
    C: Send + Sync + 'static,
    T: Task<C>,
{
    let name = task.name().to_string();
    let lifecycle = ctx.lifecycle_for(&name, task.lifecycle());
    if lifecycle == Lifecycle::Ignore {
        log::debug!("{name}: lifecycle ignore, not discovered");
        return Ok(Converged::new(Action::Ignored));
    }

    let timeout = ctx.config().call_timeout;
    let kind = ctx.target().kind();
    let discover =
        kind.checks_existing() || !matches!(lifecycle, Lifecycle::Sync | Lifecycle::Absent);

    let actual: Option<T> = if discover {
        let (t, c) = (Arc::clone(&task), Arc::clone(&ctx));
        call_with_timeout(&name, Phase::Discover, timeout, move || t.find(&c))?
    } else {
        log::trace!("{name}: {kind} target renders without discovery");
        None
    };

    if let Some(id) = actual.as_ref().and_then(|a| a.identity()) {
        ctx.identities().record(&name, id);
    }

    let (observed, diff) = match &actual {
        None => (Observed::NoResource, None),
        Some(a) => {
            let changes = task.changes(a, ctx.identities());
            if changes.is_empty() {
                (Observed::Unchanged, None)
            } else {
                (Observed::Drifted, Some(changes))
            }
        }
    };

    let delta = match decide(lifecycle, observed, &ctx.config().lifecycle) {
        Decision::Noop => {
            log::debug!("{name}: up to date");
            return Ok(Converged::new(Action::Unchanged));
        }
        Decision::Warn(message) => {
            log::warn!("{name}: {message}");
            return Ok(match diff {
                Some(changes) => Converged::with_changes(Action::Warned, changes),
                None => Converged::new(Action::Warned),
            });
        }
        Decision::Fail(message) => {
            return Err(Error::LifecycleViolation {
                task: name,
                lifecycle,
                message,
            });
        }
        Decision::Create => Delta::Create(task.creation()),
        Decision::Update => match diff {
            Some(changes) => Delta::Update(changes),
            None => return Ok(Converged::new(Action::Unchanged)),
        },
        Decision::Delete => Delta::Delete,
    };

    match &delta {
        Delta::Create(changes) => task.check_changes(None, changes)?,
        Delta::Update(changes) => task.check_changes(actual.as_ref(), changes)?,
        Delta::Unchanged | Delta::Delete => {}
    }

    let Some(change) = delta.kind() else {
        return Ok(Converged::new(Action::Unchanged));
    };
    let summary = delta.changes().map(|c| format!("{c:?}"));

    if ctx.config().dry_run {
        log::info!("{name}: would {change}");
        return Ok(Converged {
            action: Action::Planned(change),
            changes: summary,
        });
    }

    let (t, c) = (Arc::clone(&task), Arc::clone(&ctx));
    call_with_timeout(&name, Phase::Render, timeout, move || {
        target::dispatch(&*t, &c, actual.as_ref(), &delta)
    })?;

    log::info!("{name}: {change}d {}", task.resource_type());
    Ok(Converged {
        action: Action::Applied(change),
        changes: summary,
    })
}

/// The find or render call running on this thread
struct CallScope {
    task: String,
    abandoned: CancelToken,
}

thread_local! {
    static CALL: RefCell<Option<CallScope>> = const { RefCell::new(None) };
}

/// Name of the task whose call on this thread was given up on, if any.
///
/// Target writes check this before touching the cloud or an output document,
/// so a call that outlives its timeout cannot apply anything afterwards.
pub(crate) fn abandoned_call() -> Option<String> {
    CALL.with(|call| {
        call.borrow()
            .as_ref()
            .filter(|scope| scope.abandoned.is_cancelled())
            .map(|scope| scope.task.clone())
    })
}

/// Run `f` on its own thread and give up after `timeout`.
///
/// A call that times out is abandoned: its thread keeps running until `f`
/// returns, its result is discarded, and any target write it attempts from
/// then on is refused with [`Error::Abandoned`].
fn call_with_timeout<R, F>(task: &str, phase: Phase, timeout: Duration, f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let abandoned = CancelToken::new();
    let scope = CallScope {
        task: task.to_string(),
        abandoned: abandoned.clone(),
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name(format!("{task}-{phase}"))
        .spawn(move || {
            CALL.with(|call| *call.borrow_mut() = Some(scope));
            let _ = tx.send(f());
        })
        .map_err(|e| phase_error(task, phase, e.into()))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            abandoned.cancel();
            log::warn!("{task}: {phase} call abandoned after {timeout:?}");
            Err(Error::Timeout {
                task: task.to_string(),
                phase,
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Panicked {
            task: task.to_string(),
            message: format!("{phase} call did not return"),
        }),
    }
}

fn phase_error(task: &str, phase: Phase, source: anyhow::Error) -> Error {
    match phase {
        Phase::Discover => Error::discovery(task, source),
        Phase::Render => Error::render(task, source),
    }
}

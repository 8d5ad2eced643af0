//! Delayed background actions.
//!
//! The read-committed locks re-release tags after the replica propagation
//! delay so that replicas which served a stale token during the lag converge.
//! That action runs detached from the caller through a [`Scheduler`].
//!
//! - [`TokioScheduler`] spawns a timer task on the ambient tokio runtime.
//! - [`ManualScheduler`] queues tasks until a test advances its clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

/// Runs a future once a delay has elapsed, without blocking the caller.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask;
}

/// Handle to a scheduled action.
///
/// Dropping the handle does not cancel the action.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl ScheduledTask {
    fn new(abort: Option<tokio::task::AbortHandle>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort,
        }
    }

    /// A handle to an action that will never run.
    fn dropped() -> Self {
        let task = Self::new(None);
        task.cancelled.store(true, Ordering::SeqCst);
        task
    }

    /// Prevent the action from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TOKIO
// ============================================================================

/// Scheduler backed by `tokio::spawn` and `tokio::time::sleep`.
///
/// Must be used from within a tokio runtime. Outside one the action is
/// dropped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "No tokio runtime; delayed action dropped"
                );
                return ScheduledTask::dropped();
            }
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let join = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task.await;
            }
        });

        ScheduledTask {
            cancelled,
            abort: Some(join.abort_handle()),
        }
    }
}

// ============================================================================
// MANUAL
// ============================================================================

struct PendingTask {
    due: Duration,
    cancelled: Arc<AtomicBool>,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Vec<PendingTask>,
}

/// Scheduler driven by an explicit virtual clock.
///
/// Scheduled actions only run from [`ManualScheduler::advance`], in due order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of actions still waiting, cancelled ones excluded.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .pending
                    .iter()
                    .filter(|p| !p.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.state.lock().map(|state| state.now).unwrap_or_default()
    }

    /// Move the clock forward and run every action that became due.
    ///
    /// Returns how many actions ran.
    pub async fn advance(&self, by: Duration) -> usize {
        let mut due = {
            let Ok(mut state) = self.state.lock() else {
                return 0;
            };
            state.now += by;
            let now = state.now;
            let (due, waiting): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|p| p.due <= now);
            state.pending = waiting;
            due
        };
        due.sort_by_key(|p| p.due);

        let mut ran = 0;
        for pending in due {
            if pending.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            pending.task.await;
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask {
        let handle = ScheduledTask::new(None);
        match self.state.lock() {
            Ok(mut state) => {
                let due = state.now + delay;
                state.pending.push(PendingTask {
                    due,
                    cancelled: Arc::clone(&handle.cancelled),
                    task,
                });
                handle
            }
            Err(_) => ScheduledTask::dropped(),
        }
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

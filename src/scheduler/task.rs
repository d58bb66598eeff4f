use super::Schedule;
use super::queue::TaskId;
use super::timer::Shared;
use crate::error::{LifecycleError, Result};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::warn;

/// Body of a scheduled task
///
/// Implemented for any `Fn() -> anyhow::Result<()>` closure. Errors and
/// panics are logged; returning an error whose chain contains a
/// [`Fatal`](crate::Fatal) cancels the task.
pub trait Task: Send + Sync + 'static {
    fn run(&self) -> anyhow::Result<()>;
}

impl<F> Task for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn run(&self) -> anyhow::Result<()> {
        self()
    }
}

/// A run that started later than the configured late-run tolerance
#[derive(Debug, Clone)]
pub struct LateRun {
    pub task_id: TaskId,
    pub name: Arc<str>,
    /// When the run was due
    pub nominal: Instant,
    /// When it actually started
    pub started: Instant,
    pub lateness: Duration,
}

/// What to do with a late run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateRunDecision {
    Run,
    /// Skip this run; the task is rescheduled as if it had run
    Skip,
}

pub(crate) type LateRunHook = Arc<dyn Fn(&LateRun) -> LateRunDecision + Send + Sync>;

pub(crate) fn warn_and_run(late: &LateRun) -> LateRunDecision {
    warn!(
        task = %late.name,
        lateness_ms = late.lateness.as_millis() as u64,
        "scheduled task is running late"
    );
    LateRunDecision::Run
}

/// Handle to a scheduled task
///
/// Handles do not keep the scheduler alive. Once the scheduler is dropped
/// every operation reports the task as no longer scheduled.
#[derive(Clone)]
pub struct Handle {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) scheduler: Weak<Shared>,
}

impl Handle {
    /// Handle for a task that was never queued
    pub(crate) fn inert(id: TaskId, name: Arc<str>) -> Self {
        Self {
            id,
            name,
            scheduler: Weak::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop all future runs of the task
    ///
    /// A run already in progress finishes. Returns whether the task was
    /// still scheduled; calling it again returns `false`.
    pub fn cancel(&self) -> bool {
        match self.scheduler.upgrade() {
            Some(shared) => shared.cancel(self.id),
            None => false,
        }
    }

    /// Replace the schedule, computing the next run from now
    ///
    /// Fails with `IllegalState` if the task was cancelled or the scheduler
    /// is shutting down.
    pub fn reschedule(&self, schedule: Schedule) -> Result<()> {
        let shared = self.scheduler.upgrade().ok_or_else(|| {
            LifecycleError::illegal_state(format!("scheduler for task '{}' is gone", self.name))
        })?;
        shared.reschedule(self.id, schedule)
    }

    /// Next instant the task is due, `None` once it will not run again
    pub fn next_run(&self) -> Option<Instant> {
        self.scheduler
            .upgrade()
            .and_then(|shared| shared.next_run(self.id))
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|shared| shared.contains(self.id))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

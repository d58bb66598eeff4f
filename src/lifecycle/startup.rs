//! Parallel startup with automatic shutdown on failure

use super::hook::{Hook, HookOutcome};
use super::{Phase, ShutdownCoordinator, ShutdownReport};
use crate::error::{HookFailure, LifecycleError, Result};
use crate::sync::{Latch, Promise};
use crate::worker::Executor;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::{debug, error, info, warn};

/// A named startup action
pub struct StartupAction {
    hook: Hook,
}

impl StartupAction {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            hook: Hook::new(name, action),
        }
    }

    pub fn name(&self) -> &str {
        self.hook.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StartupStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Outcome of [`StartupCoordinator::start`]
#[derive(Debug, Clone)]
pub struct StartupReport {
    status: StartupStatus,
    failures: Arc<[HookFailure]>,
    skipped: usize,
    elapsed: Duration,
    timeout: Duration,
    shutdown: Option<ShutdownReport>,
}

impl StartupReport {
    pub fn status(&self) -> StartupStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == StartupStatus::Succeeded
    }

    /// Failed actions. Empty on success and on timeout.
    pub fn failures(&self) -> &[HookFailure] {
        &self.failures
    }

    /// Actions that were not run because an earlier action had already failed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Report of the shutdown triggered by a failed or timed-out startup
    pub fn shutdown(&self) -> Option<&ShutdownReport> {
        self.shutdown.as_ref()
    }

    /// Convert a failed or timed-out startup into an error
    pub fn into_result(self) -> Result<()> {
        match self.status {
            StartupStatus::Succeeded => Ok(()),
            StartupStatus::TimedOut => Err(LifecycleError::timeout(
                Phase::Startup.to_string(),
                format!("startup did not complete within {:?}", self.timeout),
            )),
            StartupStatus::Failed => Err(LifecycleError::StartupFailed {
                failures: self.failures.len(),
                first: self
                    .failures
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            }),
        }
    }
}

/// Runs startup actions in parallel inside a shutdown-preventing section.
///
/// Only the first call to [`start`](Self::start) runs the actions; every
/// later call receives the same outcome. A failed or timed-out startup
/// performs a full shutdown before returning.
///
/// # Example
///
/// ```rust
/// use lifecore::lifecycle::{ShutdownCoordinator, StartupAction, StartupCoordinator};
/// use lifecore::worker::InlineExecutor;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let executor = Arc::new(InlineExecutor);
/// let shutdown = ShutdownCoordinator::new(executor.clone());
/// let startup = StartupCoordinator::new(executor, shutdown)
///     .with_actions([StartupAction::new("warm-cache", || Ok(()))]);
///
/// let report = startup.start(Duration::ZERO).unwrap();
/// assert!(report.is_success());
/// ```
pub struct StartupCoordinator {
    executor: Arc<dyn Executor>,
    shutdown: ShutdownCoordinator,
    actions: Mutex<Vec<StartupAction>>,
    claimed: AtomicBool,
    outcome: Promise<Result<StartupReport>>,
}

impl StartupCoordinator {
    pub fn new(executor: Arc<dyn Executor>, shutdown: ShutdownCoordinator) -> Self {
        Self {
            executor,
            shutdown,
            actions: Mutex::new(Vec::new()),
            claimed: AtomicBool::new(false),
            outcome: Promise::new(),
        }
    }

    pub fn with_actions(self, actions: impl IntoIterator<Item = StartupAction>) -> Self {
        self.actions.lock().extend(actions);
        self
    }

    /// Add an action; fails once startup has begun
    pub fn add_action(&self, action: StartupAction) -> Result<()> {
        if self.claimed.load(Ordering::Acquire) {
            return Err(LifecycleError::illegal_state(format!(
                "cannot add startup action '{}': startup already began",
                action.name()
            )));
        }
        self.actions.lock().push(action);
        Ok(())
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// The startup outcome, once startup has finished
    pub fn outcome(&self) -> Option<Result<StartupReport>> {
        self.outcome.get()
    }

    /// Run every action and wait for them, at most `timeout` (zero waits
    /// indefinitely).
    ///
    /// Errors are reserved for protocol violations (shutdown already
    /// announced), fatal action errors and lost results; ordinary failures
    /// and timeouts are described by the report.
    pub fn start(&self, timeout: Duration) -> Result<StartupReport> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Startup already claimed, waiting for its outcome");
            return self.outcome.wait();
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run(timeout))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.outcome.complete(Err(LifecycleError::interrupted(
                    "thread running startup panicked",
                )));
                panic::resume_unwind(payload);
            }
        };
        self.outcome.complete(outcome.clone());
        outcome
    }

    fn run(&self, timeout: Duration) -> Result<StartupReport> {
        let actions = std::mem::take(&mut *self.actions.lock());
        info!("Starting application ({} startup actions)...", actions.len());
        let started = Instant::now();

        let fan_out = self
            .shutdown
            .run_preventing_shutdown(|| self.fan_out(actions, timeout))
            .inspect_err(|e| error!("Startup refused: {}", e))?;

        let elapsed = started.elapsed();
        let status = if fan_out.timed_out {
            StartupStatus::TimedOut
        } else if fan_out.failures.is_empty() && fan_out.fatal.is_none() {
            StartupStatus::Succeeded
        } else {
            StartupStatus::Failed
        };

        if status == StartupStatus::Succeeded {
            info!("Application started in {:?}", elapsed);
            return Ok(StartupReport {
                status,
                failures: Arc::from([]),
                skipped: fan_out.skipped,
                elapsed,
                timeout,
                shutdown: None,
            });
        }

        match status {
            StartupStatus::TimedOut => {
                error!("Startup did not complete within {:?}, shutting down", timeout)
            }
            _ => error!(
                failures = fan_out.failures.len(),
                "Startup failed, shutting down"
            ),
        }
        let shutdown = self.shutdown.perform_shutdown();

        if let Some(fatal) = fan_out.fatal {
            return Err(fatal.into_fatal());
        }
        let shutdown = shutdown?;
        let failures = if status == StartupStatus::TimedOut {
            Vec::new()
        } else {
            fan_out.failures
        };

        Ok(StartupReport {
            status,
            failures: failures.into(),
            skipped: fan_out.skipped,
            elapsed,
            timeout,
            shutdown: Some(shutdown),
        })
    }

    fn fan_out(&self, actions: Vec<StartupAction>, timeout: Duration) -> FanOut {
        let shared = Arc::new(StartupShared {
            latch: Latch::new(actions.len()),
            failures: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            skipped: AtomicUsize::new(0),
        });

        for action in actions {
            let name = action.name().to_string();
            let slot = ActionSlot {
                action: Some(action),
                shared: Arc::clone(&shared),
                shutdown: self.shutdown.clone(),
            };
            if let Err(e) = self.executor.execute(Box::new(move || slot.run())) {
                error!(action = %name, "Executor rejected startup action: {}", e);
            }
        }

        let completed = if timeout.is_zero() {
            shared.latch.wait();
            true
        } else {
            shared.latch.wait_timeout(timeout)
        };
        if !completed {
            warn!(
                outstanding = shared.latch.count(),
                "Startup actions still running at timeout"
            );
        }

        FanOut {
            timed_out: !completed,
            failures: shared.failures.lock().clone(),
            fatal: shared.fatal.lock().clone(),
            skipped: shared.skipped.load(Ordering::Acquire),
        }
    }
}

struct FanOut {
    timed_out: bool,
    failures: Vec<HookFailure>,
    fatal: Option<HookFailure>,
    skipped: usize,
}

struct StartupShared {
    latch: Latch,
    failures: Mutex<Vec<HookFailure>>,
    fatal: Mutex<Option<HookFailure>>,
    skipped: AtomicUsize,
}

impl StartupShared {
    fn has_failed(&self) -> bool {
        !self.failures.lock().is_empty() || self.fatal.lock().is_some()
    }

    fn record(&self, outcome: HookOutcome, shutdown: &ShutdownCoordinator) {
        match outcome {
            HookOutcome::Completed => return,
            HookOutcome::Failed(failure) => self.failures.lock().push(failure),
            HookOutcome::Fatal(failure) => {
                self.fatal.lock().get_or_insert(failure);
            }
        }
        shutdown.announce_shutdown();
    }
}

/// One action submitted to the executor; dropping it counts down the latch
struct ActionSlot {
    action: Option<StartupAction>,
    shared: Arc<StartupShared>,
    shutdown: ShutdownCoordinator,
}

impl ActionSlot {
    fn run(mut self) {
        let Some(action) = self.action.take() else {
            return;
        };
        if self.shared.has_failed() {
            debug!(action = %action.name(), "Skipping startup action: startup already failed");
            self.shared.skipped.fetch_add(1, Ordering::AcqRel);
            return;
        }
        let outcome = action.hook.invoke(Phase::Startup);
        self.shared.record(outcome, &self.shutdown);
    }
}

impl Drop for ActionSlot {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            let name = action.name().to_string();
            let error = LifecycleError::Rejected { task: name.clone() };
            self.shared.record(
                HookOutcome::Failed(HookFailure::new(Phase::Startup, name, error.into())),
                &self.shutdown,
            );
        }
        self.shared.latch.count_down();
    }
}

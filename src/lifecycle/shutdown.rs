//! Phased shutdown coordination
//!
//! Shutdown runs three barrier-separated phases:
//!
//! ```text
//! DORMANT → ANNOUNCED → INITIATED ──(no prevention sections left)──┐
//!                                                                   ↓
//!      PREPARING (concurrent on the executor)                       │
//!          ↓ barrier                                                │
//!      PERFORMING (concurrent on the executor)                      │
//!          ↓ barrier                                                │
//!      FINALIZING (serial, on the thread calling perform_shutdown)  │
//!          ↓                                                        │
//!      COMPLETE  ←──────────────────────────────────────────────────┘
//! ```

use super::hook::{Hook, HookOutcome};
use super::{Phase, ShutdownState};
use crate::error::{HookFailure, LifecycleError, Result};
use crate::sync::{Latch, Promise};
use crate::worker::Executor;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often a blocked shutdown reports the prevention sections it waits for
const PENDING_LOG_INTERVAL: Duration = Duration::from_secs(5);

thread_local! {
    static RUNNING_SHUTDOWN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Aggregated result of a shutdown
///
/// An empty failure list means every hook completed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    failures: Arc<[HookFailure]>,
}

impl ShutdownReport {
    pub fn failures(&self) -> &[HookFailure] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failed hook as an error, if any hook failed
    pub fn into_result(self) -> Result<()> {
        match self.failures.first() {
            None => Ok(()),
            Some(failure) => Err(LifecycleError::hook_failed(
                failure.name(),
                format!("{failure} ({} hook(s) failed)", self.failures.len()),
            )),
        }
    }
}

type ShutdownOutcome = Result<ShutdownReport>;

/// Three-phase shutdown state machine with shutdown-preventing sections.
///
/// Cloning is cheap; all clones share one state machine.
///
/// # Example
///
/// ```rust
/// use lifecore::lifecycle::{ShutdownCoordinator, ShutdownState};
/// use lifecore::worker::InlineExecutor;
/// use std::sync::Arc;
///
/// let coordinator = ShutdownCoordinator::new(Arc::new(InlineExecutor));
/// coordinator.on_perform("listener", || Ok(())).unwrap();
///
/// let report = coordinator.perform_shutdown().unwrap();
/// assert!(report.is_clean());
/// assert_eq!(coordinator.state(), ShutdownState::Complete);
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<dyn Executor>,
    registry: Mutex<Registry>,
    changed: Condvar,
    claimed: AtomicBool,
    outcome: Promise<ShutdownOutcome>,
}

struct Registry {
    state: ShutdownState,
    preventing: usize,
    prepare: Vec<Hook>,
    perform: Vec<Hook>,
    finalize: Vec<Hook>,
}

impl Registry {
    fn advance(&mut self, to: ShutdownState) -> bool {
        if self.state >= to {
            return false;
        }
        debug!(from = %self.state, to = %to, "shutdown state changed");
        self.state = to;
        true
    }

    fn hooks_mut(&mut self, phase: Phase) -> Option<&mut Vec<Hook>> {
        match phase {
            Phase::Prepare => Some(&mut self.prepare),
            Phase::Perform => Some(&mut self.perform),
            Phase::Finalize => Some(&mut self.finalize),
            Phase::Startup => None,
        }
    }
}

impl ShutdownCoordinator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                registry: Mutex::new(Registry {
                    state: ShutdownState::Dormant,
                    preventing: 0,
                    prepare: Vec::new(),
                    perform: Vec::new(),
                    finalize: Vec::new(),
                }),
                changed: Condvar::new(),
                claimed: AtomicBool::new(false),
                outcome: Promise::new(),
            }),
        }
    }

    /// Register a hook for the prepare phase
    ///
    /// Fails once the coordinator has reached `PREPARING`.
    pub fn on_prepare<F>(&self, name: impl Into<String>, hook: F) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.register(Phase::Prepare, Hook::new(name, hook))
    }

    /// Register a hook for the perform phase
    ///
    /// Fails once the coordinator has reached `PERFORMING`.
    pub fn on_perform<F>(&self, name: impl Into<String>, hook: F) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.register(Phase::Perform, Hook::new(name, hook))
    }

    /// Register a hook for the finalize phase
    ///
    /// Finalize hooks run one after another on the thread that performs the
    /// shutdown, never on the executor. Fails once the coordinator has
    /// reached `FINALIZING`.
    pub fn on_finalize<F>(&self, name: impl Into<String>, hook: F) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.register(Phase::Finalize, Hook::new(name, hook))
    }

    fn register(&self, phase: Phase, hook: Hook) -> Result<()> {
        let mut registry = self.inner.registry.lock();
        let state = registry.state;
        let starts_at = phase.shutdown_state().ok_or_else(|| {
            LifecycleError::illegal_state(format!("{phase} is not a shutdown phase"))
        })?;
        if state >= starts_at {
            return Err(LifecycleError::illegal_state(format!(
                "cannot register {phase} hook '{}': shutdown is already {state}",
                hook.name()
            )));
        }
        if self.inner.outcome.get().is_some() {
            return Err(LifecycleError::illegal_state(format!(
                "cannot register {phase} hook '{}': shutdown has already ended at {state}",
                hook.name()
            )));
        }
        if let Some(hooks) = registry.hooks_mut(phase) {
            hooks.push(hook);
        }
        Ok(())
    }

    /// Enter a shutdown-preventing section.
    ///
    /// While the returned guard is alive, shutdown cannot progress past
    /// `INITIATED`. Fails once shutdown has been announced.
    pub fn prevent_shutdown(&self) -> Result<PreventionGuard> {
        let mut registry = self.inner.registry.lock();
        if registry.state >= ShutdownState::Announced {
            return Err(LifecycleError::illegal_state(format!(
                "cannot prevent shutdown: shutdown is already {}",
                registry.state
            )));
        }
        registry.preventing += 1;
        Ok(PreventionGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Run `action` inside a shutdown-preventing section and return its value
    pub fn run_preventing_shutdown<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let _guard = self.prevent_shutdown()?;
        Ok(action())
    }

    /// Mark shutdown as imminent so new prevention sections fail fast
    pub fn announce_shutdown(&self) {
        let mut registry = self.inner.registry.lock();
        if registry.advance(ShutdownState::Announced) {
            info!("Shutdown announced");
            self.inner.changed.notify_all();
        }
    }

    /// Run the shutdown, or wait for the run already in progress.
    ///
    /// Every caller receives the same report. Hook failures are collected in
    /// the report; only fatal errors and lost results are returned as errors.
    /// Calling this from inside a shutdown hook is an error.
    pub fn perform_shutdown(&self) -> Result<ShutdownReport> {
        if RUNNING_SHUTDOWN_HOOK.with(Cell::get) {
            return Err(LifecycleError::illegal_state(
                "perform_shutdown called from inside a shutdown hook",
            ));
        }

        self.await_prevention_sections();

        if self
            .inner
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Shutdown already claimed, waiting for its outcome");
            return self.inner.outcome.wait();
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run_phases())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.inner.outcome.complete(Err(LifecycleError::interrupted(
                    "thread performing the shutdown panicked",
                )));
                panic::resume_unwind(payload);
            }
        };
        self.inner.outcome.complete(outcome.clone());
        outcome
    }

    fn await_prevention_sections(&self) {
        let mut registry = self.inner.registry.lock();
        if registry.advance(ShutdownState::Initiated) {
            info!("Shutdown initiated");
        }
        while registry.preventing > 0 {
            debug!(
                pending = registry.preventing,
                "Waiting for shutdown-preventing sections"
            );
            self.inner
                .changed
                .wait_for(&mut registry, PENDING_LOG_INTERVAL);
            if registry.preventing > 0 {
                warn!(
                    pending = registry.preventing,
                    "Shutdown still blocked by shutdown-preventing sections"
                );
            }
        }
    }

    fn run_phases(&self) -> ShutdownOutcome {
        info!("Starting graceful shutdown...");
        let mut failures = Vec::new();

        for phase in [Phase::Prepare, Phase::Perform] {
            let hooks = self.enter(phase);
            failures.extend(self.run_concurrently(phase, hooks)?);
        }

        let hooks = self.enter(Phase::Finalize);
        failures.extend(run_serially(Phase::Finalize, hooks)?);

        self.inner.registry.lock().advance(ShutdownState::Complete);
        if failures.is_empty() {
            info!("Graceful shutdown complete");
        } else {
            warn!(
                failures = failures.len(),
                "Shutdown complete with failed hooks"
            );
        }
        Ok(ShutdownReport {
            failures: failures.into(),
        })
    }

    /// Advance into `phase` and take its hooks
    fn enter(&self, phase: Phase) -> Vec<Hook> {
        let mut registry = self.inner.registry.lock();
        if let Some(state) = phase.shutdown_state() {
            registry.advance(state);
        }
        registry.hooks_mut(phase).map(std::mem::take).unwrap_or_default()
    }

    fn run_concurrently(&self, phase: Phase, hooks: Vec<Hook>) -> Result<Vec<HookFailure>> {
        info!("Calling {} hooks ({} registered)...", phase, hooks.len());
        if hooks.is_empty() {
            return Ok(Vec::new());
        }

        let latch = Arc::new(Latch::new(hooks.len()));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        for hook in hooks {
            let name = hook.name().to_string();
            let slot = PhaseSlot {
                phase,
                name: name.clone(),
                hook: Some(hook),
                latch: Arc::clone(&latch),
                outcomes: Arc::clone(&outcomes),
            };
            if let Err(e) = self.inner.executor.execute(Box::new(move || slot.run())) {
                error!(%phase, hook = %name, "Executor rejected hook: {}", e);
            }
        }

        latch.wait();
        let outcomes = std::mem::take(&mut *outcomes.lock());
        collect(outcomes)
    }

    pub fn state(&self) -> ShutdownState {
        self.inner.registry.lock().state
    }

    pub fn is_shutdown_announced(&self) -> bool {
        self.state() >= ShutdownState::Announced
    }

    /// Number of shutdown-preventing sections currently running
    pub fn preventing_count(&self) -> usize {
        self.inner.registry.lock().preventing
    }

    /// The shutdown outcome, once a shutdown has finished
    pub fn outcome(&self) -> Option<Result<ShutdownReport>> {
        self.inner.outcome.get()
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("ShutdownCoordinator")
            .field("state", &registry.state)
            .field("preventing", &registry.preventing)
            .field("prepare_hooks", &registry.prepare.len())
            .field("perform_hooks", &registry.perform.len())
            .field("finalize_hooks", &registry.finalize.len())
            .finish()
    }
}

fn run_serially(phase: Phase, hooks: Vec<Hook>) -> Result<Vec<HookFailure>> {
    info!("Calling {} hooks ({} registered)...", phase, hooks.len());
    let outcomes = hooks
        .into_iter()
        .map(|hook| in_hook_context(|| hook.invoke(phase)))
        .collect();
    collect(outcomes)
}

/// Split outcomes into ordinary failures, surfacing the first fatal error
fn collect(outcomes: Vec<HookOutcome>) -> Result<Vec<HookFailure>> {
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            HookOutcome::Completed => {}
            HookOutcome::Failed(failure) => failures.push(failure),
            HookOutcome::Fatal(failure) => return Err(failure.into_fatal()),
        }
    }
    Ok(failures)
}

fn in_hook_context<T>(f: impl FnOnce() -> T) -> T {
    let previous = RUNNING_SHUTDOWN_HOOK.with(|flag| flag.replace(true));
    let result = f();
    RUNNING_SHUTDOWN_HOOK.with(|flag| flag.set(previous));
    result
}

/// One hook submitted to the executor.
///
/// Dropping the slot counts down the phase barrier; a slot dropped before
/// its hook ran records a rejection failure.
struct PhaseSlot {
    phase: Phase,
    name: String,
    hook: Option<Hook>,
    latch: Arc<Latch>,
    outcomes: Arc<Mutex<Vec<HookOutcome>>>,
}

impl PhaseSlot {
    fn run(mut self) {
        if let Some(hook) = self.hook.take() {
            let phase = self.phase;
            let outcome = in_hook_context(|| hook.invoke(phase));
            self.outcomes.lock().push(outcome);
        }
    }
}

impl Drop for PhaseSlot {
    fn drop(&mut self) {
        if self.hook.take().is_some() {
            let error = LifecycleError::Rejected {
                task: self.name.clone(),
            };
            self.outcomes.lock().push(HookOutcome::Failed(HookFailure::new(
                self.phase,
                self.name.clone(),
                error.into(),
            )));
        }
        self.latch.count_down();
    }
}

/// Keeps shutdown from progressing past `INITIATED` while alive
#[must_use = "shutdown is only prevented while the guard is alive"]
pub struct PreventionGuard {
    inner: Arc<Inner>,
}

impl fmt::Debug for PreventionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("PreventionGuard")
            .field("state", &registry.state)
            .field("preventing", &registry.preventing)
            .finish()
    }
}

impl Drop for PreventionGuard {
    fn drop(&mut self) {
        let mut registry = self.inner.registry.lock();
        registry.preventing = registry.preventing.saturating_sub(1);
        self.inner.changed.notify_all();
    }
}

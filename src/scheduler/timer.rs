use super::queue::{QueueKey, TaskId, TaskQueue};
use super::task::{Handle, LateRun, LateRunDecision, LateRunHook, Task, warn_and_run};
use super::{Clock, MIN_INTERVAL, MonotonicClock, Schedule};
use crate::config::SchedulerConfig;
use crate::error::{Invocation, LifecycleError, Result, guarded, panic_message};
use crate::lifecycle::ShutdownCoordinator;
use crate::sync::Latch;
use crate::worker::Executor;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of a [`Scheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerStatus {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// Runs tasks on an executor according to their [`Schedule`]
///
/// One dedicated worker thread owns the queue and only dispatches; task
/// bodies run on the executor. Cloning is cheap and all clones drive the
/// same worker. Dropping the last clone stops the worker without waiting
/// for it.
///
/// # Example
///
/// ```rust
/// use lifecore::config::SchedulerConfig;
/// use lifecore::scheduler::{Schedule, Scheduler};
/// use lifecore::worker::WorkerPool;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pool = WorkerPool::new(2).unwrap();
/// let scheduler = Scheduler::new(Arc::new(pool), SchedulerConfig::default());
/// scheduler.start().unwrap();
///
/// let handle = scheduler.schedule_named(
///     "heartbeat",
///     Schedule::fixed_rate(Duration::ZERO, Duration::from_secs(30)),
///     || {
///         tracing::info!("alive");
///         Ok(())
///     },
/// );
/// assert!(handle.is_scheduled());
/// assert!(scheduler.shutdown(Duration::from_secs(1)));
/// ```
#[derive(Clone)]
pub struct Scheduler {
    owner: Arc<Owner>,
}

struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
    }
}

pub(crate) struct Shared {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
    late_run: LateRunHook,
    state: Mutex<TimerState>,
    wakeup: Condvar,
    exited: Latch,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct TimerState {
    status: SchedulerStatus,
    queue: TaskQueue,
    slots: HashMap<TaskId, Slot>,
}

struct Slot {
    name: Arc<str>,
    task: Arc<dyn Task>,
    schedule: Schedule,
    next_run: Option<Instant>,
    key: Option<QueueKey>,
    generation: u64,
}

/// A due task handed from the worker to the executor
struct Dispatch {
    id: TaskId,
    name: Arc<str>,
    task: Arc<dyn Task>,
    nominal: Instant,
    generation: u64,
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    executor: Arc<dyn Executor>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    late_run: LateRunHook,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Decide what happens to runs that start later than
    /// `late_run_tolerance`; the default logs a warning and runs.
    pub fn on_late_run<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LateRun) -> LateRunDecision + Send + Sync + 'static,
    {
        self.late_run = Arc::new(hook);
        self
    }

    /// Build the scheduler; a zero readjust duration is raised to
    /// [`MIN_INTERVAL`]
    pub fn build(mut self) -> Scheduler {
        if let Err(e) = self.config.validate() {
            warn!("{}, using {:?}", e, MIN_INTERVAL);
            self.config.readjust_duration = MIN_INTERVAL;
        }
        Scheduler {
            owner: Arc::new(Owner {
                shared: Arc::new(Shared {
                    config: self.config,
                    clock: self.clock,
                    executor: self.executor,
                    late_run: self.late_run,
                    state: Mutex::new(TimerState {
                        status: SchedulerStatus::NotStarted,
                        queue: TaskQueue::default(),
                        slots: HashMap::new(),
                    }),
                    wakeup: Condvar::new(),
                    exited: Latch::new(1),
                    worker: Mutex::new(None),
                }),
            }),
        }
    }
}

impl Scheduler {
    pub fn new(executor: Arc<dyn Executor>, config: SchedulerConfig) -> Self {
        Self::builder(executor).config(config).build()
    }

    pub fn builder(executor: Arc<dyn Executor>) -> SchedulerBuilder {
        SchedulerBuilder {
            executor,
            config: SchedulerConfig::default(),
            clock: Arc::new(MonotonicClock),
            late_run: Arc::new(warn_and_run),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.owner.shared
    }

    /// Spawn the worker thread
    ///
    /// Tasks scheduled before `start` are queued and run once it is called.
    pub fn start(&self) -> Result<()> {
        let shared = self.shared();
        let mut state = shared.state.lock();
        if state.status != SchedulerStatus::NotStarted {
            return Err(LifecycleError::illegal_state(format!(
                "scheduler cannot start, it is {}",
                state.status
            )));
        }

        let worker = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(shared.config.thread_name.clone())
            .spawn(move || run_worker(worker))
            .map_err(|e| LifecycleError::Executor(e.to_string()))?;
        *shared.worker.lock() = Some(handle);
        state.status = SchedulerStatus::Running;
        info!(
            thread = %shared.config.thread_name,
            queued = state.slots.len(),
            "scheduler started"
        );
        Ok(())
    }

    /// Schedule a task under a generated name
    pub fn schedule<T: Task>(&self, schedule: Schedule, task: T) -> Handle {
        let id = Uuid::new_v4();
        self.shared()
            .insert(id, Arc::from(format!("task-{id}")), schedule, Arc::new(task))
    }

    /// Schedule a task
    ///
    /// Once the scheduler is shutting down this is a no-op and the returned
    /// handle reports the task as not scheduled.
    pub fn schedule_named<T: Task>(
        &self,
        name: impl Into<String>,
        schedule: Schedule,
        task: T,
    ) -> Handle {
        let name: String = name.into();
        self.shared()
            .insert(Uuid::new_v4(), Arc::from(name), schedule, Arc::new(task))
    }

    /// Wake the worker so it re-evaluates the queue head
    pub fn realign(&self) {
        let shared = self.shared();
        let _state = shared.state.lock();
        shared.wakeup.notify_all();
    }

    /// Stop the worker and wait up to `timeout` for it to exit
    ///
    /// A zero timeout waits indefinitely. Runs already handed to the executor
    /// are not waited for. Returns whether the worker thread terminated;
    /// called from the worker thread itself it cannot, and returns `false`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let shared = self.shared();
        if shared.begin_shutdown() == SchedulerStatus::NotStarted {
            info!("scheduler stopped before it was started");
            return true;
        }

        let on_worker = shared
            .worker
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id());
        if on_worker {
            warn!("scheduler shutdown requested from its own worker thread");
            return false;
        }

        let exited = if timeout.is_zero() {
            shared.exited.wait();
            true
        } else {
            shared.exited.wait_timeout(timeout)
        };
        if !exited {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "scheduler worker did not stop in time"
            );
            return false;
        }

        let handle = shared.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                error!(
                    "scheduler worker panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
            info!("scheduler stopped");
        }
        shared.state.lock().status = SchedulerStatus::Stopped;
        true
    }

    /// Stop this scheduler in the prepare phase of `coordinator`
    ///
    /// The hook fails with a timeout if the worker does not exit within
    /// `timeout`.
    pub fn stop_on_prepare(
        &self,
        coordinator: &ShutdownCoordinator,
        timeout: Duration,
    ) -> Result<()> {
        let scheduler = self.clone();
        coordinator.on_prepare("scheduler", move || {
            if scheduler.shutdown(timeout) {
                Ok(())
            } else {
                Err(LifecycleError::timeout("prepare", "scheduler worker did not stop").into())
            }
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        self.shared().state.lock().status
    }

    /// Number of scheduled tasks, including ones currently running
    pub fn len(&self) -> usize {
        self.shared().state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared().state.lock();
        f.debug_struct("Scheduler")
            .field("status", &state.status)
            .field("tasks", &state.slots.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl Shared {
    fn insert(
        self: &Arc<Self>,
        id: TaskId,
        name: Arc<str>,
        schedule: Schedule,
        task: Arc<dyn Task>,
    ) -> Handle {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.status >= SchedulerStatus::ShuttingDown {
            debug!(task = %name, "scheduler is shutting down, task not scheduled");
            return Handle::inert(id, name);
        }
        let Some(at) = schedule.next_execution(&*self.clock, None, None) else {
            debug!(task = %name, "schedule has no run, task not scheduled");
            return Handle::inert(id, name);
        };

        let key = state.queue.insert(at, id);
        state.slots.insert(
            id,
            Slot {
                name: Arc::clone(&name),
                task,
                schedule,
                next_run: Some(at),
                key: Some(key),
                generation: 0,
            },
        );
        debug!(task = %name, "task scheduled");
        self.wakeup.notify_all();
        Handle {
            id,
            name,
            scheduler: Arc::downgrade(self),
        }
    }

    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(slot) = state.slots.remove(&id) else {
            return false;
        };
        if let Some(key) = slot.key {
            state.queue.remove(&key);
        }
        debug!(task = %slot.name, "task cancelled");
        true
    }

    pub(crate) fn reschedule(&self, id: TaskId, schedule: Schedule) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.status >= SchedulerStatus::ShuttingDown {
            return Err(LifecycleError::illegal_state("scheduler is shutting down"));
        }
        let slot = state
            .slots
            .get_mut(&id)
            .ok_or_else(|| LifecycleError::illegal_state("task is no longer scheduled"))?;

        if let Some(key) = slot.key.take() {
            state.queue.remove(&key);
        }
        slot.generation += 1;
        slot.schedule = schedule;
        slot.next_run = slot.schedule.next_execution(&*self.clock, None, None);
        match slot.next_run {
            Some(at) => {
                slot.key = Some(state.queue.insert(at, id));
                debug!(task = %slot.name, "task rescheduled");
            }
            None => {
                debug!(task = %slot.name, "new schedule has no run, task removed");
                state.slots.remove(&id);
            }
        }
        self.wakeup.notify_all();
        Ok(())
    }

    pub(crate) fn next_run(&self, id: TaskId) -> Option<Instant> {
        self.state.lock().slots.get(&id).and_then(|slot| slot.next_run)
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.state.lock().slots.contains_key(&id)
    }

    /// Flag the worker to exit and drop every task; returns the prior status
    fn begin_shutdown(&self) -> SchedulerStatus {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let previous = state.status;
        match previous {
            SchedulerStatus::NotStarted => {
                state.status = SchedulerStatus::Stopped;
                self.exited.count_down();
            }
            SchedulerStatus::Running => state.status = SchedulerStatus::ShuttingDown,
            SchedulerStatus::ShuttingDown | SchedulerStatus::Stopped => return previous,
        }
        debug!(dropped = state.slots.len(), "scheduler shutting down");
        state.queue.clear();
        state.slots.clear();
        self.wakeup.notify_all();
        previous
    }

    /// Pop the head if it is due, unlinking it from its slot
    fn take_due(&self, state: &mut TimerState) -> Option<Dispatch> {
        let deadline = self
            .clock
            .now()
            .checked_add(self.config.early_run_tolerance)?;
        let (key, id) = state.queue.pop_due(deadline)?;
        let slot = state.slots.get_mut(&id)?;
        slot.key = None;
        slot.next_run = None;
        Some(Dispatch {
            id,
            name: Arc::clone(&slot.name),
            task: Arc::clone(&slot.task),
            nominal: key.at(),
            generation: slot.generation,
        })
    }

    fn dispatch(self: &Arc<Self>, dispatch: Dispatch) {
        debug!(task = %dispatch.name, "dispatching task");
        let name = Arc::clone(&dispatch.name);
        let run = PendingRun {
            shared: Arc::clone(self),
            dispatch: Some(dispatch),
        };
        if let Err(e) = self.executor.execute(Box::new(move || run.execute())) {
            error!(task = %name, "executor rejected task: {}", e);
        }
    }

    /// Queue the next run after `dispatch` finished at `completed`
    fn complete_run(&self, dispatch: &Dispatch, completed: Instant, fatal: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.status >= SchedulerStatus::ShuttingDown {
            return;
        }
        let Some(slot) = state.slots.get_mut(&dispatch.id) else {
            return;
        };
        if slot.generation != dispatch.generation {
            return;
        }
        if fatal {
            state.slots.remove(&dispatch.id);
            return;
        }

        let now = self.clock.now();
        let clock = &*self.clock;
        let mut skipped = 0u64;
        let mut next = slot
            .schedule
            .next_execution(clock, Some(dispatch.nominal), Some(completed));
        while let Some(at) = next {
            if at >= now {
                break;
            }
            match slot.schedule.next_execution(clock, Some(at), Some(completed)) {
                Some(following) if following > at => {
                    skipped += 1;
                    next = Some(following);
                }
                _ => break,
            }
        }
        if skipped > 0 {
            warn!(task = %slot.name, skipped, "task fell behind, skipped runs");
        }

        slot.next_run = next;
        match next {
            Some(at) => {
                slot.key = Some(state.queue.insert(at, dispatch.id));
                self.wakeup.notify_all();
            }
            None => {
                debug!(task = %slot.name, "task has no further runs");
                state.slots.remove(&dispatch.id);
            }
        }
    }

    fn late_run_decision(&self, dispatch: &Dispatch, started: Instant) -> LateRunDecision {
        let lateness = started.saturating_duration_since(dispatch.nominal);
        if lateness <= self.config.late_run_tolerance {
            return LateRunDecision::Run;
        }
        let late = LateRun {
            task_id: dispatch.id,
            name: Arc::clone(&dispatch.name),
            nominal: dispatch.nominal,
            started,
            lateness,
        };
        panic::catch_unwind(AssertUnwindSafe(|| (self.late_run)(&late))).unwrap_or_else(
            |payload| {
                error!(
                    task = %dispatch.name,
                    "late-run hook panicked: {}",
                    panic_message(payload.as_ref())
                );
                LateRunDecision::Run
            },
        )
    }
}

/// A dispatched run; reschedules the task even if the executor drops the job
struct PendingRun {
    shared: Arc<Shared>,
    dispatch: Option<Dispatch>,
}

impl PendingRun {
    fn execute(mut self) {
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        let shared = &self.shared;
        let started = shared.clock.now();

        let mut fatal = false;
        match shared.late_run_decision(&dispatch, started) {
            LateRunDecision::Skip => debug!(task = %dispatch.name, "late run skipped"),
            LateRunDecision::Run => match guarded(|| dispatch.task.run()) {
                Invocation::Completed => debug!(task = %dispatch.name, "task completed"),
                Invocation::Failed(e) => error!(task = %dispatch.name, "task failed: {:#}", e),
                Invocation::Fatal(e) => {
                    error!(
                        task = %dispatch.name,
                        "task reported a fatal error, cancelling: {:#}", e
                    );
                    fatal = true;
                }
            },
        }
        shared.complete_run(&dispatch, shared.clock.now(), fatal);
    }
}

impl Drop for PendingRun {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            warn!(task = %dispatch.name, "run dropped by the executor before it started");
            self.shared
                .complete_run(&dispatch, self.shared.clock.now(), false);
        }
    }
}

/// Releases shutdown waiters however the worker exits
struct ExitSignal<'a>(&'a Latch);

impl Drop for ExitSignal<'_> {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

fn run_worker(shared: Arc<Shared>) {
    let _exit = ExitSignal(&shared.exited);
    debug!("scheduler worker running");
    let mut state = shared.state.lock();
    loop {
        if state.status >= SchedulerStatus::ShuttingDown {
            break;
        }
        let Some((head, _)) = state.queue.peek() else {
            shared.wakeup.wait(&mut state);
            continue;
        };
        if let Some(dispatch) = shared.take_due(&mut state) {
            MutexGuard::unlocked(&mut state, || shared.dispatch(dispatch));
            continue;
        }

        let until = head.at().saturating_duration_since(shared.clock.now());
        let wait = until.min(shared.config.readjust_duration);
        if wait.is_zero() {
            MutexGuard::bump(&mut state);
        } else {
            shared.wakeup.wait_for(&mut state, wait);
        }
    }
    drop(state);
    debug!("scheduler worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fatal;
    use crate::worker::{InlineExecutor, WorkerPool};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MS: Duration = Duration::from_millis(1);

    fn pool() -> Arc<dyn Executor> {
        Arc::new(WorkerPool::new(2).unwrap())
    }

    fn started() -> Scheduler {
        let scheduler = Scheduler::new(pool(), SchedulerConfig::default());
        scheduler.start().unwrap();
        scheduler
    }

    fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(2 * MS);
        }
        condition()
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_one_shot_runs_exactly_once() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let requested = Instant::now() + 20 * MS;
        let ran_at = Arc::new(Mutex::new(None));

        let (counter, slot) = (Arc::clone(&runs), Arc::clone(&ran_at));
        let handle = scheduler.schedule(Schedule::once_at(requested), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            *slot.lock() = Some(Instant::now());
            Ok(())
        });
        assert!(handle.is_scheduled());
        assert_eq!(handle.next_run(), Some(requested));

        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        thread::sleep(50 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.next_run(), None);

        let ran_at = ran_at.lock().unwrap();
        let config = SchedulerConfig::default();
        assert!(ran_at + config.early_run_tolerance >= requested);
        assert!(ran_at <= requested + config.early_run_tolerance + config.late_run_tolerance);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_fixed_rate_does_not_drift() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let period = 20 * MS;

        let counter = Arc::clone(&runs);
        let handle = scheduler.schedule(Schedule::fixed_rate(10 * MS, period), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(5 * MS);
            Ok(())
        });
        let first = handle.next_run().unwrap();

        assert!(eventually(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 3));
        let nominal = loop {
            if let Some(at) = handle.next_run() {
                break at;
            }
            thread::sleep(MS);
        };
        let elapsed = (nominal - first).as_nanos();
        assert!(elapsed >= 2 * period.as_nanos());
        assert_eq!(elapsed % period.as_nanos(), 0);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_slow_fixed_rate_skips_missed_runs() {
        let scheduler = started();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let period = 20 * MS;
        let body = 50 * MS;

        let recorded = Arc::clone(&starts);
        let handle = scheduler.schedule(Schedule::fixed_rate(10 * MS, period), move || {
            recorded.lock().push(Instant::now());
            thread::sleep(body);
            Ok(())
        });
        let first = handle.next_run().unwrap();

        let mut nominals = vec![first];
        let deadline = Instant::now() + Duration::from_secs(3);
        while nominals.len() < 3 && Instant::now() < deadline {
            if let Some(at) = handle.next_run() {
                if nominals.last() != Some(&at) {
                    nominals.push(at);
                }
            }
            thread::sleep(MS);
        }
        handle.cancel();
        assert_eq!(nominals.len(), 3);

        for nominal in &nominals {
            assert_eq!((*nominal - first).as_nanos() % period.as_nanos(), 0);
        }
        for pair in nominals.windows(2) {
            assert!(pair[1] - pair[0] >= 2 * period);
        }
        let starts = starts.lock().clone();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= body);
        }
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_in_flight_one_shot_has_no_next_run() {
        let scheduler = started();
        let entered = Arc::new(Latch::new(1));
        let release = Arc::new(Latch::new(1));

        let (running, gate) = (Arc::clone(&entered), Arc::clone(&release));
        let handle = scheduler.schedule(Schedule::once_after(Duration::ZERO), move || {
            running.count_down();
            gate.wait();
            Ok(())
        });

        entered.wait();
        assert!(handle.is_scheduled());
        assert_eq!(handle.next_run(), None);
        release.count_down();
        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_fixed_delay_waits_after_completion() {
        let scheduler = started();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let body = 10 * MS;
        let delay = 15 * MS;

        let recorded = Arc::clone(&starts);
        let handle = scheduler.schedule(Schedule::fixed_delay(Duration::ZERO, delay), move || {
            recorded.lock().push(Instant::now());
            thread::sleep(body);
            Ok(())
        });

        assert!(eventually(Duration::from_secs(2), || starts.lock().len() >= 3));
        handle.cancel();
        let starts = starts.lock().clone();
        let tolerance = SchedulerConfig::default().early_run_tolerance;
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] + tolerance >= body + delay);
        }
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_cancel_from_inside_the_task() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let own_handle: Arc<Mutex<Option<Handle>>> = Arc::new(Mutex::new(None));

        let (counter, slot) = (Arc::clone(&runs), Arc::clone(&own_handle));
        let handle = scheduler.schedule(Schedule::fixed_rate(10 * MS, 5 * MS), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                if let Some(handle) = slot.lock().as_ref() {
                    handle.cancel();
                }
            }
            Ok(())
        });
        *own_handle.lock() = Some(handle.clone());

        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        thread::sleep(50 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule_named(
            "report",
            Schedule::once_after(Duration::from_secs(60)),
            counting(&runs),
        );
        assert_eq!(handle.name(), "report");
        assert_eq!(scheduler.len(), 1);

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.is_scheduled());
        assert_eq!(handle.next_run(), None);
        assert!(scheduler.is_empty());
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_reschedule_replaces_policy() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(
            Schedule::once_after(Duration::from_secs(60)),
            counting(&runs),
        );

        handle.reschedule(Schedule::once_after(10 * MS)).unwrap();
        assert!(handle.next_run().unwrap() < Instant::now() + Duration::from_secs(1));
        assert!(eventually(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1));

        assert!(!handle.is_scheduled());
        assert!(matches!(
            handle.reschedule(Schedule::once_after(MS)),
            Err(LifecycleError::IllegalState(_))
        ));
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_realign_keeps_tasks() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(
            Schedule::once_after(Duration::from_secs(60)),
            counting(&runs),
        );
        let due = handle.next_run();

        scheduler.realign();
        assert_eq!(handle.next_run(), due);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_tasks_queued_before_start_run_after_start() {
        let scheduler = Scheduler::new(pool(), SchedulerConfig::default());
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Schedule::once_after(Duration::ZERO), counting(&runs));

        thread::sleep(20 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        scheduler.start().unwrap();
        assert!(eventually(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1));
        assert!(matches!(scheduler.start(), Err(LifecycleError::IllegalState(_))));
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_schedule_after_shutdown_is_inert() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));
        let pending = scheduler.schedule(
            Schedule::once_after(Duration::from_secs(60)),
            counting(&runs),
        );

        assert!(scheduler.shutdown(Duration::from_secs(1)));
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
        assert!(!pending.is_scheduled());

        let late = scheduler.schedule(Schedule::once_after(Duration::ZERO), counting(&runs));
        assert!(!late.is_scheduled());
        assert!(!late.cancel());
        assert_eq!(late.next_run(), None);
        thread::sleep(20 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert!(scheduler.shutdown(Duration::from_secs(1)));
        assert!(scheduler.start().is_err());
    }

    #[test]
    fn test_shutdown_without_start() {
        let scheduler = Scheduler::new(pool(), SchedulerConfig::default());
        assert!(scheduler.shutdown(Duration::from_secs(1)));
        assert!(scheduler.shutdown(Duration::ZERO));
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
    }

    #[test]
    fn test_failing_task_keeps_its_schedule() {
        let scheduler = started();
        let failures = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&failures);
        scheduler.schedule(
            Schedule::fixed_rate(Duration::ZERO, 5 * MS),
            move || -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("backend unavailable"))
            },
        );
        let counter = Arc::clone(&panics);
        scheduler.schedule(
            Schedule::fixed_delay(Duration::ZERO, 5 * MS),
            move || -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("task bug");
            },
        );

        assert!(eventually(Duration::from_secs(2), || {
            failures.load(Ordering::SeqCst) >= 3 && panics.load(Ordering::SeqCst) >= 3
        }));
        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_fatal_error_cancels_task() {
        let scheduler = started();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = scheduler.schedule(
            Schedule::fixed_rate(Duration::ZERO, 5 * MS),
            move || -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Fatal::new("corrupted state").into())
            },
        );

        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        thread::sleep(30 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_late_run_hook_can_skip() {
        let late_runs = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&late_runs);
        let config = SchedulerConfig {
            late_run_tolerance: 10 * MS,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::builder(pool())
            .config(config)
            .on_late_run(move |late| {
                seen.lock().push(late.lateness);
                LateRunDecision::Skip
            })
            .build();
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let overdue = Instant::now().checked_sub(50 * MS).unwrap();
        let handle = scheduler.schedule(Schedule::once_at(overdue), counting(&runs));

        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let late_runs = late_runs.lock();
        assert_eq!(late_runs.len(), 1);
        assert!(late_runs[0] >= 50 * MS);
        drop(late_runs);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_default_late_run_hook_still_runs() {
        let config = SchedulerConfig {
            late_run_tolerance: 10 * MS,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(pool(), config);
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let overdue = Instant::now().checked_sub(50 * MS).unwrap();
        let handle = scheduler.schedule(Schedule::once_at(overdue), counting(&runs));

        assert!(eventually(Duration::from_secs(2), || !handle.is_scheduled()));
        thread::sleep(20 * MS);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_readjust_does_not_block_shutdown() {
        let config = SchedulerConfig {
            readjust_duration: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(pool(), config);
        scheduler.start().unwrap();
        let handle = scheduler.schedule(Schedule::once_after(Duration::from_secs(60)), || Ok(()));
        assert!(handle.is_scheduled());

        let (done, stopped) = std::sync::mpsc::channel();
        let stopper = scheduler.clone();
        thread::spawn(move || {
            let _ = done.send(stopper.shutdown(Duration::from_secs(1)));
        });
        assert_eq!(stopped.recv_timeout(Duration::from_secs(5)), Ok(true));
        assert!(!handle.is_scheduled());
    }

    #[test]
    fn test_shutdown_from_worker_thread_reports_false() {
        let scheduler = Scheduler::new(Arc::new(InlineExecutor), SchedulerConfig::default());
        scheduler.start().unwrap();
        let result = Arc::new(Mutex::new(None));

        let (inner, slot) = (scheduler.clone(), Arc::clone(&result));
        scheduler.schedule(Schedule::once_after(Duration::ZERO), move || {
            *slot.lock() = Some(inner.shutdown(Duration::from_secs(1)));
            Ok(())
        });

        assert!(eventually(Duration::from_secs(2), || result.lock().is_some()));
        assert_eq!(*result.lock(), Some(false));
        assert!(scheduler.shutdown(Duration::from_secs(1)));
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
    }

    #[test]
    fn test_stop_on_prepare() {
        let executor = pool();
        let coordinator = ShutdownCoordinator::new(Arc::clone(&executor));
        let scheduler = Scheduler::new(executor, SchedulerConfig::default());
        scheduler.start().unwrap();
        scheduler
            .stop_on_prepare(&coordinator, Duration::from_secs(1))
            .unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let hourly = Schedule::fixed_rate(Duration::from_secs(60), Duration::from_secs(60));
        let handle = scheduler.schedule(hourly, counting(&runs));

        let report = coordinator.perform_shutdown().unwrap();
        assert!(report.is_clean());
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
        assert!(!handle.is_scheduled());
    }
}

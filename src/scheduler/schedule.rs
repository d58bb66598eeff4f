use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of "now" for the scheduler
///
/// All scheduling uses the monotonic [`Instant`] timeline; wall-clock
/// instants are converted into it when a schedule is first evaluated.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Shortest period or delay a repeating schedule will use
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

type NextFn = dyn Fn(&dyn Clock, Option<Instant>, Option<Instant>) -> Option<Instant> + Send + Sync;

/// When a task runs
///
/// A schedule is a pure function of `(clock, nominal, completed)`:
/// `nominal` is the instant the previous run was due (`None` when the task
/// has not run under this schedule yet) and `completed` is when that run
/// finished. Returning `None` means the task does not run again.
#[derive(Clone)]
pub struct Schedule {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    OnceAfter(Duration),
    OnceAt(Instant),
    OnceAtDateTime(DateTime<Utc>),
    FixedRate { initial_delay: Duration, period: Duration },
    FixedDelay { initial_delay: Duration, delay: Duration },
    Custom(Arc<NextFn>),
}

impl Schedule {
    /// Run once, `delay` after being scheduled
    pub fn once_after(delay: Duration) -> Self {
        Self {
            kind: Kind::OnceAfter(delay),
        }
    }

    /// Run once at `instant`; past instants run immediately
    pub fn once_at(instant: Instant) -> Self {
        Self {
            kind: Kind::OnceAt(instant),
        }
    }

    /// Run once at a wall-clock time
    ///
    /// The time is mapped onto the monotonic timeline when the task is
    /// scheduled; later wall-clock adjustments do not move it.
    pub fn once_at_datetime(at: DateTime<Utc>) -> Self {
        Self {
            kind: Kind::OnceAtDateTime(at),
        }
    }

    /// Run every `period` measured from the previous nominal instant, so run
    /// durations do not accumulate as drift
    pub fn fixed_rate(initial_delay: Duration, period: Duration) -> Self {
        Self {
            kind: Kind::FixedRate {
                initial_delay,
                period: period.max(MIN_INTERVAL),
            },
        }
    }

    /// Run `delay` after the previous run completed
    pub fn fixed_delay(initial_delay: Duration, delay: Duration) -> Self {
        Self {
            kind: Kind::FixedDelay {
                initial_delay,
                delay: delay.max(MIN_INTERVAL),
            },
        }
    }

    pub fn custom<F>(next: F) -> Self
    where
        F: Fn(&dyn Clock, Option<Instant>, Option<Instant>) -> Option<Instant>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: Kind::Custom(Arc::new(next)),
        }
    }

    /// Whether the schedule can fire more than once
    pub fn is_repeating(&self) -> bool {
        matches!(
            self.kind,
            Kind::FixedRate { .. } | Kind::FixedDelay { .. } | Kind::Custom(_)
        )
    }

    pub fn next_execution(
        &self,
        clock: &dyn Clock,
        nominal: Option<Instant>,
        completed: Option<Instant>,
    ) -> Option<Instant> {
        match (&self.kind, nominal) {
            (Kind::OnceAfter(delay), None) => clock.now().checked_add(*delay),
            (Kind::OnceAt(at), None) => Some(*at),
            (Kind::OnceAtDateTime(at), None) => {
                let now = clock.now();
                match (*at - Utc::now()).to_std() {
                    Ok(ahead) => now.checked_add(ahead),
                    Err(_) => Some(now),
                }
            }
            (Kind::OnceAfter(_) | Kind::OnceAt(_) | Kind::OnceAtDateTime(_), Some(_)) => None,
            (Kind::FixedRate { initial_delay, .. }, None)
            | (Kind::FixedDelay { initial_delay, .. }, None) => {
                clock.now().checked_add(*initial_delay)
            }
            (Kind::FixedRate { period, .. }, Some(nominal)) => nominal.checked_add(*period),
            (Kind::FixedDelay { delay, .. }, Some(nominal)) => {
                completed.unwrap_or(nominal).checked_add(*delay)
            }
            (Kind::Custom(next), nominal) => (**next)(clock, nominal, completed),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::OnceAfter(delay) => f.debug_tuple("OnceAfter").field(delay).finish(),
            Kind::OnceAt(at) => f.debug_tuple("OnceAt").field(at).finish(),
            Kind::OnceAtDateTime(at) => f.debug_tuple("OnceAtDateTime").field(at).finish(),
            Kind::FixedRate {
                initial_delay,
                period,
            } => f
                .debug_struct("FixedRate")
                .field("initial_delay", initial_delay)
                .field("period", period)
                .finish(),
            Kind::FixedDelay {
                initial_delay,
                delay,
            } => f
                .debug_struct("FixedDelay")
                .field("initial_delay", initial_delay)
                .field("delay", delay)
                .finish(),
            Kind::Custom(_) => f.write_str("Custom"),
        }
    }
}

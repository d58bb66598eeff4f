//! Time-based task scheduling
//!
//! A [`Scheduler`] owns one worker thread that keeps tasks ordered by their
//! next run instant and hands due tasks to an [`Executor`](crate::worker::Executor).
//! How often a task runs is decided by its [`Schedule`]:
//!
//! - [`Schedule::fixed_rate`]: runs are anchored to the first nominal instant,
//!   so slow runs do not accumulate drift
//! - [`Schedule::fixed_delay`]: the next run is due a fixed delay after the
//!   previous one completed
//! - [`Schedule::once_after`], [`Schedule::once_at`],
//!   [`Schedule::once_at_datetime`]: a single run
//! - [`Schedule::custom`]: any function of the clock and the previous run
//!
//! A repeating task that falls behind skips the runs it missed instead of
//! firing them back to back.

mod queue;
mod schedule;
mod task;
mod timer;

pub use queue::TaskId;
pub use schedule::{Clock, MIN_INTERVAL, MonotonicClock, Schedule};
pub use task::{Handle, LateRun, LateRunDecision, Task};
pub use timer::{Scheduler, SchedulerBuilder, SchedulerStatus};

//! Blocking synchronisation primitives used by the coordinators.
//!
//! Both types are built on a `parking_lot` mutex and condition variable.
//! Waiters always re-check their condition after waking.

mod latch;
mod promise;

pub use latch::Latch;
pub use promise::Promise;

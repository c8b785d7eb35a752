// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand runtime library.
//!
//! OS threads only: work runs on a worker pool or on the calling thread,
//! and every suspension point blocks the caller on a condvar. Virtual time
//! never sleeps, it only moves when a test advances it.
//!
//! Components:
//! - outcome: eager/lazy/scheduled results with `wait` and `then`
//! - runner: `AsyncRunner` with pool and calling-thread implementations
//! - clock: real and manual time sources with scheduled actions
//! - mutex/locked: spin lock and the guarded-value wrapper
//! - gate: open/closed barrier with clock-bound timeouts
//! - config/context: pool configuration and the runner+clock bundle

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod locked;
pub mod mutex;
pub mod outcome;
pub mod runner;

pub use clock::{Clock, ClockExt, ManualClock, RealClock, TimerId};
pub use config::RunnerConfig;
pub use context::Runtime;
pub use error::Error;
pub use gate::Gate;
pub use locked::Locked;
pub use mutex::{SpinGuard, SpinMutex};
pub use outcome::{Completer, Outcome};
pub use runner::{AsyncRunner, CurrentThreadRunner, RunnerExt, ThreadPoolRunner};

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

// User code never runs while these internal locks are held, so a poisoned
// lock still guards consistent state.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(cvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

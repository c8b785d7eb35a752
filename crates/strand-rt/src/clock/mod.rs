// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Time sources with scheduled actions.
//!
//! Two implementations share the `Clock` contract:
//! - `real`   : system time, one timer thread per clock
//! - `manual` : virtual time that only moves when a test advances it
//!
//! A delay that is zero/negative, or an instant that is not in the future,
//! runs the action on the caller right away. Callers never special-case
//! "already past".

mod manual;
mod real;
mod timers;

pub use manual::ManualClock;
pub use real::{system, RealClock};

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};

use crate::error::{catch, Error};
use crate::outcome::Outcome;

/// Boxed callback run by a clock registration.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a pending registration. Only meaningful to the clock that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Time source. Object safe; the generic conveniences live in `ClockExt`.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// UTC offset of local time.
    fn offset(&self) -> FixedOffset;

    /// Register `action` to run at `at`. The outcome completes once the
    /// action has run; a panicking action becomes its error.
    ///
    /// The id is `None` when `at` was not in the future and the action
    /// already ran on the caller.
    fn register_cancellable(
        &self,
        at: DateTime<Utc>,
        action: Action,
    ) -> (Option<TimerId>, Outcome<()>);

    /// Drop a registration that has not fired yet. Its action never runs
    /// and its outcome fails with `Error::Abandoned`. Returns false if it
    /// already fired or was cancelled.
    fn cancel(&self, id: TimerId) -> bool;

    fn register(&self, at: DateTime<Utc>, action: Action) -> Outcome<()> {
        self.register_cancellable(at, action).1
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&self.offset())
    }

    /// Outcome completing once the clock reaches `at`.
    fn delay_until(&self, at: DateTime<Utc>) -> Outcome<()> {
        self.register(at, Box::new(|| {}))
    }

    /// Outcome completing once `duration` has elapsed on this clock.
    fn delay(&self, duration: TimeDelta) -> Outcome<()> {
        if duration <= TimeDelta::zero() {
            return Outcome::ready(());
        }
        self.delay_until(deadline_after(self.now(), duration))
    }
}

/// Closure-taking conveniences over any `Clock`, including `dyn Clock`.
pub trait ClockExt: Clock {
    fn schedule_at<F>(&self, at: DateTime<Utc>, action: F) -> Outcome<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(at, Box::new(action))
    }

    fn schedule_after<F>(&self, duration: TimeDelta, action: F) -> Outcome<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if duration <= TimeDelta::zero() {
            return run_now(Box::new(action));
        }
        self.register(deadline_after(self.now(), duration), Box::new(action))
    }
}

impl<C: Clock + ?Sized> ClockExt for C {}

/// `now + duration`, saturating at the largest representable instant.
pub(crate) fn deadline_after(now: DateTime<Utc>, duration: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Run an action on the calling thread and wrap the result.
pub(crate) fn run_now(action: Action) -> Outcome<()> {
    Outcome::completed(run_action(action))
}

pub(crate) fn run_action(action: Action) -> Result<(), Error> {
    let r = catch(action);
    if let Err(e) = &r {
        tracing::warn!(error = %e, "clock action failed");
    }
    r
}

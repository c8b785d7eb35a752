// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Virtual clock for deterministic tests.
//!
//! Time never moves on its own. `advance`/`advance_to` fire due
//! registrations on the advancing thread, in fire-time order, with `now()`
//! reading each registration's fire time while it runs. Waiters on
//! `delay`/gate timeouts are released by those firings, never by sleeping.

use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};

use super::timers::TimerQueue;
use super::{deadline_after, run_now, Action, Clock, TimerId};
use crate::outcome::Outcome;

/// Test-controlled clock.
pub struct ManualClock {
    state: Mutex<ManualState>,
    offset: FixedOffset,
}

struct ManualState {
    now: DateTime<Utc>,
    timers: TimerQueue,
}

impl ManualClock {
    /// Starts at the Unix epoch with a UTC offset of zero.
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                timers: TimerQueue::default(),
            }),
            offset: Utc.fix(),
        }
    }

    /// Report `offset` as the local UTC offset.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Move time forward by `duration`. Zero or negative is a no-op.
    pub fn advance(&self, duration: TimeDelta) {
        if duration <= TimeDelta::zero() {
            return;
        }
        let target = deadline_after(self.now(), duration);
        self.advance_to(target);
    }

    /// Move time forward to `target`, firing everything due on the way.
    /// A target in the past leaves the clock where it is.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        let mut fired = 0usize;
        loop {
            let reg = {
                let mut state = crate::lock(&self.state);
                match state.timers.pop_due(target) {
                    Some(reg) => {
                        if reg.at > state.now {
                            state.now = reg.at;
                        }
                        reg
                    }
                    None => {
                        if target > state.now {
                            state.now = target;
                        }
                        break;
                    }
                }
            };
            reg.fire();
            fired += 1;
        }
        tracing::trace!(now = %target, fired, "advanced manual clock");
    }

    /// Registrations still waiting for their fire time.
    pub fn pending_count(&self) -> usize {
        crate::lock(&self.state).timers.len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        crate::lock(&self.state).now
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn register_cancellable(
        &self,
        at: DateTime<Utc>,
        action: Action,
    ) -> (Option<TimerId>, Outcome<()>) {
        let mut state = crate::lock(&self.state);
        if at <= state.now {
            drop(state);
            return (None, run_now(action));
        }
        let (id, outcome) = state.timers.push(at, action);
        (Some(id), outcome)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let removed = crate::lock(&self.state).timers.cancel(id);
        removed.is_some()
    }
}

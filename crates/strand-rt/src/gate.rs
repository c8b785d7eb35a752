// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Open/closed barrier.
//!
//! `pass_through` blocks until another thread opens the gate. The timed
//! variants return an `Outcome` that completes when the gate opens, or
//! fails with `Error::Timeout` when the clock reaches the deadline,
//! whichever comes first. On a `ManualClock` the deadline only passes when
//! a test advances the clock.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::{self, deadline_after, Clock, TimerId};
use crate::error::Error;
use crate::outcome::{Completer, Outcome};

/// Binary barrier with optional clock-bound timeouts.
pub struct Gate {
    state: Mutex<GateState>,
    opened: Condvar,
    clock: Option<Arc<dyn Clock>>,
}

struct GateState {
    open: bool,
    /// Timed waiters released by `open()`.
    waiters: Vec<Waiter>,
    next_waiter: u64,
}

struct Waiter {
    key: u64,
    completer: Completer<()>,
    /// Timeout registration, cancelled when `open()` releases the waiter.
    timer: Option<TimerId>,
}

impl Gate {
    /// Closed gate with no clock. Timed waits use the process-wide real
    /// clock.
    pub fn new() -> Self {
        Self::build(false, None)
    }

    /// Closed gate whose timeouts are measured on `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(false, Some(clock))
    }

    /// Same as `new()` but starting open.
    pub fn new_open() -> Self {
        Self::build(true, None)
    }

    fn build(open: bool, clock: Option<Arc<dyn Clock>>) -> Self {
        Self {
            state: Mutex::new(GateState {
                open,
                waiters: Vec::new(),
                next_waiter: 0,
            }),
            opened: Condvar::new(),
            clock,
        }
    }

    /// Open the gate, releasing every waiter. Returns false if it was
    /// already open.
    pub fn open(&self) -> bool {
        let waiters = {
            let mut state = crate::lock(&self.state);
            if state.open {
                return false;
            }
            state.open = true;
            std::mem::take(&mut state.waiters)
        };
        self.opened.notify_all();
        tracing::trace!(waiters = waiters.len(), "gate opened");
        let mut timers = Vec::new();
        for w in waiters {
            if w.completer.complete(Ok(())) {
                timers.extend(w.timer);
            }
        }
        if !timers.is_empty() {
            let clock = self.clock();
            for id in timers {
                clock.cancel(id);
            }
        }
        true
    }

    /// Close the gate. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = crate::lock(&self.state);
        if !state.open {
            return false;
        }
        state.open = false;
        true
    }

    pub fn is_open(&self) -> bool {
        crate::lock(&self.state).open
    }

    /// Return once the gate is open, blocking until then.
    pub fn pass_through(&self) {
        let mut state = crate::lock(&self.state);
        while !state.open {
            state = crate::wait(&self.opened, state);
        }
    }

    /// Wait for the gate to open for at most `timeout` on the gate's clock.
    ///
    /// An open gate yields a completed outcome without reading the clock.
    /// A zero or negative timeout is a precondition failure.
    pub fn pass_through_for(&self, timeout: TimeDelta) -> Result<Outcome<()>, Error> {
        if timeout <= TimeDelta::zero() {
            return Err(Error::precondition(format!(
                "gate timeout must be positive, got {}",
                timeout
            )));
        }
        if self.is_open() {
            return Ok(Outcome::ready(()));
        }
        let clock = self.clock();
        let deadline = deadline_after(clock.now(), timeout);
        Ok(self.wait_on(clock.as_ref(), deadline))
    }

    /// Wait for the gate to open until `deadline` on the gate's clock.
    pub fn pass_through_until(&self, deadline: DateTime<Utc>) -> Outcome<()> {
        if self.is_open() {
            return Outcome::ready(());
        }
        let clock = self.clock();
        self.wait_on(clock.as_ref(), deadline)
    }

    fn clock(&self) -> Arc<dyn Clock> {
        match &self.clock {
            Some(clock) => clock.clone(),
            None => clock::system(),
        }
    }

    fn wait_on(&self, clock: &dyn Clock, deadline: DateTime<Utc>) -> Outcome<()> {
        let (completer, outcome) = Outcome::pending();
        let key = {
            let mut state = crate::lock(&self.state);
            if state.open {
                return Outcome::ready(());
            }
            state.waiters.retain(|w| !w.completer.is_completed());
            let key = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.push(Waiter {
                key,
                completer: completer.clone(),
                timer: None,
            });
            key
        };
        // Runs inline when the deadline is not in the future.
        let (timer, _) = clock.register_cancellable(
            deadline,
            Box::new(move || {
                if completer.complete(Err(Error::Timeout { deadline })) {
                    tracing::trace!(%deadline, "gate wait timed out");
                }
            }),
        );
        if let Some(id) = timer {
            let recorded = {
                let mut state = crate::lock(&self.state);
                match state.waiters.iter_mut().find(|w| w.key == key) {
                    Some(w) => {
                        w.timer = Some(id);
                        true
                    }
                    None => false,
                }
            };
            // `open()` took the waiter before its timer was recorded.
            if !recorded {
                clock.cancel(id);
            }
        }
        outcome
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("open", &self.is_open())
            .field("has_clock", &self.clock.is_some())
            .finish()
    }
}

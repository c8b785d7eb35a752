// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Wall-clock time with a dedicated timer thread.
//!
//! The thread starts on the first future registration and sleeps on a
//! condvar until the earliest deadline. Actions run on the timer thread,
//! so they should be short.

use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Utc};

use super::timers::TimerQueue;
use super::{run_now, Action, Clock, TimerId};
use crate::outcome::Outcome;

/// Clock backed by system time.
pub struct RealClock {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct TimerState {
    timers: TimerQueue,
    shutdown: bool,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState::default()),
                wakeup: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Registrations still waiting for their deadline.
    pub fn pending_count(&self) -> usize {
        crate::lock(&self.shared.state).timers.len()
    }

    fn ensure_timer_thread(&self) {
        let mut slot = crate::lock(&self.thread);
        if slot.is_some() {
            return;
        }
        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("strand-timer".to_string())
            .spawn(move || timer_loop(&shared))
        {
            Ok(handle) => *slot = Some(handle),
            // Registrations stay queued; the next one retries the spawn.
            Err(e) => tracing::error!(error = %e, "failed to spawn timer thread"),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        *Local::now().offset()
    }

    fn register_cancellable(
        &self,
        at: DateTime<Utc>,
        action: Action,
    ) -> (Option<TimerId>, Outcome<()>) {
        if at <= Utc::now() {
            return (None, run_now(action));
        }
        let (id, outcome) = crate::lock(&self.shared.state).timers.push(at, action);
        tracing::trace!(at = %at, "registered real clock action");
        self.ensure_timer_thread();
        self.shared.wakeup.notify_one();
        (Some(id), outcome)
    }

    fn cancel(&self, id: TimerId) -> bool {
        // The timer thread wakes at the stale deadline, finds nothing due
        // and goes back to sleep.
        let removed = crate::lock(&self.shared.state).timers.cancel(id);
        removed.is_some()
    }
}

impl Drop for RealClock {
    fn drop(&mut self) {
        crate::lock(&self.shared.state).shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = crate::lock(&self.thread).take() {
            // An action that drops the last handle runs on the timer thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn timer_loop(shared: &TimerShared) {
    tracing::debug!("timer thread started");
    let mut state = crate::lock(&shared.state);
    loop {
        if state.shutdown {
            break;
        }
        let now = Utc::now();
        if let Some(reg) = state.timers.pop_due(now) {
            drop(state);
            reg.fire();
            state = crate::lock(&shared.state);
            continue;
        }
        state = match state.timers.next_deadline() {
            None => crate::wait(&shared.wakeup, state),
            Some(at) => {
                let timeout = (at - now).to_std().unwrap_or(Duration::ZERO);
                shared
                    .wakeup
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .0
            }
        };
    }
    let unfired = std::mem::take(&mut state.timers);
    drop(state);
    tracing::debug!(abandoned = unfired.len(), "timer thread stopped");
    // Dropping the queue abandons the outcomes of unfired registrations.
    drop(unfired);
}

/// Process-wide real clock, used where no clock was supplied.
pub fn system() -> Arc<RealClock> {
    static SYSTEM: OnceLock<Arc<RealClock>> = OnceLock::new();
    SYSTEM.get_or_init(|| Arc::new(RealClock::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockExt;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn now_tracks_system_time() {
        let clock = RealClock::new();
        let before = Utc::now();
        let now = clock.now();
        assert!(now >= before);
        assert!(now - before < TimeDelta::seconds(1));
    }

    #[test]
    fn negative_delay_runs_inline() {
        let clock = RealClock::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let start = Instant::now();
        let o = clock.schedule_after(TimeDelta::seconds(-5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(o.is_completed());
        o.wait().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn scheduled_action_fires_after_deadline() {
        let clock = RealClock::new();
        let start = Instant::now();
        let o = clock.schedule_after(TimeDelta::milliseconds(30), || {});
        assert!(!o.is_completed());
        o.wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn actions_fire_in_deadline_order() {
        let clock = RealClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut outcomes = vec![];
        for (label, ms) in [("late", 60), ("early", 20), ("mid", 40)] {
            let order = order.clone();
            outcomes.push(
                clock.schedule_after(TimeDelta::milliseconds(ms), move || {
                    order.lock().unwrap().push(label)
                }),
            );
        }
        for o in outcomes {
            o.wait().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn delay_blocks_until_elapsed() {
        let clock = RealClock::new();
        let start = Instant::now();
        clock.delay(TimeDelta::milliseconds(20)).wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(clock.delay(TimeDelta::zero()).is_completed());
    }

    #[test]
    fn panicking_action_fails_its_outcome() {
        let clock = RealClock::new();
        let o = clock.schedule_after(TimeDelta::milliseconds(5), || panic!("tick"));
        assert!(matches!(o.wait(), Err(crate::Error::Panicked(_))));
        // The timer thread survives.
        clock.delay(TimeDelta::milliseconds(5)).wait().unwrap();
    }

    #[test]
    fn cancelled_action_never_runs() {
        let clock = RealClock::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let at = clock.now() + TimeDelta::milliseconds(20);
        let (id, o) = clock.register_cancellable(
            at,
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let id = id.unwrap();
        assert!(clock.cancel(id));
        assert!(!clock.cancel(id));
        assert_eq!(clock.pending_count(), 0);
        assert!(matches!(o.wait(), Err(crate::Error::Abandoned)));
        clock.delay(TimeDelta::milliseconds(40)).wait().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_abandons_pending_registrations() {
        let clock = RealClock::new();
        let o = clock.schedule_after(TimeDelta::hours(1), || {});
        drop(clock);
        assert!(matches!(o.wait(), Err(crate::Error::Abandoned)));
    }
}

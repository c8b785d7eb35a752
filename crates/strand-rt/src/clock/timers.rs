// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ordered queue of pending clock registrations.
//!
//! Min-heap on `(fire_time, seq)`: earliest first, ties in registration
//! order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use super::{run_action, Action, TimerId};
use crate::outcome::{Completer, Outcome};

pub(crate) struct Registration {
    pub at: DateTime<Utc>,
    seq: u64,
    action: Action,
    completer: Completer<()>,
}

impl Registration {
    /// Run the action and complete its outcome. Call without holding the
    /// clock's lock.
    pub fn fire(self) {
        tracing::trace!(at = %self.at, seq = self.seq, "firing clock registration");
        let r = run_action(self.action);
        self.completer.complete(r);
    }
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Registration {}

impl PartialOrd for Registration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Registration {
    // Reversed so BinaryHeap (a max-heap) pops the earliest registration.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Registration>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn push(&mut self, at: DateTime<Utc>, action: Action) -> (TimerId, Outcome<()>) {
        let (completer, outcome) = Outcome::pending();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Registration {
            at,
            seq,
            action,
            completer,
        });
        (TimerId(seq), outcome)
    }

    /// Take a registration out of the queue before it fires. Dropping the
    /// returned registration abandons its outcome, so callers drop it
    /// outside the clock's lock.
    pub fn cancel(&mut self, id: TimerId) -> Option<Registration> {
        if !self.heap.iter().any(|r| r.seq == id.0) {
            return None;
        }
        let mut regs = std::mem::take(&mut self.heap).into_vec();
        let idx = regs.iter().position(|r| r.seq == id.0)?;
        let removed = regs.swap_remove(idx);
        self.heap = BinaryHeap::from(regs);
        Some(removed)
    }

    /// Remove the earliest registration if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Registration> {
        if self.heap.peek()?.at <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|r| r.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn pops_in_time_then_registration_order() {
        let mut q = TimerQueue::default();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        for (label, secs) in [("c", 3), ("a1", 1), ("b", 2), ("a2", 1)] {
            let order = order.clone();
            q.push(at(secs), Box::new(move || order.lock().unwrap().push(label)));
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.next_deadline(), Some(at(1)));
        while let Some(r) = q.pop_due(at(10)) {
            r.fire();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a1", "a2", "b", "c"]);
    }

    #[test]
    fn nothing_due_before_deadline() {
        let mut q = TimerQueue::default();
        let (_, o) = q.push(at(5), Box::new(|| {}));
        assert!(q.pop_due(at(4)).is_none());
        q.pop_due(at(5)).unwrap().fire();
        assert!(o.is_completed());
    }

    #[test]
    fn dropped_registration_abandons_outcome() {
        let mut q = TimerQueue::default();
        let (_, o) = q.push(at(5), Box::new(|| {}));
        drop(q);
        assert!(matches!(o.wait(), Err(crate::Error::Abandoned)));
    }

    #[test]
    fn cancel_removes_only_that_registration() {
        let mut q = TimerQueue::default();
        let (_, early) = q.push(at(1), Box::new(|| {}));
        let (id, cancelled) = q.push(at(2), Box::new(|| panic!("cancelled action ran")));
        let (_, late) = q.push(at(3), Box::new(|| {}));

        let reg = q.cancel(id).unwrap();
        drop(reg);
        assert!(matches!(cancelled.wait(), Err(crate::Error::Abandoned)));
        assert!(q.cancel(id).is_none());
        assert_eq!(q.len(), 2);

        while let Some(r) = q.pop_due(at(10)) {
            r.fire();
        }
        early.wait().unwrap();
        late.wait().unwrap();
    }
}

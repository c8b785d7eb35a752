// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime context handed to application code.
//!
//! A "main" runner plus a clock. Production wires a thread pool to the
//! real clock; deterministic tests run work inline against a manual clock
//! they advance themselves.

use std::sync::Arc;

use crate::clock::{Clock, ManualClock, RealClock};
use crate::config::RunnerConfig;
use crate::error::Error;
use crate::gate::Gate;
use crate::runner::{AsyncRunner, CurrentThreadRunner, ThreadPoolRunner};

/// Runner and clock shared by everything an application schedules.
#[derive(Clone)]
pub struct Runtime {
    pub runner: Arc<dyn AsyncRunner>,
    pub clock: Arc<dyn Clock>,
}

impl Runtime {
    pub fn new(runner: Arc<dyn AsyncRunner>, clock: Arc<dyn Clock>) -> Self {
        Self { runner, clock }
    }

    /// Thread pool from `config` plus a real clock.
    pub fn production(config: &RunnerConfig) -> Result<Self, Error> {
        let runner = ThreadPoolRunner::new(config)?;
        Ok(Self::new(Arc::new(runner), Arc::new(RealClock::new())))
    }

    /// Calling-thread runner plus a manual clock. The clock handle is
    /// returned separately so the test can advance it.
    pub fn deterministic() -> (Self, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let runtime = Self::new(Arc::new(CurrentThreadRunner::new()), clock.clone());
        (runtime, clock)
    }

    /// Closed gate whose timeouts run on this runtime's clock.
    pub fn gate(&self) -> Gate {
        Gate::with_clock(self.clock.clone())
    }

    /// Stop accepting work on the main runner.
    pub fn shutdown(&self) {
        self.runner.dispose();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("disposed", &self.runner.is_disposed())
            .field("now", &self.clock.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockExt;
    use crate::runner::RunnerExt;
    use chrono::TimeDelta;

    #[test]
    fn deterministic_runtime_runs_inline_on_virtual_time() {
        let (rt, clock) = Runtime::deterministic();
        let o = rt.runner.schedule(|| 5).unwrap();
        assert!(o.is_completed());

        let t0 = rt.clock.now();
        let fired = rt.clock.schedule_after(TimeDelta::minutes(1), || {});
        assert!(!fired.is_completed());
        clock.advance(TimeDelta::minutes(1));
        assert!(fired.is_completed());
        assert_eq!(rt.clock.now() - t0, TimeDelta::minutes(1));
    }

    #[test]
    fn production_runtime_uses_pool() {
        let rt = Runtime::production(&RunnerConfig::default().workers(2)).unwrap();
        let caller = std::thread::current().id();
        let elsewhere = rt
            .runner
            .schedule(move || std::thread::current().id() != caller)
            .unwrap();
        assert!(elsewhere.wait().unwrap());
        rt.shutdown();
        assert!(matches!(rt.runner.schedule(|| 1), Err(Error::Disposed)));
    }

    #[test]
    fn runtime_gate_uses_runtime_clock() {
        let (rt, clock) = Runtime::deterministic();
        let gate = rt.gate();
        let o = gate.pass_through_for(TimeDelta::seconds(3)).unwrap();
        clock.advance(TimeDelta::seconds(3));
        assert!(o.wait().unwrap_err().is_timeout());
    }
}

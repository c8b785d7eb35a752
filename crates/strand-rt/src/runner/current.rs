// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Calling-thread runner.
//!
//! Runs each job inline before `schedule` returns. Same API as the pool,
//! so code written against `AsyncRunner` works with or without threads.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{run_job, AsyncRunner, Job};
use crate::error::Error;

#[derive(Debug, Default)]
pub struct CurrentThreadRunner {
    disposed: AtomicBool,
}

impl CurrentThreadRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsyncRunner for CurrentThreadRunner {
    fn dispatch(&self, job: Job) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        run_job(job);
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

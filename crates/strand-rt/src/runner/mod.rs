// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task runners.
//!
//! An `AsyncRunner` accepts work and hands back an `Outcome`. Two
//! implementations share the API:
//! - `pool`    : fixed set of worker threads draining one FIFO queue
//! - `current` : runs the work inline on the calling thread
//!
//! Panics and `Err`s inside the work land in the outcome. `schedule` itself
//! only fails when the runner has been disposed.

mod current;
mod pool;

pub use current::CurrentThreadRunner;
pub use pool::ThreadPoolRunner;

use crate::error::{catch, Error};
use crate::outcome::Outcome;

/// Boxed unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler seam. Object safe; `RunnerExt` adds the typed `schedule`.
pub trait AsyncRunner: Send + Sync {
    /// Queue `job` for execution. Fails with `Error::Disposed` after
    /// `dispose()`; the job is dropped in that case.
    fn dispatch(&self, job: Job) -> Result<(), Error>;

    /// Reject all further work. Work already accepted still runs.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Typed scheduling over any `AsyncRunner`, including `dyn AsyncRunner`.
pub trait RunnerExt: AsyncRunner {
    /// Run `f` on this runner. A panic becomes the outcome's error.
    fn schedule<T, F>(&self, f: F) -> Result<Outcome<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (completer, outcome) = Outcome::pending();
        self.dispatch(Box::new(move || {
            completer.complete(catch(f));
        }))?;
        Ok(outcome)
    }

    /// Run a fallible `f` on this runner. `Err` becomes the outcome's error.
    fn schedule_fallible<T, E, F>(&self, f: F) -> Result<Outcome<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (completer, outcome) = Outcome::pending();
        self.dispatch(Box::new(move || {
            completer.complete(catch(f).and_then(|r| r.map_err(Error::failed)));
        }))?;
        Ok(outcome)
    }

    fn schedule_run<F>(&self, f: F) -> Result<Outcome<()>, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(f)
    }
}

impl<R: AsyncRunner + ?Sized> RunnerExt for R {}

/// Run a raw job, keeping the calling thread alive if it panics.
pub(crate) fn run_job(job: Job) {
    if let Err(e) = catch(job) {
        tracing::warn!(error = %e, "runner job panicked");
    }
}

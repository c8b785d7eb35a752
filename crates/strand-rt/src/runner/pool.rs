// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker-thread pool runner.
//!
//! N named worker threads share one FIFO queue, so jobs start in
//! submission order. Idle workers sleep on a condvar until work arrives
//! or the pool is disposed. Disposal stops intake; workers drain what is
//! already queued and then exit.
//!
//! A job that blocks on an outcome scheduled to the same pool holds a
//! worker while it waits. With every worker blocked that way the pool
//! deadlocks; size the pool for the nesting depth you use.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use super::{run_job, AsyncRunner, Job};
use crate::config::RunnerConfig;
use crate::error::Error;

/// Runner backed by a fixed pool of OS threads.
pub struct ThreadPoolRunner {
    shared: Arc<PoolShared>,
    /// Worker handles for join-on-shutdown.
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

/// State shared between the runner handle and its workers.
struct PoolShared {
    state: Mutex<PoolState>,
    /// Notify idle workers that a job arrived or the pool was disposed.
    work_available: Condvar,
}

struct PoolState {
    jobs: VecDeque<Job>,
    disposed: bool,
}

impl ThreadPoolRunner {
    /// Start a pool sized and named by `config`.
    pub fn new(config: &RunnerConfig) -> Result<Self, Error> {
        let worker_count = config.resolved_workers();
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                disposed: false,
            }),
            work_available: Condvar::new(),
        });

        let runner = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };
        for id in 0..worker_count {
            // On failure `runner` drops here, which stops the workers
            // already started.
            let handle = runner
                .spawn_worker(id, &config.thread_name_prefix)
                .map_err(Error::failed)?;
            crate::lock(&runner.workers).push(handle);
        }
        tracing::debug!(workers = worker_count, "thread pool runner started");
        Ok(runner)
    }

    /// Pool with `n` workers and default naming (0 = available parallelism).
    pub fn with_workers(n: usize) -> Result<Self, Error> {
        Self::new(&RunnerConfig::default().workers(n))
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Dispose, then wait for every worker to drain the queue and exit.
    pub fn shutdown(&self) {
        self.dispose();
        let handles: Vec<_> = crate::lock(&self.workers).drain(..).collect();
        let me = thread::current().id();
        for handle in handles {
            // A job that drops the last runner handle runs on a worker.
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }

    fn spawn_worker(&self, id: usize, prefix: &str) -> io::Result<JoinHandle<()>> {
        let shared = self.shared.clone();
        thread::Builder::new()
            .name(format!("{}-{}", prefix, id))
            .spawn(move || worker_loop(id, &shared))
    }
}

impl AsyncRunner for ThreadPoolRunner {
    fn dispatch(&self, job: Job) -> Result<(), Error> {
        {
            let mut state = crate::lock(&self.shared.state);
            if state.disposed {
                return Err(Error::Disposed);
            }
            state.jobs.push_back(job);
        }
        self.shared.work_available.notify_one();
        Ok(())
    }

    fn dispose(&self) {
        let queued = {
            let mut state = crate::lock(&self.shared.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.jobs.len()
        };
        self.shared.work_available.notify_all();
        tracing::debug!(queued, "thread pool runner disposed");
    }

    fn is_disposed(&self) -> bool {
        crate::lock(&self.shared.state).disposed
    }
}

impl Drop for ThreadPoolRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &PoolShared) {
    tracing::debug!(worker = id, "worker started");
    while let Some(job) = next_job(shared) {
        tracing::trace!(worker = id, "running job");
        run_job(job);
    }
    tracing::debug!(worker = id, "worker stopped");
}

/// Block until a job is available. `None` once disposed and drained.
fn next_job(shared: &PoolShared) -> Option<Job> {
    let mut state = crate::lock(&shared.state);
    loop {
        if let Some(job) = state.jobs.pop_front() {
            return Some(job);
        }
        if state.disposed {
            return None;
        }
        state = crate::wait(&shared.work_available, state);
    }
}

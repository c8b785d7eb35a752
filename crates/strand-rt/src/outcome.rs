// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Outcome of a computation that may not have happened yet.
//!
//! Three variants behind one handle:
//! - eager: already completed when constructed
//! - lazy: runs its function on the first `wait()`, exactly once
//! - scheduled: completed by whoever holds the `Completer` (a runner
//!   worker, a clock registration, a gate)
//!
//! Every variant completes at most once and replays the stored value or
//! error on each `wait()`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{catch, Error};

type Thunk<T> = Box<dyn FnOnce() -> Result<T, Error> + Send>;
type Continuation<T> = Box<dyn FnOnce(&Result<T, Error>) + Send>;

/// Handle to a value (or error) that is, or will be, produced once.
///
/// Cloning the handle shares the underlying outcome.
pub struct Outcome<T> {
    repr: Repr<T>,
}

enum Repr<T> {
    Ready(Arc<Result<T, Error>>),
    Lazy(Arc<LazyCell<T>>),
    Scheduled(Arc<Slot<T>>),
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Ready(r) => Repr::Ready(r.clone()),
            Repr::Lazy(cell) => Repr::Lazy(cell.clone()),
            Repr::Scheduled(slot) => Repr::Scheduled(slot.clone()),
        };
        Self { repr }
    }
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, completed) = match &self.repr {
            Repr::Ready(_) => ("eager", true),
            Repr::Lazy(cell) => ("lazy", cell.value.get().is_some()),
            Repr::Scheduled(slot) => ("scheduled", slot.is_completed()),
        };
        f.debug_struct("Outcome")
            .field("kind", &kind)
            .field("completed", &completed)
            .finish()
    }
}

impl<T> Outcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Already-completed outcome holding `value`.
    pub fn ready(value: T) -> Self {
        Self::completed(Ok(value))
    }

    /// Already-completed outcome holding `error`.
    pub fn failed(error: Error) -> Self {
        Self::completed(Err(error))
    }

    pub fn completed(result: Result<T, Error>) -> Self {
        Self {
            repr: Repr::Ready(Arc::new(result)),
        }
    }

    /// Run `f` now. A panic becomes the outcome's error.
    pub fn eager<F>(f: F) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::completed(catch(f))
    }

    /// Run a fallible `f` now. `Err` becomes the outcome's error.
    pub fn eager_fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::completed(catch(f).and_then(|r| r.map_err(Error::failed)))
    }

    /// Defer `f` until the first `wait()`.
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::lazy_cell(LazyCell::root(Box::new(move || catch(f))))
    }

    pub fn lazy_fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::lazy_cell(LazyCell::root(Box::new(move || {
            catch(f).and_then(|r| r.map_err(Error::failed))
        })))
    }

    /// A scheduled outcome and the handle that completes it.
    pub fn pending() -> (Completer<T>, Self) {
        let slot = Arc::new(Slot::new());
        let completer = Completer {
            producer: Arc::new(Producer { slot: slot.clone() }),
        };
        (
            completer,
            Self {
                repr: Repr::Scheduled(slot),
            },
        )
    }

    fn lazy_cell(cell: LazyCell<T>) -> Self {
        Self {
            repr: Repr::Lazy(Arc::new(cell)),
        }
    }

    /// Block until completed, then return the stored value or error.
    ///
    /// Safe to call any number of times; a lazy function only ever runs
    /// on the first call.
    pub fn wait(&self) -> Result<T, Error> {
        match &self.repr {
            Repr::Ready(r) => (**r).clone(),
            Repr::Lazy(cell) => cell.force().clone(),
            Repr::Scheduled(slot) => (*slot.wait()).clone(),
        }
    }

    /// Like `wait()`, but gives up after `timeout` of real time.
    ///
    /// Giving up does not touch the outcome; a later `wait()` still
    /// observes the eventual result. Lazy outcomes are forced, so the
    /// timeout does not bound their evaluation.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, Error> {
        match &self.repr {
            Repr::Scheduled(slot) => {
                let deadline = TimeDelta::from_std(timeout)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                match slot.wait_timeout(timeout) {
                    Some(r) => (*r).clone(),
                    None => Err(Error::Timeout { deadline }),
                }
            }
            _ => self.wait(),
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.repr {
            Repr::Ready(_) => true,
            Repr::Lazy(cell) => cell.value.get().is_some(),
            Repr::Scheduled(slot) => slot.is_completed(),
        }
    }

    /// For a lazy outcome derived with `then`, whether the parent has been
    /// awaited yet. Outcomes without a pending parent report `true`.
    pub fn is_parent_completed(&self) -> bool {
        match &self.repr {
            Repr::Lazy(cell) => cell.parent_done.load(Ordering::Acquire),
            _ => true,
        }
    }

    /// Derived outcome holding `f(value)`.
    ///
    /// Eager parent: `f` runs now. Lazy parent: nothing runs until the
    /// derived outcome is awaited. Scheduled parent: `f` runs on the
    /// completing thread. A failed parent skips `f`.
    pub fn then<U, F>(&self, f: F) -> Outcome<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |r| r.and_then(|v| continuation(move || f(v))))
    }

    /// Derived outcome that runs `f` after the parent succeeds.
    pub fn then_run<F>(&self, f: F) -> Outcome<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.chain(move |r| r.and_then(|_| continuation(f)))
    }

    pub fn then_fallible<U, E, F>(&self, f: F) -> Outcome<U>
    where
        U: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.chain(move |r| {
            r.and_then(|v| continuation(move || f(v)))
                .and_then(|res| res.map_err(Error::failed))
        })
    }

    fn chain<U, K>(&self, k: K) -> Outcome<U>
    where
        U: Clone + Send + Sync + 'static,
        K: FnOnce(Result<T, Error>) -> Result<U, Error> + Send + 'static,
    {
        match &self.repr {
            Repr::Ready(r) => Outcome::completed(k((**r).clone())),
            Repr::Lazy(_) => {
                let parent = self.clone();
                let parent_done = Arc::new(AtomicBool::new(false));
                let flag = parent_done.clone();
                Outcome::lazy_cell(LazyCell {
                    value: OnceLock::new(),
                    thunk: Mutex::new(Some(Box::new(move || {
                        let r = parent.wait();
                        flag.store(true, Ordering::Release);
                        k(r)
                    }))),
                    parent_done,
                })
            }
            Repr::Scheduled(slot) => {
                let (completer, derived) = Outcome::pending();
                slot.on_complete(Box::new(move |r| {
                    completer.complete(k(r.clone()));
                }));
                derived
            }
        }
    }
}

fn continuation<U>(f: impl FnOnce() -> U) -> Result<U, Error> {
    let r = catch(f);
    if let Err(e) = &r {
        tracing::debug!(error = %e, "continuation failed");
    }
    r
}

/// Write side of a scheduled `Outcome`.
///
/// Clones share one producer. The first `complete` wins; later calls are
/// ignored. If every clone is dropped first, waiters see
/// `Error::Abandoned` instead of blocking forever.
pub struct Completer<T> {
    producer: Arc<Producer<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("completed", &self.producer.slot.is_completed())
            .finish()
    }
}

impl<T> Completer<T> {
    /// Store `result`. Returns false if the outcome was already completed.
    pub fn complete(&self, result: Result<T, Error>) -> bool {
        self.producer.slot.complete(result)
    }

    pub fn is_completed(&self) -> bool {
        self.producer.slot.is_completed()
    }
}

struct Producer<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.slot.complete(Err(Error::Abandoned));
    }
}

struct LazyCell<T> {
    value: OnceLock<Result<T, Error>>,
    thunk: Mutex<Option<Thunk<T>>>,
    parent_done: Arc<AtomicBool>,
}

impl<T> LazyCell<T> {
    fn root(thunk: Thunk<T>) -> Self {
        Self {
            value: OnceLock::new(),
            thunk: Mutex::new(Some(thunk)),
            parent_done: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Evaluate on first call. Concurrent callers block until the first
    /// evaluation finishes.
    fn force(&self) -> &Result<T, Error> {
        self.value.get_or_init(|| {
            let thunk = crate::lock(&self.thunk).take();
            match thunk {
                Some(thunk) => thunk(),
                None => Err(Error::Abandoned),
            }
        })
    }
}

/// Completion slot with condvar signalling (complete-once).
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    done: Condvar,
}

struct SlotState<T> {
    result: Option<Arc<Result<T, Error>>>,
    continuations: Vec<Continuation<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                result: None,
                continuations: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<T, Error>) -> bool {
        let result = Arc::new(result);
        let continuations = {
            let mut state = crate::lock(&self.state);
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.continuations)
        };
        self.done.notify_all();
        for k in continuations {
            k(&result);
        }
        true
    }

    fn is_completed(&self) -> bool {
        crate::lock(&self.state).result.is_some()
    }

    fn wait(&self) -> Arc<Result<T, Error>> {
        let mut state = crate::lock(&self.state);
        loop {
            if let Some(r) = &state.result {
                return r.clone();
            }
            state = crate::wait(&self.done, state);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Result<T, Error>>> {
        let state = crate::lock(&self.state);
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| s.result.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.result.clone()
    }

    fn on_complete(&self, k: Continuation<T>) {
        let result = {
            let mut state = crate::lock(&self.state);
            match &state.result {
                Some(r) => r.clone(),
                None => {
                    state.continuations.push(k);
                    return;
                }
            }
        };
        k(&result);
    }
}

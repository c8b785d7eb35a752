// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Locked<T>: a value only reachable while its mutex is held.
//!
//! Closure-based access, no escaping references. The mutex is released
//! on every exit path, including a panicking callback.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use crate::mutex::SpinMutex;

/// Value guarded by a `SpinMutex`.
///
/// The mutex is private unless one is passed to `with_mutex`, in which
/// case several values can share a lock. Nesting `unlock` calls on two
/// values that share a mutex panics, the lock is not reentrant.
pub struct Locked<T> {
    mutex: Arc<SpinMutex>,
    value: UnsafeCell<T>,
}

// Safety: the value is only reached through `unlock`/`try_unlock`, which
// hold the mutex for the whole callback. T: Send is enough since no two
// threads ever see the value at once.
unsafe impl<T: Send> Send for Locked<T> {}
unsafe impl<T: Send> Sync for Locked<T> {}

impl<T> Locked<T> {
    pub fn new(value: T) -> Self {
        Self::with_mutex(value, Arc::new(SpinMutex::new()))
    }

    /// Guard `value` with an externally supplied mutex.
    pub fn with_mutex(value: T, mutex: Arc<SpinMutex>) -> Self {
        Self {
            mutex,
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the mutex and run `f` with exclusive access.
    pub fn unlock<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let _guard = self.mutex.lock();
        // Safety: the guard gives this thread exclusive access until it
        // drops, and `release()` is refused while a guard is alive.
        f(unsafe { &mut *self.value.get() })
    }

    /// Run `f` only if the mutex is free right now.
    pub fn try_unlock<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let _guard = self.mutex.try_lock()?;
        // Safety: same as `unlock`.
        Some(f(unsafe { &mut *self.value.get() }))
    }

    /// The guarding mutex, for `is_acquired*` checks and for sharing with
    /// `with_mutex`. While `unlock` runs, `release()` on it is refused, so
    /// the callback cannot hand the lock to another thread early.
    pub fn mutex(&self) -> &Arc<SpinMutex> {
        &self.mutex
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Locked<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Locked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locked")
            .field("mutex", &self.mutex)
            .finish_non_exhaustive()
    }
}

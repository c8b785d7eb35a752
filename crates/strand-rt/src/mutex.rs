// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Spin mutex with ownership tracking.
//!
//! Compare-and-swap loop on an atomic flag. Unfair: waiters are not
//! ordered, so a hot lock can starve a thread. Only for short critical
//! sections such as the ones `Locked<T>` runs.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crate::error::Error;

/// Spins before each `yield_now` while contended.
const SPINS_BEFORE_YIELD: u32 = 64;

/// No thread holds the mutex.
const NO_OWNER: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// Non-reentrant spin lock that remembers which thread holds it.
pub struct SpinMutex {
    locked: AtomicBool,
    owner: AtomicU64,
    /// Held through a `SpinGuard`; only the guard may release it.
    scoped: AtomicBool,
}

impl SpinMutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(NO_OWNER),
            scoped: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is ours.
    ///
    /// # Panics
    ///
    /// If the calling thread already holds the lock; waiting would never end.
    pub fn acquire(&self) {
        let me = current_token();
        if self.owner.load(Ordering::Acquire) == me {
            panic!("SpinMutex is not reentrant: already held by the current thread");
        }
        let mut spins = 0u32;
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.owner.store(me, Ordering::Release);
                return;
            }
            // Wait on plain loads so contended spinning doesn't hammer the
            // cache line with failed CAS writes.
            while self.locked.load(Ordering::Relaxed) {
                spins += 1;
                if spins % SPINS_BEFORE_YIELD == 0 {
                    thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Take the lock if it is free, without waiting.
    pub fn try_acquire(&self) -> bool {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(current_token(), Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Release a lock taken with `acquire`/`try_acquire`. Only the holding
    /// thread may do this, and never while a `SpinGuard` owns the lock.
    pub fn release(&self) -> Result<(), Error> {
        if !self.is_acquired_by_current_thread() {
            return Err(Error::precondition(
                "SpinMutex released by a thread that does not hold it",
            ));
        }
        if self.scoped.load(Ordering::Acquire) {
            return Err(Error::precondition(
                "SpinMutex is held by a guard and is released when the guard drops",
            ));
        }
        self.unlock_if_owner();
        Ok(())
    }

    /// Clear the lock if the current thread owns it.
    fn unlock_if_owner(&self) -> bool {
        if self
            .owner
            .compare_exchange(current_token(), NO_OWNER, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        self.locked.store(false, Ordering::Release);
        true
    }

    pub fn is_acquired(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn is_acquired_by_current_thread(&self) -> bool {
        self.is_acquired() && self.owner.load(Ordering::Acquire) == current_token()
    }

    /// Acquire and return a guard that releases on drop, including
    /// during unwinding.
    pub fn lock(&self) -> SpinGuard<'_> {
        self.acquire();
        self.guard()
    }

    /// Guarded `try_acquire`.
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self.try_acquire() {
            Some(self.guard())
        } else {
            None
        }
    }

    fn guard(&self) -> SpinGuard<'_> {
        self.scoped.store(true, Ordering::Release);
        SpinGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }
}

impl Default for SpinMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpinMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinMutex")
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

/// Scoped acquisition of a `SpinMutex`.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    mutex: &'a SpinMutex,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.mutex.scoped.store(false, Ordering::Release);
        if !self.mutex.unlock_if_owner() {
            tracing::warn!("SpinGuard dropped by a thread that no longer owns the mutex");
        }
    }
}

impl fmt::Debug for SpinGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinGuard").finish_non_exhaustive()
    }
}

//! Condition Variable.
//!
//! A condition variable allows a thread to block until a predicate over the
//! data of a [`Mutex`] becomes false. The waiting thread releases the mutex
//! while it sleeps, and takes it again before re-checking the predicate:
//!
//! ```ignore
//! let guard = condvar.wait_while(&mutex, |state| state.is_empty());
//! ```
//!
//! [`ConditionVariable::signal`] wakes the waiter of the highest priority,
//! and [`ConditionVariable::broadcast`] wakes all of them, from the highest
//! priority down. Signals are not buffered: signaling a condition variable
//! without waiters does nothing.

use super::{Mutex, MutexGuard, Semaphore, SpinLock};
use crate::thread::{Current, Tid, scheduler};
use abyss::interrupt::in_interrupt_context;
use alloc::{collections::VecDeque, sync::Arc};

struct Waiter {
    tid: Tid,
    sema: Arc<Semaphore<()>>,
}

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a mutex. The predicate is always verified inside of the mutex before
/// determining that a thread must block.
///
/// Note that using multiple mutexes on the same condition variable is a
/// logic error.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: SpinLock<VecDeque<Waiter>>,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Atomically releases the mutex of `guard` and blocks until signaled,
    /// then takes the mutex again.
    ///
    /// Spurious wake-ups are possible from the point of view of the caller's
    /// predicate; re-check it, or use [`wait_while`].
    ///
    /// [`wait_while`]: ConditionVariable::wait_while
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        assert!(
            !in_interrupt_context(),
            "Try to wait on a condition variable inside an interrupt handler."
        );
        let mutex = guard.mutex();
        let sema = Arc::new(Semaphore::new(0, ()));
        let mut waiters = self.waiters.lock();
        waiters.push_back(Waiter {
            tid: Current::get_tid(),
            sema: sema.clone(),
        });
        waiters.unlock();

        guard.unlock();
        sema.down();
        mutex.lock()
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// This function takes reference of a [`Mutex`] and checks the
    /// predicate. If it returns `true`, the thread is blocked and the mutex is
    /// temporarily released. When the thread is signaled and wakes up, it
    /// reacquires the mutex and re-evaluates the predicate. This loop continues
    /// until the predicate returns `false`.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        predicate: impl Fn(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    fn notify_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        let waiter = scheduler::pick_highest(waiters.iter().map(|w| w.tid))
            .and_then(|idx| waiters.remove(idx));
        waiters.unlock();
        match waiter {
            Some(waiter) => {
                waiter.sema.signal();
                true
            }
            None => false,
        }
    }

    /// Wakes up one blocked thread on this condvar, and releases the mutex.
    ///
    /// The waiter of the highest priority is woken up. Calls to `signal` are
    /// not buffered in any way.
    ///
    /// To wake up all threads, see [`broadcast`].
    ///
    /// [`broadcast`]: ConditionVariable::broadcast
    pub fn signal<T>(&self, guard: MutexGuard<'_, T>) {
        self.notify_one();
        guard.unlock();
    }

    /// Wakes up all blocked threads on this condvar, and releases the mutex.
    ///
    /// To wake up only one thread, see [`signal`].
    ///
    /// [`signal`]: ConditionVariable::signal
    pub fn broadcast<T>(&self, guard: MutexGuard<'_, T>) {
        while self.notify_one() {}
        guard.unlock();
    }

    /// Number of blocked threads.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let len = waiters.len();
        waiters.unlock();
        len
    }
}

//! Semaphore.
//!
//! A semaphore is a counter of permits combined with a resource. Threads
//! acquire a permit with [`Semaphore::wait`], which blocks while no permit is
//! left, and give it back either explicitly via [`Semaphore::signal`] or by
//! dropping the [`SemaphorePermits`] guard.
//!
//! A semaphore initialized with zero permits serves as an event: one thread
//! waits for the event that another thread, or an interrupt handler, signals.
//!
//! ```ignore
//! let sema = Semaphore::new(3, state); // Allows up to 3 concurrent threads to the state
//!
//! // Acquire a permit (blocks if unavailable)
//! let permit = sema.wait();
//! permit.work(); // Call a method defined on the `state`.
//! // Permit is released when `permit` goes out of scope.
//! ```
use super::{SpinLock, WouldBlock};
use crate::thread::{Current, ParkHandle, scheduler};
use abyss::interrupt::in_interrupt_context;
use alloc::collections::VecDeque;
use core::ops::Deref;

struct SemaphoreInner {
    permits: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore.
///
/// A semaphore maintains a set of permits and resource. Permits are used to
/// synchronize access to a shared resource. A semaphore differs from a mutex in
/// that it can allow more than one concurrent caller to access the shared
/// resource at a time.
pub struct Semaphore<T> {
    resource: T,
    inner: SpinLock<SemaphoreInner>,
}

impl<T> Semaphore<T> {
    /// Creates a new semaphore initialized with a specified number of permits.
    ///
    /// # Arguments
    ///
    /// * `permits` - The initial number of available permits.
    /// * `resource` - A resource combined with this semaphore.
    pub const fn new(permits: usize, resource: T) -> Self {
        Self {
            resource,
            inner: SpinLock::new(SemaphoreInner {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// If no permits are available, this function will block the current
    /// thread until another thread calls `signal()` to release a permit.
    ///
    /// This method returns a [`SemaphorePermits`] RAII guard. When the guard is
    /// dropped, it will automatically release the acquired permit.
    pub fn wait(&self) -> SemaphorePermits<'_, T> {
        self.down();
        SemaphorePermits { sema: self }
    }

    /// Acquires a permit if one is available, without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if no permit is left.
    pub fn try_wait(&self) -> Result<SemaphorePermits<'_, T>, WouldBlock> {
        self.try_down().map(|()| SemaphorePermits { sema: self })
    }

    /// Releases a permit back to the semaphore.
    ///
    /// This method increases the number of available permits by one, and if
    /// any threads are blocked in `wait()`, the one of the highest priority is
    /// woken up to acquire the newly released permit.
    ///
    /// May be called inside an interrupt handler.
    pub fn signal(&self) {
        self.up()
    }

    /// Number of available permits.
    pub fn permits(&self) -> usize {
        let inner = self.inner.lock();
        let permits = inner.permits;
        inner.unlock();
        permits
    }

    /// Number of blocked threads.
    pub fn waiters(&self) -> usize {
        let inner = self.inner.lock();
        let waiters = inner.waiters.len();
        inner.unlock();
        waiters
    }

    pub(crate) fn down(&self) {
        assert!(
            !in_interrupt_context(),
            "Try to wait on a semaphore inside an interrupt handler."
        );
        loop {
            let mut inner = self.inner.lock();
            if inner.permits > 0 {
                inner.permits -= 1;
                inner.unlock();
                return;
            }
            Current::park_with(move |handle| {
                inner.waiters.push_back(handle);
                inner.unlock();
            });
        }
    }

    pub(crate) fn try_down(&self) -> Result<(), WouldBlock> {
        let mut inner = self.inner.lock();
        let acquired = inner.permits > 0;
        if acquired {
            inner.permits -= 1;
        }
        inner.unlock();
        if acquired { Ok(()) } else { Err(WouldBlock) }
    }

    pub(crate) fn up(&self) {
        let mut inner = self.inner.lock();
        inner.permits += 1;
        let woken = scheduler::pick_highest(inner.waiters.iter().map(|h| h.tid()))
            .and_then(|idx| inner.waiters.remove(idx));
        if let Some(handle) = woken {
            handle.unpark();
            inner.unlock();
            scheduler::preempt_if_outranked();
        } else {
            inner.unlock();
        }
    }
}

impl<T: Default> Default for Semaphore<T> {
    /// Creates a `Semaphore<T>` of zero permits, with the `Default` value for
    /// T.
    fn default() -> Self {
        Self::new(0, T::default())
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
///
/// The data protected by the semaphore can be accessed through this guard via
/// its [`Deref`] implementations.
///
/// This structure is created by the [`wait`] method on [`Semaphore`].
///
/// [`wait`]: Semaphore::wait
pub struct SemaphorePermits<'a, T> {
    sema: &'a Semaphore<T>,
}

impl<T> Deref for SemaphorePermits<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.sema.resource
    }
}

impl<T> Drop for SemaphorePermits<'_, T> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}

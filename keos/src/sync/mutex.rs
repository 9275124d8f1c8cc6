//! Mutex.
//!
//! A mutex is a semaphore of one permit with an owner: only the thread that
//! locked it may unlock it, and locking a mutex twice from the same thread
//! panics.
//!
//! While a thread waits for a mutex, it donates its effective priority to the
//! owner, and through the owner to the owners of the locks the owner itself
//! waits for (see [`donation`]). The donation is revoked when the owner
//! unlocks the mutex. Donation only happens under schedulers that support it.
//!
//! [`donation`]: crate::thread::donation
use super::{Semaphore, WouldBlock};
use crate::thread::{
    Current, Tid,
    donation::{self, LockId},
    scheduler::{self, scheduler},
};
use abyss::interrupt::{InterruptGuard, in_interrupt_context};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The mutex can be created via a [`new`] constructor. Each mutex has a
/// type parameter which represents the data that it is protecting. The data can
/// only be accessed through the guards returned from [`lock`] and
/// [`try_lock`], which guarantees that the data is only ever accessed when the
/// mutex is locked.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```ignore
/// use alloc::sync::Arc;
/// use keos::sync::Mutex;
/// use keos::thread;
///
/// let data = Arc::new(Mutex::new(0));
/// let handle = {
///     let data = Arc::clone(&data);
///     thread::ThreadBuilder::new("work").spawn(move || {
///         let mut data = data.lock();
///         *data += 1;
///         // the lock must be "explicitly" unlocked.
///         data.unlock();
///     })
/// };
/// ```
pub struct Mutex<T> {
    sema: Semaphore<()>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex {
            sema: Semaphore::new(1, ()),
            data: UnsafeCell::new(t),
        }
    }

    fn id(&self) -> LockId {
        LockId::of(&self.sema)
    }

    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// Upon returning, the thread is the only thread with the lock held.
    ///
    /// # Panics
    /// Panics if the current thread already holds the mutex, or inside an
    /// interrupt handler.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        assert!(
            !in_interrupt_context(),
            "Try to acquire a mutex inside an interrupt handler."
        );
        let sched = scheduler();
        let id = self.id();
        let _guard = InterruptGuard::new();
        scheduler::with_state(|st| {
            let tid = st.running;
            let boosted = donation::lock_wait(&mut st.threads, &st.locks, tid, id, sched.donation());
            if !boosted.is_empty() {
                sched.reorder(&st.threads);
                trace!("Thread {} donates to {:?}.", tid, boosted);
            }
            if boosted.is_full() {
                debug!(
                    "Donation of thread {} stops after {} holders.",
                    tid,
                    donation::DONATION_DEPTH
                );
            }
        });
        self.sema.down();
        scheduler::with_state(|st| {
            let tid = st.running;
            donation::lock_acquired(&mut st.threads, &mut st.locks, tid, id, sched.donation());
        });
        MutexGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is
    /// returned. Otherwise, an guard is returned.
    ///
    /// This function does not block, and never donates.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        assert!(
            !in_interrupt_context(),
            "Try to acquire a mutex inside an interrupt handler."
        );
        assert!(
            !self.is_held_by_current(),
            "Try to acquire a lock that is already held by the current thread."
        );
        let sched = scheduler();
        let id = self.id();
        let _guard = InterruptGuard::new();
        self.sema.try_down()?;
        scheduler::with_state(|st| {
            let tid = st.running;
            donation::lock_acquired(&mut st.threads, &mut st.locks, tid, id, sched.donation());
        });
        Ok(MutexGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// The thread that holds the mutex.
    pub fn holder(&self) -> Option<Tid> {
        let id = self.id();
        scheduler::with_state(|st| st.locks.get(&id).copied())
    }

    /// Returns true if the current thread holds the mutex.
    pub fn is_held_by_current(&self) -> bool {
        self.holder() == Some(Current::get_tid())
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope) without unlocking, the panic occurs.
///
/// The lock must be explicitly unlocked by [`unlock`] method.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: 'a> {
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> MutexGuard<'a, T> {
    /// The mutex this guard holds.
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }

    /// Releases the underlying [`Mutex`].
    ///
    /// Donations of the threads that waited for this mutex are revoked, and
    /// the waiter of the highest priority gets the mutex next. The current
    /// thread yields if that waiter outranks it.
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock
    /// as available again.
    ///
    /// [`unlock`]: MutexGuard::unlock
    pub fn unlock(self) {
        assert!(
            !in_interrupt_context(),
            "Try to release a mutex inside an interrupt handler."
        );
        let lock = self.lock;
        core::mem::forget(self);

        let id = lock.id();
        let guard = InterruptGuard::new();
        scheduler::with_state(|st| {
            let tid = st.running;
            donation::lock_released(&mut st.threads, &mut st.locks, tid, id);
        });
        lock.sema.up();
        drop(guard);
        // Losing a donation may leave a ready thread ahead of us.
        scheduler::preempt_if_outranked();
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        panic!("`.unlock()` must be explicitly called for MutexGuard.");
    }
}

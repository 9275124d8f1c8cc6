//! Synchronization Primitives.
//!
//! Besides the [`SpinLock`], which masks interrupts, the kernel provides
//! primitives that put the waiting thread to sleep:
//!
//! - [`Semaphore`]: a counter of permits. Waiting on an exhausted semaphore
//!   blocks until another thread, or an interrupt handler, signals it.
//! - [`Mutex`]: a semaphore of one permit with an owner. A thread that waits
//!   for a mutex donates its priority to the owner when the scheduler
//!   supports it.
//! - [`ConditionVariable`]: waiting for a predicate over the data of a
//!   [`Mutex`].
//!
//! When a blocked thread is woken up, the waiter of the highest effective
//! priority goes first, and waiters of equal priority are woken in arrival
//! order. If the woken thread outranks the waker, the waker yields.
//!
//! | Primitive             | Blocks Thread? | Usable in interrupt handler? |
//! |-----------------------|----------------|------------------------------|
//! | [`SpinLock`]          | No (busy wait) | Yes                          |
//! | [`Semaphore`]         | Yes            | Signal only                  |
//! | [`Mutex`]             | Yes            | No                           |
//! | [`ConditionVariable`] | Yes            | No                           |

pub mod condition_variable;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use condition_variable::ConditionVariable;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermits};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};

//! Interrupt-masking spinlock.
//!
//! The kernel runs on a single cpu, so a spinlock only has to keep its holder
//! from being preempted: acquiring the lock disables interrupts, and releasing
//! it restores the interrupt state of before. Spinlocks are the only locks
//! that may be taken inside an interrupt handler, and the holder must never
//! block or yield.
//!
//! # Examples
//!
//! ```
//! use keos::sync::SpinLock;
//!
//! let counter = SpinLock::new(0);
//! let mut guard = counter.lock();
//! *guard += 1;
//! // the lock must be "explicitly" unlocked.
//! guard.unlock();
//! ```

pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};

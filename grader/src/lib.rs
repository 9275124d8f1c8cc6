//! Scenarios that exercise the scheduler and the synchronization primitives
//! on a booted kernel.
//!
//! Each scenario is a plain function run by [`keos::TestDriver`] in a fresh
//! thread of [`PRI_DEFAULT`]. A scenario fails by panicking, which powers the
//! machine off.
//!
//! [`PRI_DEFAULT`]: keos::thread::PRI_DEFAULT
#![no_std]
#![allow(clippy::new_without_default)]

extern crate alloc;
#[macro_use]
extern crate grading;

pub mod alarm;
pub mod donation;
pub mod mlfqs;
pub mod priority;
pub mod sync;

use alloc::vec::Vec;
use keos::{TestDriver, sync::SpinLock};

/// Maximum number of threads the grading kernels admit.
pub const MAX_THREADS: usize = 32;

/// An append-only log of events, shared between threads.
///
/// Unlike a [`keos::sync::Mutex`], recording never blocks or donates, so it
/// does not disturb the scheduling being observed.
pub struct Record<T> {
    events: SpinLock<Vec<T>>,
}

impl<T: Clone> Record<T> {
    /// Creates an empty log.
    pub const fn new() -> Self {
        Self {
            events: SpinLock::new(Vec::new()),
        }
    }

    /// Appends `event`.
    pub fn push(&self, event: T) {
        let mut events = self.events.lock();
        events.push(event);
        events.unlock();
    }

    /// The events recorded so far, oldest first.
    pub fn events(&self) -> Vec<T> {
        let events = self.events.lock();
        let v = events.clone();
        events.unlock();
        v
    }
}

/// Runs the scenarios of the priority scheduler.
pub fn priority_suite() -> i32 {
    TestDriver::start([
        &alarm::single,
        &alarm::multiple,
        &alarm::priority,
        &alarm::zero,
        &alarm::negative,
        &alarm::sub_tick,
        &sync::mutex::smoke,
        &sync::mutex::parking,
        &sync::mutex::try_lock,
        &sync::semaphore::sema_0,
        &sync::semaphore::no_lost_wakeup,
        &sync::semaphore::n_permits,
        &sync::semaphore::try_wait,
        &sync::condition_variable::bounded_buffer,
        &sync::condition_variable::broadcast,
        &priority::change,
        &priority::round_robin,
        &priority::sema,
        &priority::mutex,
        &priority::condvar,
        &priority::initial,
        &priority::states,
        &priority::invalid,
        &priority::exit_code,
        &priority::thread_limit,
        &priority::create_entry,
        &priority::reclamation,
        &donation::one,
        &donation::multiple,
        &donation::nest,
        &donation::lower,
        &donation::sema,
    ])
}

/// Runs the scenarios of the multi-level feedback queue scheduler.
pub fn mlfqs_suite() -> i32 {
    TestDriver::start([
        &alarm::single,
        &alarm::multiple,
        &sync::mutex::smoke,
        &sync::semaphore::sema_0,
        &sync::condition_variable::bounded_buffer,
        &mlfqs::set_priority,
        &mlfqs::nice,
        &mlfqs::fresh_child,
        &mlfqs::recent_cpu,
        &mlfqs::load_avg,
        &mlfqs::fair,
        &mlfqs::no_donation,
    ])
}

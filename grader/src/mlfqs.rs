//! The multi-level feedback queue scheduler.
//!
//! Priorities are computed from `recent_cpu` and `nice`; the scenarios only
//! check relations that hold regardless of the exact tick a thread starts at.
use crate::Record;
use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};
use keos::{
    KernelError,
    sync::Mutex,
    thread::{
        Current, NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_MAX, ThreadBuilder, ThreadState,
        get_state_by_tid,
        mlfqs::{PRIORITY_INTERVAL, priority_of},
        scheduler, with_current,
    },
    timer,
};

/// Busy-waits until the next tick after a second boundary.
fn align_to_second() {
    while timer::ticks() % timer::frequency() != 1 {
        keos::intrinsics::pause();
    }
}

/// Priorities cannot be set by hand.
pub fn set_priority() {
    let before = Current::priority();
    assert_eq!(
        Current::set_priority(PRI_MAX),
        Err(KernelError::NotSupportedOperation)
    );
    assert_eq!(Current::priority(), before);
}

/// The priority follows the niceness at once.
pub fn nice() {
    assert_eq!(Current::nice(), NICE_DEFAULT);
    assert!(Current::set_nice(5).is_ok());
    assert_eq!(Current::nice(), 5);
    let recent_cpu = with_current(|th| th.recent_cpu());
    assert_eq!(Current::priority(), priority_of(recent_cpu, 5));

    assert_eq!(
        Current::set_nice(NICE_MAX + 1),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        Current::set_nice(NICE_MIN - 1),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(Current::nice(), 5);
    assert!(Current::set_nice(NICE_DEFAULT).is_ok());
}

/// A new thread starts with the default niceness and no recent cpu usage,
/// whatever its creator has accumulated.
#[validate_threads]
pub fn fresh_child() {
    assert!(Current::set_nice(3).is_ok());
    grading::busy_ticks(PRIORITY_INTERVAL);
    assert!(Current::recent_cpu() > 0);

    let seen = Arc::new(Record::new());
    let handle = {
        let seen = seen.clone();
        ThreadBuilder::new("child")
            .spawn(move || seen.push((Current::nice(), Current::recent_cpu())))
            .expect("Failed to spawn the child.")
    };
    assert_eq!(handle.join(), 0);
    assert_eq!(seen.events(), [(NICE_DEFAULT, 0)]);
    assert_eq!(Current::nice(), 3);
    assert!(Current::set_nice(NICE_DEFAULT).is_ok());
}

/// `recent_cpu` grows by one per tick of running, and decays every second.
pub fn recent_cpu() {
    align_to_second();
    let before = Current::recent_cpu();
    grading::busy_ticks(timer::frequency() / 2);
    let after = Current::recent_cpu();
    assert_eq!(after - before, 100 * (timer::frequency() / 2) as i32);

    // Without the decay, the ticks up to the boundary would add up to this.
    let undecayed = after + 100 * (timer::frequency() / 2 - 1) as i32;
    align_to_second();
    assert!(Current::recent_cpu() < undecayed);
}

/// The load average rises while several threads compete for the cpu.
#[validate_threads]
pub fn load_avg() {
    const THREADS: usize = 3;
    let before = scheduler::load_avg();
    let deadline = timer::ticks() + 3 * timer::frequency();
    let handles = (0..THREADS)
        .map(|i| {
            ThreadBuilder::new(alloc::format!("spinner {i}"))
                .spawn(move || {
                    while timer::ticks() < deadline {
                        keos::intrinsics::pause();
                    }
                })
                .expect("Failed to spawn a spinner.")
        })
        .collect::<Vec<_>>();
    while timer::ticks() < deadline {
        keos::intrinsics::pause();
    }
    assert!(scheduler::load_avg() > before);
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
}

/// A nicer thread gets less of the cpu.
#[validate_threads]
pub fn fair() {
    let deadline = timer::ticks() + 2 * timer::frequency();
    let run = |nice: i32| {
        let count = Arc::new(AtomicU64::new(0));
        let handle = {
            let count = count.clone();
            ThreadBuilder::new(alloc::format!("nice {nice}"))
                .spawn(move || {
                    assert!(Current::set_nice(nice).is_ok());
                    let mut last = timer::ticks();
                    while last < deadline {
                        let now = timer::ticks();
                        if now != last {
                            count.fetch_add(1, Ordering::SeqCst);
                            last = now;
                        }
                        keos::intrinsics::pause();
                    }
                })
                .expect("Failed to spawn a thread.")
        };
        (handle, count)
    };
    let (eager, eager_ticks) = run(0);
    let (nicer, nicer_ticks) = run(10);
    timer::sleep(deadline.saturating_sub(timer::ticks()) as i64);

    assert_eq!(eager.join(), 0);
    assert_eq!(nicer.join(), 0);
    assert!(eager_ticks.load(Ordering::SeqCst) > nicer_ticks.load(Ordering::SeqCst));
}

/// Waiting for a mutex never raises the priority of its holder.
#[validate_threads]
pub fn no_donation() {
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock();
    let handle = {
        let lock = lock.clone();
        ThreadBuilder::new("waiter")
            .spawn(move || lock.lock().unlock())
            .expect("Failed to spawn the waiter.")
    };
    while get_state_by_tid(handle.tid) != Ok(ThreadState::Blocked) {
        timer::sleep(1);
    }
    with_current(|th| {
        assert!(th.donors().is_empty());
        assert_eq!(th.priority(), th.base_priority());
    });
    guard.unlock();
    assert_eq!(handle.join(), 0);
}

#![no_std]
extern crate grading_derive;

pub use grading_derive::*;

use keos::{
    thread::{self, Current},
    timer,
};

/// Keeps the cpu busy until `ticks` timer ticks have elapsed.
///
/// The current thread may be preempted meanwhile; the ticks of other threads
/// count as well.
pub fn busy_ticks(ticks: u64) {
    let start = timer::ticks();
    while timer::elapsed(start) < ticks {
        keos::intrinsics::pause();
    }
}

/// Keeps the cpu busy for `cycles` cpu cycles.
pub fn busy_cycles(cycles: u64) {
    for _ in 0..cycles {
        keos::intrinsics::pause();
    }
}

/// Sleeps until at most `expected` threads are alive.
///
/// # Panics
/// Panics if threads are still alive after a second.
pub fn wait_for_reclamation(expected: usize) {
    for _ in 0..timer::frequency() {
        if thread::live_threads() <= expected {
            return;
        }
        timer::sleep(1);
    }
    panic!(
        "{} thread(s) are not reclaimed.",
        thread::live_threads() - expected
    );
}

/// Asserts that no thread donates to the current thread.
pub fn assert_no_donation() {
    thread::with_current(|th| {
        assert!(
            th.donors().is_empty(),
            "Thread {} still has donors: {:?}",
            th.name,
            th.donors()
        );
        assert_eq!(th.waiting_on(), None);
    });
    assert_eq!(Current::priority(), Current::base_priority());
}

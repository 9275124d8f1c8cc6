//! Sleeping on the timer.
use crate::Record;
use alloc::{sync::Arc, vec::Vec};
use keos::{
    thread::{Current, PRI_DEFAULT, PRI_MIN, ThreadBuilder},
    timer,
};

/// A thread sleeps for at least the requested number of ticks.
#[validate_threads]
pub fn single() {
    let start = timer::ticks();
    timer::sleep(10);
    assert!(timer::elapsed(start) >= 10);

    let start = timer::ticks();
    timer::msleep(100);
    assert!(timer::elapsed(start) >= 100 * timer::frequency() / 1000);
}

/// Sleepers wake up in the order of their deadlines, not in the order they
/// went to sleep.
#[validate_threads]
pub fn multiple() {
    let record = Arc::new(Record::new());
    let handles = [5, 1, 3].map(|n: i64| {
        let record = record.clone();
        ThreadBuilder::new(alloc::format!("sleeper {n}"))
            .spawn(move || {
                timer::sleep(n * 10);
                record.push(n);
            })
            .expect("Failed to spawn a sleeper.")
    });
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(record.events(), [1, 3, 5]);
}

/// Sleepers that wake up at the same tick run in the order of their
/// priorities.
#[validate_threads]
pub fn priority() {
    let record = Arc::new(Record::new());
    let wake = timer::ticks() + 50;
    let handles = (0..10)
        .map(|i| {
            let priority = PRI_DEFAULT - (i + 5) % 10 - 1;
            let record = record.clone();
            ThreadBuilder::new(alloc::format!("priority {priority}"))
                .priority(priority)
                .spawn(move || {
                    timer::sleep(wake.saturating_sub(timer::ticks()) as i64);
                    record.push(Current::priority());
                })
                .expect("Failed to spawn a sleeper.")
        })
        .collect::<Vec<_>>();

    // Let the sleepers go to sleep.
    assert!(Current::set_priority(PRI_MIN).is_ok());
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(
        record.events(),
        (PRI_DEFAULT - 10..PRI_DEFAULT).rev().collect::<Vec<_>>()
    );
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Sleeping for zero ticks returns at once.
pub fn zero() {
    let start = timer::ticks();
    timer::sleep(0);
    assert_eq!(timer::elapsed(start), 0);
}

/// Sleeping for a negative number of ticks returns at once.
pub fn negative() {
    let start = timer::ticks();
    timer::sleep(-100);
    assert_eq!(timer::elapsed(start), 0);
}

/// Sleeps shorter than a tick busy-wait instead of giving up the cpu.
pub fn sub_tick() {
    let start = timer::ticks();
    timer::usleep(100);
    assert!(timer::elapsed(start) <= 1);

    let start = timer::ticks();
    timer::nsleep(1000);
    assert!(timer::elapsed(start) <= 1);
}

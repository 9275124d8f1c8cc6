//! Priority donation through mutexes.
use crate::Record;
use alloc::{sync::Arc, vec::Vec};
use keos::{
    sync::{Mutex, Semaphore},
    thread::{Current, PRI_DEFAULT, PRI_MAX, PRI_MIN, ThreadBuilder, get_priority_by_tid},
};

/// A waiter lends its priority to the holder until the mutex is released.
#[validate_threads]
pub fn one() {
    let lock = Arc::new(Mutex::new(()));
    let record = Arc::new(Record::new());
    assert!(Current::set_priority(10).is_ok());

    let guard = lock.lock();
    let handle = {
        let (lock, record) = (lock.clone(), record.clone());
        ThreadBuilder::new("donor")
            .priority(30)
            .spawn(move || {
                let guard = lock.lock();
                record.push("donor");
                guard.unlock();
            })
            .expect("Failed to spawn the donor.")
    };
    assert_eq!(Current::priority(), 30);
    assert_eq!(Current::base_priority(), 10);
    assert_eq!(lock.holder(), Some(Current::get_tid()));

    guard.unlock();
    record.push("holder");
    assert_eq!(Current::priority(), 10);
    assert_eq!(record.events(), ["donor", "holder"]);

    assert_eq!(handle.join(), 0);
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// A holder of two mutexes keeps the donation of the mutex it still holds.
#[validate_threads]
pub fn multiple() {
    let (a, b) = (Arc::new(Mutex::new(())), Arc::new(Mutex::new(())));
    let record = Arc::new(Record::new());

    let guard_a = a.lock();
    let guard_b = b.lock();
    let spawn = |name: &'static str, priority, lock: &Arc<Mutex<()>>| {
        let (lock, record) = (lock.clone(), record.clone());
        ThreadBuilder::new(name)
            .priority(priority)
            .spawn(move || {
                let guard = lock.lock();
                record.push(name);
                guard.unlock();
            })
            .expect("Failed to spawn a donor.")
    };
    let waiter_a = spawn("a", PRI_DEFAULT + 1, &a);
    assert_eq!(Current::priority(), PRI_DEFAULT + 1);
    let waiter_b = spawn("b", PRI_DEFAULT + 2, &b);
    assert_eq!(Current::priority(), PRI_DEFAULT + 2);

    guard_b.unlock();
    assert_eq!(record.events(), ["b"]);
    assert_eq!(Current::priority(), PRI_DEFAULT + 1);

    guard_a.unlock();
    assert_eq!(record.events(), ["b", "a"]);
    assert_eq!(Current::priority(), PRI_DEFAULT);

    assert_eq!(waiter_a.join(), 0);
    assert_eq!(waiter_b.join(), 0);
}

/// Donations flow down a chain of holders, for at most eight holders.
///
/// Thread `i` holds mutex `i` and waits for mutex `i - 1`, which the main
/// thread holds for `i == 1`. The last donor waits for mutex 9 at
/// [`PRI_MAX`].
#[validate_threads]
pub fn nest() {
    const CHAIN: usize = 9;
    let locks = Arc::new([(); CHAIN + 1].map(|_| Mutex::new(())));
    assert!(Current::set_priority(PRI_MIN).is_ok());

    let guard = locks[0].lock();
    let chain = (1..=CHAIN)
        .map(|i| {
            let locks = locks.clone();
            ThreadBuilder::new(alloc::format!("link {i}"))
                .priority(10 + 3 * i as i32)
                .spawn(move || {
                    let mine = locks[i].lock();
                    let next = locks[i - 1].lock();
                    next.unlock();
                    mine.unlock();
                })
                .expect("Failed to spawn a link.")
        })
        .collect::<Vec<_>>();
    // Link 9 reaches link 1, but not the main thread.
    assert_eq!(get_priority_by_tid(chain[0].tid), Ok(37));
    assert_eq!(Current::priority(), 34);

    let top = {
        let locks = locks.clone();
        ThreadBuilder::new("top")
            .priority(PRI_MAX)
            .spawn(move || locks[CHAIN].lock().unlock())
            .expect("Failed to spawn the top donor.")
    };
    for link in &chain[1..] {
        assert_eq!(get_priority_by_tid(link.tid), Ok(PRI_MAX));
    }
    assert_eq!(get_priority_by_tid(chain[0].tid), Ok(37));
    assert_eq!(Current::priority(), 34);

    guard.unlock();
    assert_eq!(Current::priority(), PRI_MIN);
    assert_eq!(top.join(), 0);
    for link in chain {
        assert_eq!(link.join(), 0);
    }
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Lowering the base priority of a thread that receives a donation takes
/// effect once the donation is revoked.
#[validate_threads]
pub fn lower() {
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock();
    let handle = {
        let lock = lock.clone();
        ThreadBuilder::new("donor")
            .priority(PRI_DEFAULT + 10)
            .spawn(move || lock.lock().unlock())
            .expect("Failed to spawn the donor.")
    };
    assert_eq!(Current::priority(), PRI_DEFAULT + 10);

    assert!(Current::set_priority(PRI_DEFAULT - 10).is_ok());
    assert_eq!(Current::priority(), PRI_DEFAULT + 10);
    assert_eq!(Current::base_priority(), PRI_DEFAULT - 10);

    guard.unlock();
    assert_eq!(Current::priority(), PRI_DEFAULT - 10);
    assert_eq!(handle.join(), 0);
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// A holder that sleeps on a semaphore carries its donation there, and wakes
/// up before a waiter of lower priority.
#[validate_threads]
pub fn sema() {
    let lock = Arc::new(Mutex::new(()));
    let sema = Arc::new(Semaphore::new(0, ()));
    let record = Arc::new(Record::new());

    let low = {
        let (lock, sema, record) = (lock.clone(), sema.clone(), record.clone());
        ThreadBuilder::new("low")
            .priority(PRI_DEFAULT + 1)
            .spawn(move || {
                let guard = lock.lock();
                core::mem::forget(sema.wait());
                guard.unlock();
                record.push("low");
            })
            .expect("Failed to spawn a thread.")
    };
    let medium = {
        let (sema, record) = (sema.clone(), record.clone());
        ThreadBuilder::new("medium")
            .priority(PRI_DEFAULT + 3)
            .spawn(move || {
                core::mem::forget(sema.wait());
                record.push("medium");
            })
            .expect("Failed to spawn a thread.")
    };
    let high = {
        let (lock, record) = (lock.clone(), record.clone());
        ThreadBuilder::new("high")
            .priority(PRI_DEFAULT + 5)
            .spawn(move || {
                let guard = lock.lock();
                record.push("high");
                guard.unlock();
            })
            .expect("Failed to spawn a thread.")
    };
    assert_eq!(get_priority_by_tid(low.tid), Ok(PRI_DEFAULT + 5));

    sema.signal();
    assert_eq!(record.events(), ["high", "low"]);
    sema.signal();
    assert_eq!(record.events(), ["high", "low", "medium"]);

    for handle in [low, medium, high] {
        assert_eq!(handle.join(), 0);
    }
}

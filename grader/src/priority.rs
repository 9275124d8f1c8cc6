//! Priority scheduling.
//!
//! The scenarios run under the priority scheduler, and rely on the donation of
//! priorities only where noted.
use crate::{MAX_THREADS, Record};
use alloc::{sync::Arc, vec::Vec};
use keos::{
    KernelError,
    sync::{ConditionVariable, Mutex, Semaphore},
    thread::{
        self, Current, PRI_DEFAULT, PRI_MAX, PRI_MIN, ThreadBuilder, ThreadState,
        get_priority_by_tid, get_state_by_tid, scheduler::TIME_SLICE,
    },
    timer,
};

/// A thread of higher priority runs as soon as it is created, and a thread
/// that lowers its priority below a ready thread yields at once.
#[validate_threads]
pub fn change() {
    let record = Arc::new(Record::new());
    let high = {
        let record = record.clone();
        ThreadBuilder::new("high")
            .priority(PRI_DEFAULT + 1)
            .spawn(move || record.push("high"))
            .expect("Failed to spawn a thread.")
    };
    record.push("main");

    let low = {
        let record = record.clone();
        ThreadBuilder::new("low")
            .priority(PRI_DEFAULT - 1)
            .spawn(move || record.push("low"))
            .expect("Failed to spawn a thread.")
    };
    record.push("main");
    assert!(Current::set_priority(PRI_DEFAULT - 2).is_ok());
    record.push("main");
    assert_eq!(record.events(), ["high", "main", "main", "low", "main"]);

    assert_eq!(high.join(), 0);
    assert_eq!(low.join(), 0);
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Threads of the same priority share the cpu in turns of a time slice.
#[validate_threads]
pub fn round_robin() {
    const THREADS: usize = 3;
    const ROUNDS: usize = 3;
    let record = Arc::new(Record::new());

    assert!(Current::set_priority(PRI_MAX).is_ok());
    let handles = (0..THREADS)
        .map(|i| {
            let record = record.clone();
            ThreadBuilder::new(alloc::format!("turn {i}"))
                .priority(PRI_DEFAULT + 10)
                .spawn(move || {
                    for _ in 0..ROUNDS {
                        record.push(i);
                        grading::busy_ticks(TIME_SLICE);
                    }
                })
                .expect("Failed to spawn a thread.")
        })
        .collect::<Vec<_>>();
    assert!(Current::set_priority(PRI_MIN).is_ok());

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    let expected = (0..ROUNDS)
        .flat_map(|_| 0..THREADS)
        .collect::<Vec<_>>();
    assert_eq!(record.events(), expected);
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Waiters of a semaphore wake up in the order of their priorities.
#[validate_threads]
pub fn sema() {
    let sema = Arc::new(Semaphore::new(0, ()));
    let record = Arc::new(Record::new());
    assert!(Current::set_priority(PRI_MIN).is_ok());

    let handles = (0..10)
        .map(|i| {
            let priority = PRI_DEFAULT - (i + 3) % 10 - 1;
            let (sema, record) = (sema.clone(), record.clone());
            ThreadBuilder::new(alloc::format!("priority {priority}"))
                .priority(priority)
                .spawn(move || {
                    core::mem::forget(sema.wait());
                    record.push(Current::priority());
                })
                .expect("Failed to spawn a thread.")
        })
        .collect::<Vec<_>>();

    for _ in 0..10 {
        sema.signal();
    }
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(
        record.events(),
        (PRI_DEFAULT - 10..PRI_DEFAULT).rev().collect::<Vec<_>>()
    );
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Waiters of a mutex get it in the order of their priorities.
#[validate_threads]
pub fn mutex() {
    let lock = Arc::new(Mutex::new(()));
    let record = Arc::new(Record::new());
    assert!(Current::set_priority(PRI_MIN).is_ok());

    let guard = lock.lock();
    let handles = [10, 20, 30].map(|priority| {
        let (lock, record) = (lock.clone(), record.clone());
        ThreadBuilder::new(alloc::format!("priority {priority}"))
            .priority(priority)
            .spawn(move || {
                let guard = lock.lock();
                record.push(Current::base_priority());
                guard.unlock();
            })
            .expect("Failed to spawn a thread.")
    });
    assert_eq!(Current::priority(), 30);
    guard.unlock();

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(record.events(), [30, 20, 10]);
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// Waiters of a condition variable wake up in the order of their priorities.
#[validate_threads]
pub fn condvar() {
    let state = Arc::new((Mutex::new(()), ConditionVariable::new()));
    let record = Arc::new(Record::new());
    assert!(Current::set_priority(PRI_MIN).is_ok());

    let handles = (0..10)
        .map(|i| {
            let priority = PRI_DEFAULT - (i + 7) % 10 - 1;
            let (state, record) = (state.clone(), record.clone());
            ThreadBuilder::new(alloc::format!("priority {priority}"))
                .priority(priority)
                .spawn(move || {
                    let (lock, cond) = &*state;
                    let guard = cond.wait(lock.lock());
                    record.push(Current::base_priority());
                    guard.unlock();
                })
                .expect("Failed to spawn a thread.")
        })
        .collect::<Vec<_>>();

    let (lock, cond) = &*state;
    assert_eq!(cond.waiters(), 10);
    for _ in 0..10 {
        cond.signal(lock.lock());
    }
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(
        record.events(),
        (PRI_DEFAULT - 10..PRI_DEFAULT).rev().collect::<Vec<_>>()
    );
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());
}

/// The states of threads can be queried by their ids.
#[validate_threads]
pub fn states() {
    assert_eq!(
        get_state_by_tid(Current::get_tid()),
        Ok(ThreadState::Running)
    );
    assert_eq!(get_priority_by_tid(Current::get_tid()), Ok(PRI_DEFAULT));

    let sema = Arc::new(Semaphore::new(0, ()));
    let handle = {
        let sema = sema.clone();
        ThreadBuilder::new("waiter")
            .priority(PRI_DEFAULT - 1)
            .spawn(move || core::mem::forget(sema.wait()))
            .expect("Failed to spawn a thread.")
    };
    assert_eq!(get_state_by_tid(handle.tid), Ok(ThreadState::Ready));
    assert_eq!(get_priority_by_tid(handle.tid), Ok(PRI_DEFAULT - 1));

    assert!(Current::set_priority(PRI_MIN).is_ok());
    assert_eq!(get_state_by_tid(handle.tid), Ok(ThreadState::Blocked));
    assert!(Current::set_priority(PRI_DEFAULT).is_ok());

    sema.signal();
    let tid = handle.tid;
    assert_eq!(handle.join(), 0);
    for _ in 0..timer::frequency() {
        if get_state_by_tid(tid).is_err() {
            break;
        }
        timer::sleep(1);
    }
    assert_eq!(get_state_by_tid(tid), Err(KernelError::InvalidArgument));
    assert_eq!(get_priority_by_tid(u64::MAX), Err(KernelError::InvalidArgument));
}

/// A thread runs at the priority it was created with.
#[priority(40)]
pub fn initial() {
    assert_eq!(Current::priority(), 40);
    assert_eq!(Current::base_priority(), 40);
    assert_eq!(get_priority_by_tid(Current::get_tid()), Ok(40));
}

/// Priorities out of range are rejected.
pub fn invalid() {
    assert_eq!(
        Current::set_priority(PRI_MAX + 1),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        Current::set_priority(PRI_MIN - 1),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(Current::priority(), PRI_DEFAULT);
}

/// The exit code of a thread reaches the joiner.
#[assert_exit_code(7)]
pub fn exit_code() {
    Current::exit(7);
}

/// Threads beyond the limit of the kernel cannot be created.
#[validate_threads]
pub fn thread_limit() {
    let room = MAX_THREADS - thread::live_threads();
    let handles = (0..room)
        .map(|i| {
            ThreadBuilder::new(alloc::format!("filler {i}"))
                .priority(PRI_MIN)
                .spawn(|| {})
                .expect("Failed to spawn a thread below the limit.")
        })
        .collect::<Vec<_>>();
    assert_eq!(thread::live_threads(), MAX_THREADS);
    assert_eq!(
        ThreadBuilder::new("excess").spawn(|| {}).err(),
        Some(KernelError::NoMemory)
    );
    assert_eq!(thread::live_threads(), MAX_THREADS);
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
}

static ENTERED: Record<usize> = Record::new();

fn enter(arg: usize) {
    ENTERED.push(arg);
}

/// A thread created from an entry function runs at once if it outranks its
/// creator, and no thread is created beyond the limit of the kernel.
#[validate_threads]
pub fn create_entry() {
    let before = ENTERED.events().len();
    assert!(thread::create("eager", PRI_DEFAULT + 1, enter, 42).is_ok());
    assert_eq!(ENTERED.events()[before..], [42]);

    // Fillers of lower priority wait until the test returns.
    let room = MAX_THREADS - thread::live_threads();
    for i in 0..room {
        assert!(thread::create("filler", PRI_MIN, enter, i).is_ok());
    }
    assert_eq!(ENTERED.events().len(), before + 1);
    assert_eq!(
        thread::create("excess", PRI_MAX, enter, usize::MAX),
        Err(KernelError::NoMemory)
    );
    assert_eq!(thread::live_threads(), MAX_THREADS);
}

/// Exited threads are reclaimed.
#[validate_threads]
pub fn reclamation() {
    for round in 0..3 {
        let handles = (0..MAX_THREADS / 2)
            .map(|i| {
                ThreadBuilder::new(alloc::format!("round {round} thread {i}"))
                    .spawn(move || {
                        if i % 2 == 0 {
                            Current::exit(0);
                        }
                    })
                    .expect("Failed to spawn a thread.")
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join(), 0);
        }
    }
}

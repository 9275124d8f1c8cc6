pub mod mutex {
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicBool, Ordering};
    use keos::{
        sync::Mutex,
        thread::{ThreadBuilder, ThreadState, get_state_by_tid},
    };

    /// Threads increment a shared counter under a mutex, and are preempted
    /// inside the critical section.
    #[validate_threads]
    pub fn smoke() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 100;
        let counter = Arc::new(Mutex::new(0));
        let handles = (0..THREADS)
            .map(|i| {
                let counter = counter.clone();
                ThreadBuilder::new(alloc::format!("worker {i}"))
                    .spawn(move || {
                        for _ in 0..ITERATIONS {
                            let mut guard = counter.lock();
                            let v = *guard;
                            grading::busy_cycles(100);
                            *guard = v + 1;
                            guard.unlock();
                        }
                    })
                    .expect("Failed to spawn a worker.")
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join(), 0);
        }
        let guard = counter.lock();
        assert_eq!(*guard, THREADS * ITERATIONS);
        guard.unlock();
    }

    /// A thread waiting for a mutex sleeps instead of spinning.
    #[validate_threads]
    pub fn parking() {
        let lock = Arc::new(Mutex::new(()));
        let started = Arc::new(AtomicBool::new(false));
        let guard = lock.lock();
        let handle = {
            let (lock, started) = (lock.clone(), started.clone());
            ThreadBuilder::new("waiter")
                .spawn(move || {
                    started.store(true, Ordering::SeqCst);
                    lock.lock().unlock();
                })
                .expect("Failed to spawn the waiter.")
        };
        while !started.load(Ordering::SeqCst) {
            keos::intrinsics::pause();
        }
        keos::thread::yield_now();
        assert_eq!(get_state_by_tid(handle.tid), Ok(ThreadState::Blocked));
        guard.unlock();
        assert_eq!(handle.join(), 0);
    }

    /// `try_lock` fails while another thread holds the mutex.
    #[validate_threads]
    pub fn try_lock() {
        let lock = Arc::new(Mutex::new(0));
        let guard = lock.lock();
        assert!(lock.is_held_by_current());
        let handle = {
            let lock = lock.clone();
            ThreadBuilder::new("contender")
                .spawn(move || {
                    assert!(lock.try_lock().is_err());
                    assert!(!lock.is_held_by_current());
                })
                .expect("Failed to spawn the contender.")
        };
        assert_eq!(handle.join(), 0);
        guard.unlock();

        let mut guard = lock.try_lock().expect("Mutex is not released.");
        *guard += 1;
        guard.unlock();
        assert_eq!(lock.holder(), None);
    }
}

pub mod semaphore {
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use keos::{sync::Semaphore, thread::ThreadBuilder};

    /// A waiter of a semaphore without permits wakes up on signal.
    #[validate_threads]
    pub fn sema_0() {
        let sema = Arc::new(Semaphore::new(0, ()));
        let is_thread_active = Arc::new(AtomicBool::new(false));
        let is_woken_up = Arc::new(AtomicBool::new(false));

        let thread = {
            let (sema, is_thread_active, is_woken_up) =
                (sema.clone(), is_thread_active.clone(), is_woken_up.clone());

            ThreadBuilder::new("worker")
                .spawn(move || {
                    is_thread_active.store(true, Ordering::SeqCst);
                    core::mem::forget(sema.wait());
                    is_woken_up.store(true, Ordering::SeqCst);
                })
                .expect("Failed to spawn the worker.")
        };

        while !is_thread_active.load(Ordering::SeqCst) {
            keos::intrinsics::pause();
        }
        keos::thread::yield_now();

        assert!(!is_woken_up.load(Ordering::SeqCst));
        assert_eq!(sema.waiters(), 1);

        sema.signal();
        assert_eq!(thread.join(), 0);

        assert!(is_woken_up.load(Ordering::SeqCst));
        assert_eq!(sema.permits(), 0);
    }

    /// A signal that comes before the wait is not lost.
    #[validate_threads]
    pub fn no_lost_wakeup() {
        let sema = Arc::new(Semaphore::new(0, ()));
        let signaler = {
            let sema = sema.clone();
            ThreadBuilder::new("signaler")
                .spawn(move || sema.signal())
                .expect("Failed to spawn the signaler.")
        };
        assert_eq!(signaler.join(), 0);
        assert_eq!(sema.permits(), 1);
        core::mem::forget(sema.wait());
        assert_eq!(sema.permits(), 0);
    }

    /// At most `PERMITS` threads hold a permit at the same time.
    #[validate_threads]
    pub fn n_permits() {
        const COUNT: usize = 8;
        const PERMITS: usize = 3;

        let sema = Arc::new(Semaphore::new(PERMITS, ()));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles = (0..COUNT)
            .map(|i| {
                let (sema, inside, peak) = (sema.clone(), inside.clone(), peak.clone());
                ThreadBuilder::new(alloc::format!("support_{i}"))
                    .spawn(move || {
                        let _permit = sema.wait();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        grading::busy_ticks(2);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .expect("Failed to spawn a worker.")
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join(), 0);
        }
        assert!(peak.load(Ordering::SeqCst) <= PERMITS);
        assert_eq!(sema.permits(), PERMITS);
    }

    /// `try_wait` fails once the permits run out.
    pub fn try_wait() {
        let sema = Semaphore::new(1, 7);
        let permit = sema.try_wait().expect("A permit is left.");
        assert_eq!(*permit, 7);
        assert!(sema.try_wait().is_err());
        drop(permit);
        assert!(sema.try_wait().is_ok());
        assert_eq!(sema.permits(), 1);
    }
}

pub mod condition_variable {
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use keos::{
        sync::{ConditionVariable, Mutex},
        thread::ThreadBuilder,
    };

    const MAX: usize = 4;

    struct BufferInner {
        item: [usize; MAX],
        front: usize,
        tail: usize,
    }

    struct Buffer {
        inner: Mutex<BufferInner>,
        full: ConditionVariable,
        empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            Self {
                inner: Mutex::new(BufferInner {
                    item: [0; MAX],
                    front: 0,
                    tail: 0,
                }),
                full: ConditionVariable::new(),
                empty: ConditionVariable::new(),
            }
        }

        fn put(&self, v: usize) {
            let mut guard = self
                .full
                .wait_while(&self.inner, |inner| inner.tail - inner.front == MAX);
            let idx = guard.tail % MAX;
            guard.item[idx] = v;
            guard.tail += 1;
            self.empty.signal(guard);
        }

        fn get(&self) -> usize {
            let mut guard = self
                .empty
                .wait_while(&self.inner, |inner| inner.tail == inner.front);
            let v = guard.item[guard.front % MAX];
            guard.front += 1;
            self.full.signal(guard);
            v
        }
    }

    /// Consumers and a producer share a buffer smaller than the number of
    /// items.
    #[validate_threads]
    pub fn bounded_buffer() {
        const ITEMS: usize = MAX * 3;
        let buffer = Arc::new(Buffer::new());
        let output = Arc::new(Mutex::new(Vec::new()));

        let consumers = (0..ITEMS)
            .map(|_| {
                let (buffer, output) = (buffer.clone(), output.clone());
                ThreadBuilder::new("consumer")
                    .spawn(move || {
                        let d = buffer.get();
                        let mut guard = output.lock();
                        guard.push(d);
                        guard.unlock();
                    })
                    .expect("Failed to spawn a consumer.")
            })
            .collect::<Vec<_>>();

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer")
                .spawn(move || {
                    for i in 0..ITEMS {
                        buffer.put(i);
                    }
                })
                .expect("Failed to spawn the producer.")
        };

        for consumer in consumers {
            assert_eq!(consumer.join(), 0);
        }
        assert_eq!(producer.join(), 0);

        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..ITEMS).collect::<Vec<_>>());
        output.unlock();
    }

    /// A broadcast wakes every waiter.
    #[validate_threads]
    pub fn broadcast() {
        const WAITERS: usize = 5;
        let state = Arc::new((Mutex::new(false), ConditionVariable::new()));
        let woken = Arc::new(AtomicUsize::new(0));

        let handles = (0..WAITERS)
            .map(|i| {
                let (state, woken) = (state.clone(), woken.clone());
                ThreadBuilder::new(alloc::format!("waiter {i}"))
                    .spawn(move || {
                        let (lock, cond) = &*state;
                        let guard = cond.wait_while(lock, |go| !*go);
                        woken.fetch_add(1, Ordering::SeqCst);
                        guard.unlock();
                    })
                    .expect("Failed to spawn a waiter.")
            })
            .collect::<Vec<_>>();

        let (lock, cond) = &*state;
        while cond.waiters() != WAITERS {
            keos::thread::yield_now();
            keos::intrinsics::pause();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        let mut guard = lock.lock();
        *guard = true;
        cond.broadcast(guard);
        for handle in handles {
            assert_eq!(handle.join(), 0);
        }
        assert_eq!(woken.load(Ordering::SeqCst), WAITERS);
        assert_eq!(cond.waiters(), 0);
    }
}

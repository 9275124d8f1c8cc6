//! Multi-level feedback queue scheduler.
//!
//! Priorities are not set by threads; they are recomputed from the recent cpu
//! usage and the niceness of each thread:
//!
//! ```text
//! priority   = PRI_MAX - recent_cpu / 4 - nice * 2          (every 4 ticks)
//! recent_cpu = (2 * load_avg) / (2 * load_avg + 1) * recent_cpu + nice
//!                                                            (every second)
//! load_avg   = 59/60 * load_avg + 1/60 * ready_threads       (every second)
//! ```
//!
//! The running thread's `recent_cpu` grows by one on every tick. Real
//! quantities are kept in [`Fixed`] point, and priorities are clamped to
//! [`PRI_MIN`]..=[`PRI_MAX`]. Priority donation is disabled.
use super::{
    NICE_DEFAULT, PRI_MAX, PRI_MIN, Thread, ThreadState, Tid,
    scheduler::{ReadyQueue, Scheduler, ThreadTable},
};
use crate::fixed_point::Fixed;
use crossbeam_utils::atomic::AtomicCell;

/// Number of ticks between two priority recomputations.
pub const PRIORITY_INTERVAL: u64 = 4;

/// Priority of a thread with `recent_cpu` and `nice`.
pub fn priority_of(recent_cpu: Fixed, nice: i32) -> i32 {
    (PRI_MAX - (recent_cpu / 4).to_int_trunc() - nice * 2).clamp(PRI_MIN, PRI_MAX)
}

/// The load average after one more second with `ready` runnable threads.
pub fn decay_load_avg(load_avg: Fixed, ready: usize) -> Fixed {
    Fixed::ratio(59, 60) * load_avg + Fixed::ratio(1, 60) * ready as i32
}

/// The recent cpu usage after one more second under `load_avg`.
pub fn decay_recent_cpu(recent_cpu: Fixed, load_avg: Fixed, nice: i32) -> Fixed {
    let twice = load_avg * 2;
    twice / (twice + 1) * recent_cpu + nice
}

/// The multi-level feedback queue scheduler.
pub struct Mlfqs {
    queue: ReadyQueue,
    load_avg: AtomicCell<Fixed>,
}

impl Mlfqs {
    /// Creates a new scheduler with a load average of zero.
    pub const fn new() -> Self {
        Self {
            queue: ReadyQueue::new(),
            load_avg: AtomicCell::new(Fixed::ZERO),
        }
    }

    fn recompute_priority(th: &mut Thread) {
        th.base_priority = priority_of(th.recent_cpu, th.nice);
        th.priority = th.base_priority;
    }
}

impl Default for Mlfqs {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Mlfqs {
    fn next_to_run(&self, _threads: &ThreadTable) -> Option<Tid> {
        self.queue.pop()
    }

    fn push_to_queue(&self, threads: &ThreadTable, tid: Tid) {
        self.queue.push(threads, tid)
    }

    fn reorder(&self, threads: &ThreadTable) {
        self.queue.reorder(threads)
    }

    fn highest_ready(&self, threads: &ThreadTable) -> Option<i32> {
        self.queue.peek_priority(threads)
    }

    fn ready_len(&self) -> usize {
        self.queue.len()
    }

    fn timer_tick(&self, threads: &mut ThreadTable, running: Tid, idle: Option<Tid>, ticks: u64) -> bool {
        let busy = idle != Some(running);
        if busy {
            threads[running].recent_cpu += Fixed::from_int(1);
        }
        let accounted = |th: &Thread| Some(th.tid) != idle && th.state != ThreadState::Dying;

        if ticks % crate::timer::frequency() == 0 {
            let ready = self.queue.len() + busy as usize;
            let load_avg = decay_load_avg(self.load_avg.load(), ready);
            self.load_avg.store(load_avg);
            for th in threads.iter_mut().filter(|th| accounted(th)) {
                th.recent_cpu = decay_recent_cpu(th.recent_cpu, load_avg, th.nice);
            }
            debug!("MLFQS: load_avg {} with {} ready threads.", load_avg, ready);
        }

        if ticks % PRIORITY_INTERVAL == 0 {
            for th in threads.iter_mut().filter(|th| accounted(th)) {
                Self::recompute_priority(th);
            }
            self.queue.reorder(threads);
            return busy
                && self
                    .queue
                    .peek_priority(threads)
                    .is_some_and(|p| p > threads[running].priority);
        }
        false
    }

    fn computes_priority(&self) -> bool {
        true
    }

    fn init_thread(&self, th: &mut Thread) {
        th.nice = NICE_DEFAULT;
        th.recent_cpu = Fixed::ZERO;
        Self::recompute_priority(th);
    }

    fn update_priority(&self, th: &mut Thread) {
        Self::recompute_priority(th);
    }

    fn load_avg(&self) -> Option<Fixed> {
        Some(self.load_avg.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn thread(tid: Tid, state: ThreadState) -> Box<Thread> {
        let mut th = Box::new(Thread::new(tid, "test", PRI_MAX));
        th.state = state;
        th
    }

    #[test]
    fn priority_formula() {
        assert_eq!(priority_of(Fixed::ZERO, 0), PRI_MAX);
        assert_eq!(priority_of(Fixed::from_int(4), 0), 62);
        // 7.99 / 4 truncates to 1.
        assert_eq!(priority_of(Fixed::from_raw(8 * 16384 - 1), 0), 62);
        assert_eq!(priority_of(Fixed::ZERO, 5), 53);
        assert_eq!(priority_of(Fixed::ZERO, -20), PRI_MAX);
        assert_eq!(priority_of(Fixed::from_int(400), 20), PRI_MIN);
    }

    #[test]
    fn load_avg_converges() {
        let mut load_avg = Fixed::ZERO;
        load_avg = decay_load_avg(load_avg, 1);
        assert_eq!(load_avg.raw(), 273);
        for _ in 0..600 {
            load_avg = decay_load_avg(load_avg, 1);
        }
        // Truncation settles slightly below 1.
        assert_eq!(load_avg.raw(), 16265);
        assert_eq!((load_avg * 100).to_int_round(), 99);
        for _ in 0..600 {
            load_avg = decay_load_avg(load_avg, 0);
        }
        assert_eq!((load_avg * 100).to_int_round(), 0);
    }

    #[test]
    fn recent_cpu_decay() {
        assert_eq!(decay_recent_cpu(Fixed::from_int(100), Fixed::ZERO, 3), Fixed::from_int(3));
        // load_avg 1: recent_cpu decays by 2/3.
        let rc = decay_recent_cpu(Fixed::from_int(90), Fixed::from_int(1), 0);
        assert_eq!(rc.to_int_trunc(), 59);
    }

    #[test]
    fn timer_tick_accounting() {
        let mlfqs = Mlfqs::new();
        let mut threads = ThreadTable::new();
        threads.insert(thread(1, ThreadState::Running));
        threads.insert(thread(2, ThreadState::Ready));
        threads.insert(thread(3, ThreadState::Blocked));
        mlfqs.push_to_queue(&threads, 2);

        for ticks in 1..=3 {
            assert!(!mlfqs.timer_tick(&mut threads, 1, Some(3), ticks));
        }
        assert_eq!(threads[1].recent_cpu, Fixed::from_int(3));
        assert_eq!(threads[2].recent_cpu, Fixed::ZERO);

        // 4 ticks of cpu drop the running thread by one level below 2.
        assert!(mlfqs.timer_tick(&mut threads, 1, Some(3), 4));
        assert_eq!(threads[1].priority, 62);
        assert_eq!(threads[2].priority, PRI_MAX);
        assert_eq!(mlfqs.load_avg(), Some(Fixed::ZERO));
    }

    #[test]
    fn idle_is_not_accounted() {
        let mlfqs = Mlfqs::new();
        let mut threads = ThreadTable::new();
        threads.insert(thread(1, ThreadState::Running));
        for ticks in 1..=crate::timer::frequency() {
            mlfqs.timer_tick(&mut threads, 1, Some(1), ticks);
        }
        assert_eq!(threads[1].recent_cpu, Fixed::ZERO);
        assert_eq!(mlfqs.load_avg(), Some(Fixed::ZERO));
    }

    #[test]
    fn load_avg_counts_running_thread() {
        let mlfqs = Mlfqs::new();
        let mut threads = ThreadTable::new();
        threads.insert(thread(1, ThreadState::Running));
        for ticks in 1..=crate::timer::frequency() {
            mlfqs.timer_tick(&mut threads, 1, None, ticks);
        }
        assert_eq!(mlfqs.load_avg().map(Fixed::raw), Some(273));
    }

    #[test]
    fn new_thread_starts_fresh() {
        let mlfqs = Mlfqs::new();
        let mut child = thread(2, ThreadState::Blocked);
        child.nice = 5;
        child.recent_cpu = Fixed::from_int(8);
        child.priority = PRI_MIN;
        mlfqs.init_thread(&mut child);
        assert_eq!(child.nice, NICE_DEFAULT);
        assert_eq!(child.recent_cpu, Fixed::ZERO);
        assert_eq!(child.priority, PRI_MAX);
        assert_eq!(child.base_priority, child.priority);
    }
}

//! Strict priority scheduling with priority donation.
//!
//! The highest-priority ready thread always runs; threads of equal priority
//! share the cpu in round-robin order, one time slice each. A thread waiting
//! on a lock lends its priority to the lock holder (see [`donation`]).
//!
//! [`donation`]: super::donation
use super::{
    Tid,
    scheduler::{ReadyQueue, Scheduler, ThreadTable},
};

/// The priority scheduler.
pub struct PriorityScheduler {
    queue: ReadyQueue,
}

impl PriorityScheduler {
    /// Creates a new priority scheduler.
    pub const fn new() -> Self {
        Self {
            queue: ReadyQueue::new(),
        }
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for PriorityScheduler {
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

    fn timer_tick(&self, _threads: &mut ThreadTable, _running: Tid, _idle: Option<Tid>, _ticks: u64) -> bool {
        false
    }

    fn donation(&self) -> bool {
        true
    }
}

//! Timer ticks and sleeping.
//!
//! The programmable interval timer interrupts the cpu [`frequency`] times per
//! second. Every interrupt advances the tick counter, charges the tick to the
//! running thread, and wakes the sleeping threads whose time has come.
//!
//! Sleeping threads are parked in a queue ordered by wake-up tick. Delays
//! shorter than a tick are served by busy-waiting, calibrated against the
//! timer at boot.
use crate::thread::{Current, ParkHandle, scheduler};
use abyss::{
    interrupt::{InterruptState, in_interrupt_context},
    spinlock::SpinLock,
};
use alloc::{collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

/// Default number of timer interrupts per second.
pub const TIMER_FREQ: u64 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);
static FREQUENCY: AtomicU64 = AtomicU64::new(TIMER_FREQ);
static LOOPS_PER_TICK: AtomicU64 = AtomicU64::new(0);
static SLEEPERS: SpinLock<SleepQueue<ParkHandle>> = SpinLock::new(SleepQueue::new());

/// Number of timer ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Number of timer ticks elapsed since `then`, a value once returned by
/// [`ticks`]. A `then` in the future counts as no time elapsed.
pub fn elapsed(then: u64) -> u64 {
    ticks().saturating_sub(then)
}

/// Number of timer interrupts per second.
pub fn frequency() -> u64 {
    FREQUENCY.load(Ordering::SeqCst)
}

pub(crate) fn set_frequency(hz: u64) {
    FREQUENCY.store(hz, Ordering::SeqCst);
}

/// Number of busy-wait loops that fit in a tick, as measured by
/// [`calibrate`].
pub fn loops_per_tick() -> u64 {
    LOOPS_PER_TICK.load(Ordering::SeqCst)
}

/// Entries ordered by ascending wake-up tick, first-in first-out among equal
/// ticks.
pub struct SleepQueue<H> {
    entries: VecDeque<(u64, H)>,
}

impl<H> SleepQueue<H> {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Inserts `handle` to be woken at tick `wake`.
    pub fn insert(&mut self, wake: u64, handle: H) {
        let pos = self.entries.partition_point(|(w, _)| *w <= wake);
        self.entries.insert(pos, (wake, handle));
    }

    /// Removes the entries whose wake-up tick is at or before `now`, in queue
    /// order.
    pub fn drain_expired(&mut self, now: u64) -> Vec<H> {
        let n = self.entries.partition_point(|(w, _)| *w <= now);
        self.entries.drain(..n).map(|(_, h)| h).collect()
    }

    /// The earliest wake-up tick.
    pub fn next_wakeup(&self) -> Option<u64> {
        self.entries.front().map(|(w, _)| *w)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for SleepQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true if a thread is sleeping.
pub(crate) fn has_sleepers() -> bool {
    let sleepers = SLEEPERS.lock();
    let any = !sleepers.is_empty();
    sleepers.unlock();
    any
}

/// Sleeps for approximately `ticks` timer ticks.
///
/// Returns immediately if `ticks` is not positive. Interrupts must be enabled.
pub fn sleep(ticks: i64) {
    if ticks <= 0 {
        return;
    }
    assert!(
        !in_interrupt_context(),
        "Try to sleep inside an interrupt handler."
    );
    assert_eq!(
        InterruptState::current(),
        InterruptState::On,
        "Try to sleep with interrupts disabled."
    );
    let wake = self::ticks() + ticks as u64;
    Current::park_with(|handle| {
        let tid = handle.tid();
        scheduler::with_state(|st| st.threads[tid].wakeup_tick = Some(wake));
        let mut sleepers = SLEEPERS.lock();
        sleepers.insert(wake, handle);
        sleepers.unlock();
    });
}

/// Sleeps for approximately `ms` milliseconds.
pub fn msleep(ms: i64) {
    real_time_sleep(ms, 1000);
}

/// Sleeps for approximately `us` microseconds.
pub fn usleep(us: i64) {
    real_time_sleep(us, 1000 * 1000);
}

/// Sleeps for approximately `ns` nanoseconds.
pub fn nsleep(ns: i64) {
    real_time_sleep(ns, 1000 * 1000 * 1000);
}

/// Sleeps for `num / denom` seconds.
fn real_time_sleep(num: i64, denom: i64) {
    let freq = frequency() as i64;
    let ticks = num * freq / denom;

    assert_eq!(
        InterruptState::current(),
        InterruptState::On,
        "Try to sleep with interrupts disabled."
    );
    if ticks > 0 {
        // Give up the cpu for whole ticks.
        sleep(ticks);
    } else {
        // Busy-wait for the sub-tick remainder. The numerator and the
        // denominator are scaled down by 1000 to avoid overflow.
        assert_eq!(denom % 1000, 0);
        busy_wait(loops_per_tick() as i64 * num / 1000 * freq / (denom / 1000));
    }
}

/// Measures the number of busy-wait loops that fit in a timer tick.
///
/// Interrupts must be enabled.
pub fn calibrate() {
    assert_eq!(
        InterruptState::current(),
        InterruptState::On,
        "Try to calibrate the timer with interrupts disabled."
    );
    info!("Calibrating timer...");

    // Approximate loops_per_tick as the largest power of two still less than
    // one timer tick.
    let mut loops_per_tick: u64 = 1 << 10;
    while !too_many_loops(loops_per_tick << 1) {
        loops_per_tick <<= 1;
        assert!(loops_per_tick != 0);
    }

    // Refine the next 8 bits of loops_per_tick.
    let high_bit = loops_per_tick;
    let mut test_bit = high_bit >> 1;
    while test_bit != high_bit >> 10 {
        if !too_many_loops(loops_per_tick | test_bit) {
            loops_per_tick |= test_bit;
        }
        test_bit >>= 1;
    }

    LOOPS_PER_TICK.store(loops_per_tick, Ordering::SeqCst);
    info!("{} loops/s.", loops_per_tick * frequency());
}

/// Returns true if `loops` iterations wait for more than one timer tick.
fn too_many_loops(loops: u64) -> bool {
    // Wait for a timer tick.
    let start = ticks();
    while ticks() == start {
        abyss::intrinsics::pause();
    }

    // Run `loops` loops.
    let start = ticks();
    busy_wait(loops as i64);

    // If the tick count changed, we iterated too long.
    start != ticks()
}

/// Iterates through a simple loop `loops` times, for implementing brief
/// delays.
#[inline(never)]
fn busy_wait(loops: i64) {
    for _ in 0..loops {
        abyss::intrinsics::pause();
    }
}

/// The timer interrupt handler.
pub(crate) fn timer_interrupt() {
    let now = TICKS.fetch_add(1, Ordering::SeqCst) + 1;
    scheduler::timer_tick(now);

    let mut sleepers = SLEEPERS.lock();
    let woken = sleepers.drain_expired(now);
    sleepers.unlock();
    if woken.is_empty() {
        return;
    }
    for handle in woken {
        let tid = handle.tid();
        scheduler::with_state(|st| st.threads[tid].wakeup_tick = None);
        handle.unpark();
    }
    scheduler::preempt_if_outranked();
}

/// Prints the timer statistics.
pub fn print_stats() {
    println!("Timer: {} ticks", ticks());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_queue_orders_by_wakeup() {
        let mut queue = SleepQueue::new();
        queue.insert(15, "a");
        queue.insert(11, "b");
        queue.insert(13, "c");
        queue.insert(11, "d");
        assert_eq!(queue.next_wakeup(), Some(11));
        assert_eq!(queue.drain_expired(10), Vec::<&str>::new());
        assert_eq!(queue.drain_expired(11), ["b", "d"]);
        assert_eq!(queue.drain_expired(14), ["c"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn sleep_queue_drains_late_ticks() {
        let mut queue = SleepQueue::new();
        for (wake, id) in [(5, 0), (3, 1), (5, 2), (4, 3)] {
            queue.insert(wake, id);
        }
        assert_eq!(queue.drain_expired(100), [1, 3, 0, 2]);
        assert!(queue.is_empty());
        assert_eq!(queue.next_wakeup(), None);
    }

    #[test]
    fn elapsed_from_the_future_is_zero() {
        assert_eq!(elapsed(u64::MAX), 0);
        assert_eq!(elapsed(ticks() + 5), 0);
        assert_eq!(elapsed(0), ticks());
    }
}

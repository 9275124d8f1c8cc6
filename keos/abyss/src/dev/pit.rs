//! Programmable interval timer.
//!
//! The timer counts the cycles burnt by the cpu and raises
//! [`Vector::Timer`] each time the count crosses a multiple of the programmed
//! period.

use crate::interrupt::{self, Vector};
use core::sync::atomic::{AtomicU64, Ordering};

/// Cycles per tick used until the timer is programmed.
pub const DEFAULT_CYCLES_PER_TICK: u64 = 10_000;

static CYCLES: AtomicU64 = AtomicU64::new(0);
static CYCLES_PER_TICK: AtomicU64 = AtomicU64::new(DEFAULT_CYCLES_PER_TICK);

/// Programs the timer to interrupt every `cycles_per_tick` cycles.
pub fn program(cycles_per_tick: u64) {
    assert!(cycles_per_tick > 0, "Timer period must be positive.");
    CYCLES_PER_TICK.store(cycles_per_tick, Ordering::SeqCst);
}

/// Returns the programmed period in cycles.
pub fn period() -> u64 {
    CYCLES_PER_TICK.load(Ordering::SeqCst)
}

/// Returns the number of cycles elapsed since power on.
pub fn cycles() -> u64 {
    CYCLES.load(Ordering::SeqCst)
}

/// Cycles left until the next timer interrupt.
pub(crate) fn cycles_until_tick() -> u64 {
    let period = period();
    period - cycles() % period
}

/// Burns `n` cycles, raising a timer interrupt for every period boundary
/// crossed.
pub(crate) fn advance(n: u64) {
    let period = period();
    let before = CYCLES.fetch_add(n, Ordering::SeqCst);
    for _ in before / period..(before + n) / period {
        interrupt::raise(Vector::Timer);
    }
}

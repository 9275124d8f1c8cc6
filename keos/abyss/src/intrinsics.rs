//! Cpu instructions of the simulated machine.

use crate::{
    dev::pit,
    interrupt::{InterruptState, in_interrupt_context},
};

/// Burns a single cpu cycle (`pause`).
///
/// This is the only way for running code to let time pass: a loop that waits
/// for another thread or for the timer must call this function.
#[inline]
pub fn pause() {
    core::hint::spin_loop();
    pit::advance(1);
}

/// Enables interrupts and halts the cpu until the next timer interrupt
/// (`sti; hlt`).
pub fn halt() {
    assert!(
        !in_interrupt_context(),
        "Try to halt the cpu inside an interrupt handler."
    );
    unsafe { InterruptState::enable() };
    pit::advance(pit::cycles_until_tick());
}

/// Reads the cycle counter (`rdtsc`).
#[inline]
pub fn rdtsc() -> u64 {
    pit::cycles()
}

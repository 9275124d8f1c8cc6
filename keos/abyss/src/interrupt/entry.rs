//! Interrupt handler entries.

use super::{CPU, CpuFlags, Vector};
use core::sync::atomic::Ordering;
use std::sync::OnceLock;

struct Entries {
    handler: fn(Vector),
    on_return: fn(),
}

static ENTRIES: OnceLock<Entries> = OnceLock::new();

/// Installs the kernel's interrupt entry and the hook that is called when a
/// handler returned with [`yield_on_return`] armed.
pub fn install(handler: fn(Vector), on_return: fn()) {
    if ENTRIES.set(Entries { handler, on_return }).is_err() {
        panic!("Interrupt entries are already installed.");
    }
}

/// Raises the external interrupt `vector`.
///
/// The interrupt is delivered immediately if interrupts are enabled, and
/// stays pending otherwise.
pub fn raise(vector: Vector) {
    let bit = u8::from(vector) - 32;
    CPU.pending.fetch_or(1 << bit, Ordering::SeqCst);
    deliver_pending();
}

/// Requests the interrupted thread to yield when the running handler returns.
pub fn yield_on_return() {
    assert!(
        super::in_interrupt_context(),
        "yield_on_return() outside of an interrupt handler."
    );
    CpuFlags::raise_bits(CpuFlags::YIELD_ON_RETURN);
}

pub(super) fn deliver_pending() {
    loop {
        let flags = CpuFlags::read();
        if !flags.contains(CpuFlags::IF) || flags.contains(CpuFlags::IN_IRQ) {
            return;
        }
        let pending = CPU.pending.load(Ordering::SeqCst);
        if pending == 0 {
            return;
        }
        let bit = pending.trailing_zeros();
        CPU.pending.fetch_and(!(1 << bit), Ordering::SeqCst);
        match Vector::try_from(bit as u8 + 32) {
            Ok(vector) => do_handle_irq(vector),
            Err(e) => panic!("Spurious interrupt: {e:?}"),
        }
    }
}

/// Runs the handler of `vector` as the cpu would: with interrupts disabled,
/// then restores the interrupt flag and honors a pending yield request.
pub fn do_handle_irq(vector: Vector) {
    let Some(entries) = ENTRIES.get() else {
        panic!("Unknown interrupt #{}", u8::from(vector));
    };

    let was_enabled = CpuFlags::read().contains(CpuFlags::IF);
    CpuFlags::clear(CpuFlags::IF);
    CpuFlags::raise_bits(CpuFlags::IN_IRQ);

    (entries.handler)(vector);

    CpuFlags::clear(CpuFlags::IN_IRQ);
    if was_enabled {
        CpuFlags::raise_bits(CpuFlags::IF);
    }
    if CpuFlags::take(CpuFlags::YIELD_ON_RETURN) {
        (entries.on_return)();
    }
}

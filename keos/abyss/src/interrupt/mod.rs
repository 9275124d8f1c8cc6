//! Interrupt
//!
//! The simulated cpu has a single interrupt-enable flag. External interrupts
//! that arrive while the flag is clear stay pending and are delivered as soon
//! as the flag is set again. Handlers always run with interrupts disabled and
//! are never preempted.
#[cfg(doc)]
use crate::spinlock::SpinLockGuard;
use bitflags::bitflags;
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

mod entry;
pub use entry::{do_handle_irq, install, raise, yield_on_return};

bitflags! {
    /// The flags register of the simulated cpu.
    pub struct CpuFlags: u32 {
        /// An interrupt handler is running.
        const IN_IRQ = 1 << 0;
        /// Yield the interrupted thread when the running handler returns.
        const YIELD_ON_RETURN = 1 << 1;
        /// Interrupt enable flag.
        const IF = 1 << 9;
    }
}

/// External interrupt vectors of the machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Vector {
    /// The programmable interval timer.
    Timer = 32,
}

struct Cpu {
    flags: AtomicU32,
    pending: AtomicU32,
}

static CPU: Cpu = Cpu {
    flags: AtomicU32::new(0),
    pending: AtomicU32::new(0),
};

impl CpuFlags {
    /// Reads the flags register.
    pub fn read() -> Self {
        Self::from_bits_truncate(CPU.flags.load(Ordering::SeqCst))
    }

    fn raise_bits(flags: Self) {
        CPU.flags.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    fn clear(flags: Self) {
        CPU.flags.fetch_and(!flags.bits(), Ordering::SeqCst);
    }

    fn take(flags: Self) -> bool {
        CPU.flags.fetch_and(!flags.bits(), Ordering::SeqCst) & flags.bits() != 0
    }
}

static GUARD_STATE: InterruptGuardInner = InterruptGuardInner::new();

struct InterruptGuardInner {
    initial_state: AtomicBool,
    cnt: AtomicIsize,
}

impl InterruptGuardInner {
    const fn new() -> Self {
        Self {
            initial_state: AtomicBool::new(true),
            cnt: AtomicIsize::new(0),
        }
    }

    fn save_nested_interrupt_state(&self, state: InterruptState) {
        if self.cnt.fetch_add(1, Ordering::SeqCst) == 0 {
            self.initial_state
                .store(state == InterruptState::On, Ordering::SeqCst);
        }
    }

    fn load_nested_interrupt_state(&self) {
        let prev = self.cnt.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");

        if prev == 1 && self.initial_state.load(Ordering::SeqCst) {
            unsafe { InterruptState::enable() };
        }
    }
}

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the current interrupt state.
    pub fn current() -> Self {
        if CpuFlags::read().contains(CpuFlags::IF) {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Enables interrupts (`sti`), delivering the pending ones.
    pub unsafe fn enable() {
        CpuFlags::raise_bits(CpuFlags::IF);
        entry::deliver_pending();
    }

    /// Disables interrupts (`cli`).
    pub unsafe fn disable() {
        CpuFlags::clear(CpuFlags::IF);
    }
}

/// Returns true while an interrupt handler is running.
pub fn in_interrupt_context() -> bool {
    CpuFlags::read().contains(CpuFlags::IN_IRQ)
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard was
/// created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    pub fn new() -> Self {
        let state = InterruptState::current();
        unsafe { InterruptState::disable() };
        GUARD_STATE.save_nested_interrupt_state(state);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        GUARD_STATE.load_nested_interrupt_state();
    }
}

/// Interrupt bookkeeping of a suspended execution context.
///
/// The interrupt flag and the [`InterruptGuard`] nesting belong to the thread
/// that is running, so they travel with it across a context switch.
#[derive(Clone, Copy, Debug)]
pub struct SavedInterruptState {
    enabled: bool,
    cnt: isize,
    initial_state: bool,
}

impl SavedInterruptState {
    /// The state a fresh context starts with: interrupts disabled and no
    /// guard alive.
    pub const fn fresh() -> Self {
        Self {
            enabled: false,
            cnt: 0,
            initial_state: true,
        }
    }

    pub(crate) fn save() -> Self {
        Self {
            enabled: InterruptState::current() == InterruptState::On,
            cnt: GUARD_STATE.cnt.load(Ordering::SeqCst),
            initial_state: GUARD_STATE.initial_state.load(Ordering::SeqCst),
        }
    }

    /// Installs this state on the cpu. Pending interrupts are not delivered
    /// here; they are delivered by the next `enable`.
    pub(crate) fn restore(self) {
        GUARD_STATE.cnt.store(self.cnt, Ordering::SeqCst);
        GUARD_STATE
            .initial_state
            .store(self.initial_state, Ordering::SeqCst);
        if self.enabled {
            CpuFlags::raise_bits(CpuFlags::IF);
        } else {
            CpuFlags::clear(CpuFlags::IF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_nested_guards() {
        let mut flags = CpuFlags::empty();
        flags.set(CpuFlags::IF, true);
        assert_eq!(flags, CpuFlags::IF);

        CpuFlags::raise_bits(CpuFlags::YIELD_ON_RETURN);
        assert!(CpuFlags::take(CpuFlags::YIELD_ON_RETURN));
        assert!(!CpuFlags::take(CpuFlags::YIELD_ON_RETURN));

        unsafe { InterruptState::enable() };
        {
            let _outer = InterruptGuard::new();
            assert_eq!(InterruptState::current(), InterruptState::Off);
            {
                let _inner = InterruptGuard::new();
                assert_eq!(InterruptState::current(), InterruptState::Off);
            }
            assert_eq!(InterruptState::current(), InterruptState::Off);
        }
        assert_eq!(InterruptState::current(), InterruptState::On);
        unsafe { InterruptState::disable() };
        assert_eq!(InterruptState::current(), InterruptState::Off);
    }
}

//! Interrupt management.
use crate::sync::SpinLock;
use abyss::interrupt::Vector;
use alloc::sync::Arc;

type Handler = Option<Arc<dyn Fn() + Send + Sync>>;
#[allow(clippy::declare_interior_mutable_const)]
const INIT: SpinLock<Handler> = SpinLock::new(None);
static HANDLERS: [SpinLock<Handler>; 224] = [INIT; 224];

fn do_handle_interrupt(vector: Vector) {
    let idx = u8::from(vector) as usize - 32;
    let guard = HANDLERS[idx].lock();
    let handler = guard.clone();
    guard.unlock();

    match &handler {
        Some(handler) => handler(),
        _ => {
            panic!("Unknown interrupt #{}", idx + 32);
        }
    }
}

/// Register the interrupt handler
pub(crate) fn register(vector: Vector, handler: impl Fn() + Send + Sync + 'static) {
    let mut guard = HANDLERS[u8::from(vector) as usize - 32].lock();
    *guard = Some(Arc::new(handler));
    guard.unlock();
}

/// Installs the interrupt entry and the timer handler.
///
/// A handler that asks for a yield makes the interrupted thread yield once
/// the handler returns.
pub(crate) fn init() {
    abyss::interrupt::install(do_handle_interrupt, crate::thread::yield_now);
    register(Vector::Timer, crate::timer::timer_interrupt);
}

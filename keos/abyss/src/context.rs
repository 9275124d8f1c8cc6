//! Execution contexts and the context switch.
//!
//! Each kernel thread owns a [`Context`] backed by a host thread. Exactly one
//! context holds the cpu at any instant; a switch hands the cpu to the target
//! context and parks the caller until the cpu is handed back to it.
//!
//! A context that is switched away for the last time is never handed the cpu
//! again. Its host thread wakes up only when the context is [`reap`]ed, and
//! must then leave without touching any kernel state.
//!
//! [`reap`]: Context::reap

use crate::interrupt::{InterruptState, SavedInterruptState};
use std::{
    boxed::Box,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

/// Size of each thread's stack.
pub const STACK_SIZE: usize = 0x100000;

static ACTIVE: AtomicU64 = AtomicU64::new(0);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    id: u64,
    host: OnceLock<thread::Thread>,
    reaped: AtomicBool,
}

/// An execution context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("reaped", &self.inner.reaped.load(Ordering::SeqCst))
            .finish()
    }
}

/// Payload carried by the unwinding of [`exit_current`].
struct ThreadExit(i32);

impl Context {
    fn alloc() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
                host: OnceLock::new(),
                reaped: AtomicBool::new(false),
            }),
        }
    }

    /// Turns the calling host thread into the context that holds the cpu.
    ///
    /// Used once, for the boot thread.
    pub fn adopt_current() -> Self {
        let ctx = Self::alloc();
        let _ = ctx.inner.host.set(thread::current());
        ACTIVE.store(ctx.inner.id, Ordering::SeqCst);
        ctx
    }

    /// Creates a new context that runs `entry` once it is switched to.
    ///
    /// The entry starts with interrupts disabled.
    pub fn spawn(name: &str, entry: impl FnOnce() + Send + 'static) -> std::io::Result<Self> {
        let ctx = Self::alloc();
        let me = ctx.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                if me.wait_for_cpu() {
                    drop(me);
                    SavedInterruptState::fresh().restore();
                    entry();
                }
            })?;
        let _ = ctx.inner.host.set(handle.thread().clone());
        Ok(ctx)
    }

    /// Identifier of this context.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true if this context holds the cpu.
    pub fn is_active(&self) -> bool {
        ACTIVE.load(Ordering::SeqCst) == self.inner.id
    }

    fn wait_for_cpu(&self) -> bool {
        loop {
            if self.is_active() {
                return true;
            }
            if self.inner.reaped.load(Ordering::SeqCst) {
                return false;
            }
            thread::park();
        }
    }

    fn unpark(&self) {
        if let Some(host) = self.inner.host.get() {
            host.unpark();
        }
    }

    /// Switches the cpu from `from` to `to`.
    ///
    /// Returns `true` when `from` is switched back to, with its interrupt state
    /// restored. Returns `false` if `from` was reaped instead; the caller must
    /// then return to the root of its host thread without touching any kernel
    /// state.
    ///
    /// # Safety
    /// `from` must be the active context, and interrupts must be disabled.
    pub unsafe fn switch(from: &Context, to: &Context) -> bool {
        assert_eq!(
            InterruptState::current(),
            InterruptState::Off,
            "Context switch with interrupts enabled."
        );
        debug_assert!(from.is_active());
        let saved = SavedInterruptState::save();
        ACTIVE.store(to.inner.id, Ordering::SeqCst);
        to.unpark();
        if from.wait_for_cpu() {
            saved.restore();
            true
        } else {
            false
        }
    }

    /// Releases the host thread of a context that will never run again.
    pub fn reap(&self) {
        assert!(!self.is_active(), "Try to reap the running context.");
        self.inner.reaped.store(true, Ordering::SeqCst);
        self.unpark();
    }
}

/// Runs `f`, returning the exit code passed to [`exit_current`] if `f` was
/// left through it, or 0 if `f` returned.
pub fn catch_exit(f: impl FnOnce()) -> i32 {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => 0,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(payload) => resume_unwind(payload),
        },
    }
}

/// Unwinds the current context up to the enclosing [`catch_exit`], running
/// the destructors of its frames.
pub fn exit_current(code: i32) -> ! {
    resume_unwind(Box::new(ThreadExit(code)))
}

//! Thread abstration, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Threads can be named, carry a priority, and
//! provide some built-in support for low-level synchronization.
//!
//! Every thread is described by a [`Thread`] control block. Control blocks are
//! owned by the scheduler's thread table and addressed by [`Tid`]; queues,
//! donation records and wait lists only ever hold thread ids.
//!
//! A thread moves between four states:
//!
//! ```text
//!            yield / preemption
//!        +-------------------------+
//!        v                         |
//!     [Ready] --- dispatch ---> [Running] --- exit ---> [Dying]
//!        ^                         |
//!        +--- unblock --- [Blocked] <--- block
//! ```
//!
//! A dying thread is reclaimed by the next thread that gets the cpu after it,
//! never earlier, as its stack is in use until the switch completes.
pub mod donation;
pub mod mlfqs;
pub mod priority;
pub mod scheduler;

use crate::{KernelError, fixed_point::Fixed, sync::Semaphore};
use abyss::{
    context::Context,
    interrupt::{InterruptGuard, InterruptState, in_interrupt_context},
};
use alloc::{string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use donation::LockId;

pub use abyss::context::STACK_SIZE;

/// Thread identifier.
pub type Tid = u64;

/// Lowest priority.
pub const PRI_MIN: i32 = 0;
/// Default priority.
pub const PRI_DEFAULT: i32 = 31;
/// Highest priority.
pub const PRI_MAX: i32 = 63;

/// Lowest niceness.
pub const NICE_MIN: i32 = -20;
/// Default niceness.
pub const NICE_DEFAULT: i32 = 0;
/// Highest niceness.
pub const NICE_MAX: i32 = 20;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

fn allocate_tid() -> Tid {
    NEXT_TID.fetch_add(1, Ordering::SeqCst)
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is running.
    Running,
    /// Thread is runnable, waiting in the ready queue.
    Ready,
    /// Thread is waiting for an event.
    Blocked,
    /// Thread has exited and waits for reclamation.
    Dying,
}

/// A thread control block.
#[derive(Debug)]
pub struct Thread {
    /// Thread id
    pub tid: Tid,
    /// Thread name
    pub name: String,
    pub(crate) state: ThreadState,
    pub(crate) base_priority: i32,
    pub(crate) priority: i32,
    pub(crate) nice: i32,
    pub(crate) recent_cpu: Fixed,
    pub(crate) wakeup_tick: Option<u64>,
    pub(crate) waiting_on: Option<LockId>,
    pub(crate) donations: Vec<Tid>,
    pub(crate) context: Option<Context>,
}

impl Thread {
    /// Creates a blocked control block without an execution context.
    pub(crate) fn new<I>(tid: Tid, name: I, priority: i32) -> Self
    where
        String: From<I>,
    {
        Self {
            tid,
            name: String::from(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            nice: NICE_DEFAULT,
            recent_cpu: Fixed::ZERO,
            wakeup_tick: None,
            waiting_on: None,
            donations: Vec::new(),
            context: None,
        }
    }

    /// State of the thread.
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Effective priority, including donations.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Priority before donations.
    pub fn base_priority(&self) -> i32 {
        self.base_priority
    }

    /// Niceness.
    pub fn nice(&self) -> i32 {
        self.nice
    }

    /// Recent cpu usage.
    pub fn recent_cpu(&self) -> Fixed {
        self.recent_cpu
    }

    /// Tick at which the thread wakes up, while it sleeps.
    pub fn wakeup_tick(&self) -> Option<u64> {
        self.wakeup_tick
    }

    /// The lock this thread is blocked on.
    pub fn waiting_on(&self) -> Option<LockId> {
        self.waiting_on
    }

    /// Threads that donate their priority to this thread, highest first.
    pub fn donors(&self) -> &[Tid] {
        &self.donations
    }
}

/// Exit code and completion of a thread, shared with its [`JoinHandle`].
struct ExitState {
    code: AtomicI32,
    done: Semaphore<()>,
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: Tid,
    exit: Arc<ExitState>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    pub fn join(self) -> i32 {
        self.exit.done.down();
        self.exit.code.load(Ordering::SeqCst)
    }
}

/// A handle that represent the parked thread.
///
/// The handle is the only way to wake the thread up, and waking consumes it,
/// so a blocked thread is unblocked at most once. Dropping the handle leaves
/// the thread blocked forever.
#[derive(Debug)]
pub struct ParkHandle {
    tid: Tid,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Consume the handle and unpark the underlying thread.
    ///
    /// The thread becomes ready; the caller keeps the cpu.
    pub fn unpark(self) {
        scheduler::unblock(self.tid);
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs with interrupts disabled, so storing the handle and parking
    /// happen atomically with respect to interrupt handlers.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        assert!(
            !in_interrupt_context(),
            "Try to park a thread inside an interrupt handler."
        );
        let _guard = InterruptGuard::new();
        f(ParkHandle {
            tid: Self::get_tid(),
        });
        scheduler::block();
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The stack of the current thread is unwound before it dies.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            InterruptState::current() == InterruptState::On,
            "Try to exit a thread while holding a lock."
        );
        abyss::context::exit_current(exit_code)
    }

    /// Get the current thread's id.
    pub fn get_tid() -> Tid {
        scheduler::with_state(|st| st.running)
    }

    /// Get the current thread's name.
    pub fn name() -> String {
        with_current(|th| th.name.clone())
    }

    /// Effective priority of the current thread.
    pub fn priority() -> i32 {
        with_current(|th| th.priority)
    }

    /// Priority of the current thread before donations.
    pub fn base_priority() -> i32 {
        with_current(|th| th.base_priority)
    }

    /// Sets the current thread's priority.
    ///
    /// Yields if a ready thread outranks the current thread afterwards.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `priority` is outside
    ///   [`PRI_MIN`]..=[`PRI_MAX`].
    /// - [`KernelError::NotSupportedOperation`] if the scheduler computes
    ///   priorities by itself.
    pub fn set_priority(priority: i32) -> Result<(), KernelError> {
        if !(PRI_MIN..=PRI_MAX).contains(&priority) {
            return Err(KernelError::InvalidArgument);
        }
        let sched = scheduler::scheduler();
        if sched.computes_priority() {
            return Err(KernelError::NotSupportedOperation);
        }
        scheduler::with_state(|st| {
            let tid = st.running;
            st.threads[tid].base_priority = priority;
            donation::refresh(&mut st.threads, tid);
        });
        scheduler::preempt_if_outranked();
        Ok(())
    }

    /// Niceness of the current thread.
    pub fn nice() -> i32 {
        with_current(|th| th.nice)
    }

    /// Sets the current thread's niceness and recomputes its priority.
    ///
    /// Yields if a ready thread outranks the current thread afterwards.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `nice` is outside
    ///   [`NICE_MIN`]..=[`NICE_MAX`].
    pub fn set_nice(nice: i32) -> Result<(), KernelError> {
        if !(NICE_MIN..=NICE_MAX).contains(&nice) {
            return Err(KernelError::InvalidArgument);
        }
        let sched = scheduler::scheduler();
        scheduler::with_state(|st| {
            let tid = st.running;
            let th = &mut st.threads[tid];
            th.nice = nice;
            sched.update_priority(th);
        });
        scheduler::preempt_if_outranked();
        Ok(())
    }

    /// 100 times the recent cpu usage of the current thread, rounded to the
    /// nearest integer.
    pub fn recent_cpu() -> i32 {
        with_current(|th| (th.recent_cpu * 100).to_int_round())
    }
}

/// Run a function `f` with current thread as an argument.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&Thread) -> R) -> R {
    scheduler::with_state(|st| f(&st.threads[st.running]))
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    scheduler::with_state(|st| st.threads.get(tid).map(|th| th.state))
        .ok_or(KernelError::InvalidArgument)
}

/// Get specified thread's effective priority by TID (Thread ID).
pub fn get_priority_by_tid(tid: Tid) -> Result<i32, KernelError> {
    scheduler::with_state(|st| st.threads.get(tid).map(|th| th.priority))
        .ok_or(KernelError::InvalidArgument)
}

/// Number of threads that are not reclaimed yet, including the idle thread.
pub fn live_threads() -> usize {
    scheduler::with_state(|st| st.threads.len())
}

/// Yields the cpu to the ready threads of equal or higher priority.
pub fn yield_now() {
    scheduler::yield_now()
}

/// Creates a thread named `name` at `priority` that runs `entry(arg)`.
///
/// # Errors
/// - [`KernelError::NoMemory`] if the thread could not be allocated.
pub fn create(name: &str, priority: i32, entry: fn(usize), arg: usize) -> Result<Tid, KernelError> {
    ThreadBuilder::new(name)
        .priority(priority)
        .spawn(move || entry(arg))
        .map(|handle| handle.tid)
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
    priority: i32,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            priority: PRI_DEFAULT,
        }
    }

    /// Sets the priority of the thread. Defaults to [`PRI_DEFAULT`].
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Spawn the thread.
    ///
    /// The thread is ready when this returns, unless it outranked the caller,
    /// in which case it already had the cpu.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if the thread could not be allocated.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> Result<JoinHandle, KernelError> {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&self.priority),
            "Invalid priority {} for thread {}.",
            self.priority,
            self.name
        );
        assert!(
            !in_interrupt_context(),
            "Try to create a thread inside an interrupt handler."
        );
        let exit = Arc::new(ExitState {
            code: AtomicI32::new(0),
            done: Semaphore::new(0, ()),
        });
        let tid = {
            let exit = exit.clone();
            scheduler::spawn(self.name, self.priority, move || thread_start(thread_fn, exit))?
        };
        Ok(JoinHandle { tid, exit })
    }
}

/// The very beginning of a thread.
fn thread_start<F: FnOnce()>(thread_fn: F, exit: Arc<ExitState>) {
    scheduler::finish_context_switch();
    unsafe { InterruptState::enable() };

    let code = abyss::context::catch_exit(thread_fn);
    exit.code.store(code, Ordering::SeqCst);
    exit.done.up();
    drop(exit);

    __do_exit();
}

/// Terminates the current thread. Returns only to the root of the host
/// thread, after the thread has been reclaimed.
fn __do_exit() {
    assert!(
        InterruptState::current() == InterruptState::On,
        "Try to exit a thread while holding a lock."
    );
    unsafe { InterruptState::disable() };
    scheduler::schedule(ThreadState::Dying);
}

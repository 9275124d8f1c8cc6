//! Thread scheduler
//!
//! The scheduler owns every [`Thread`] control block in a [`ThreadTable`] and
//! decides which ready thread gets the cpu. The ordering of the ready threads
//! is a policy, expressed by the [`Scheduler`] trait; the mechanics of
//! blocking, unblocking, preemption and reclamation are shared by all
//! policies and live in this module.
//!
//! All scheduler state is protected by a single [`SpinLock`], which also masks
//! interrupts while it is held, so the timer interrupt handler observes it
//! consistently.
use super::{PRI_MIN, Thread, ThreadState, Tid, donation::LockId};
use crate::{KernelError, fixed_point::Fixed};
use abyss::{
    context::Context,
    interrupt::{InterruptGuard, InterruptState, in_interrupt_context, yield_on_return},
    spinlock::SpinLock,
};
use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::String,
    vec::Vec,
};
use core::{
    cmp::Reverse,
    ops::{Index, IndexMut},
};
use crossbeam_queue::SegQueue;
use crossbeam_utils::atomic::AtomicCell;

/// Default number of ticks a thread runs before it is preempted.
pub const TIME_SLICE: u64 = 4;

/// The control blocks of all threads that are not reclaimed yet.
#[derive(Default)]
pub struct ThreadTable {
    threads: BTreeMap<Tid, Box<Thread>>,
}

impl ThreadTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
        }
    }

    /// Looks up the thread `tid`.
    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(&tid).map(|th| th.as_ref())
    }

    /// Looks up the thread `tid` for modification.
    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(&tid).map(|th| th.as_mut())
    }

    /// Inserts a control block.
    pub fn insert(&mut self, th: Box<Thread>) {
        self.threads.insert(th.tid, th);
    }

    /// Removes the thread `tid` from the table.
    pub fn remove(&mut self, tid: Tid) -> Option<Box<Thread>> {
        self.threads.remove(&tid)
    }

    /// Iterates over the threads in the order of their ids.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values().map(|th| th.as_ref())
    }

    /// Iterates mutably over the threads in the order of their ids.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.threads.values_mut().map(|th| th.as_mut())
    }

    /// Number of threads in the table.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Returns true if the table holds no thread.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl Index<Tid> for ThreadTable {
    type Output = Thread;

    fn index(&self, tid: Tid) -> &Thread {
        match self.threads.get(&tid) {
            Some(th) => th,
            None => panic!("No such thread: {tid}"),
        }
    }
}

impl IndexMut<Tid> for ThreadTable {
    fn index_mut(&mut self, tid: Tid) -> &mut Thread {
        match self.threads.get_mut(&tid) {
            Some(th) => th,
            None => panic!("No such thread: {tid}"),
        }
    }
}

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the policy part of the scheduler: which
/// ready thread runs next, and how priorities evolve with time. Every method
/// is called with the scheduler state locked, and receives the thread table
/// for looking up the priorities of the queued threads.
pub trait Scheduler: Sync {
    /// Pop a next thread to run.
    ///
    /// Returns `None` if no thread is ready.
    fn next_to_run(&self, threads: &ThreadTable) -> Option<Tid>;

    /// Push a ready thread `tid` into scheduling queue.
    fn push_to_queue(&self, threads: &ThreadTable, tid: Tid);

    /// Restore the queue ordering after the priorities of queued threads have
    /// changed.
    fn reorder(&self, threads: &ThreadTable);

    /// Priority of the thread that would be returned by
    /// [`Scheduler::next_to_run`].
    fn highest_ready(&self, threads: &ThreadTable) -> Option<i32>;

    /// Number of queued threads.
    fn ready_len(&self) -> usize;

    /// Called on every timer interrupt, after `ticks` has been advanced.
    ///
    /// `running` is the interrupted thread and `idle` the idle thread, if
    /// any. Returns true if the running thread must yield when the handler
    /// returns.
    fn timer_tick(&self, threads: &mut ThreadTable, running: Tid, idle: Option<Tid>, ticks: u64) -> bool;

    /// Whether waiting on a lock donates priority to its holder.
    fn donation(&self) -> bool {
        false
    }

    /// Whether priorities are computed by the scheduler, rather than set by
    /// the threads.
    fn computes_priority(&self) -> bool {
        false
    }

    /// Initializes the scheduling state of a new thread `th`.
    fn init_thread(&self, _th: &mut Thread) {}

    /// Recomputes the priority of `th` after its niceness changed.
    fn update_priority(&self, _th: &mut Thread) {}

    /// The system load average, if the scheduler tracks it.
    fn load_avg(&self) -> Option<Fixed> {
        None
    }
}

/// Ready threads ordered by descending effective priority, first-in first-out
/// among equal priorities.
pub struct ReadyQueue {
    queue: SpinLock<VecDeque<Tid>>,
}

impl ReadyQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            queue: SpinLock::new(VecDeque::new()),
        }
    }

    /// Inserts `tid` behind every queued thread of equal or higher priority.
    pub fn push(&self, threads: &ThreadTable, tid: Tid) {
        let priority = threads[tid].priority;
        let mut queue = self.queue.lock();
        let pos = queue.partition_point(|t| threads[*t].priority >= priority);
        queue.insert(pos, tid);
        queue.unlock();
    }

    /// Pops the first thread.
    pub fn pop(&self) -> Option<Tid> {
        let mut queue = self.queue.lock();
        let tid = queue.pop_front();
        queue.unlock();
        tid
    }

    /// Sorts the queue again, keeping the relative order of threads with
    /// equal priority.
    pub fn reorder(&self, threads: &ThreadTable) {
        let mut queue = self.queue.lock();
        queue
            .make_contiguous()
            .sort_by_key(|t| Reverse(threads[*t].priority));
        queue.unlock();
    }

    /// Priority of the first thread.
    pub fn peek_priority(&self, threads: &ThreadTable) -> Option<i32> {
        let queue = self.queue.lock();
        let priority = queue.front().map(|t| threads[*t].priority);
        queue.unlock();
        priority
    }

    /// Number of queued threads.
    pub fn len(&self) -> usize {
        let queue = self.queue.lock();
        let len = queue.len();
        queue.unlock();
        len
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued threads, in the order they will run.
    pub fn tids(&self) -> Vec<Tid> {
        let queue = self.queue.lock();
        let tids = queue.iter().copied().collect();
        queue.unlock();
        tids
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick accounting.
#[derive(Clone, Copy, Default, Debug)]
pub struct TickStats {
    /// Ticks spent in the idle thread.
    pub idle_ticks: u64,
    /// Ticks spent in the other threads.
    pub kernel_ticks: u64,
}

/// The scheduler state.
pub(crate) struct State {
    pub threads: ThreadTable,
    pub running: Tid,
    pub idle: Option<Tid>,
    /// Holders of the locks that are currently held.
    pub locks: BTreeMap<LockId, Tid>,
    slice: u64,
    time_slice: u64,
    max_threads: usize,
    stats: TickStats,
}

static STATE: SpinLock<State> = SpinLock::new(State {
    threads: ThreadTable::new(),
    running: 0,
    idle: None,
    locks: BTreeMap::new(),
    slice: 0,
    time_slice: TIME_SLICE,
    max_threads: usize::MAX,
    stats: TickStats {
        idle_ticks: 0,
        kernel_ticks: 0,
    },
});

/// Runs `f` on the scheduler state, with interrupts disabled.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    let mut state = STATE.lock();
    let r = f(&mut state);
    state.unlock();
    r
}

/// Threads that died and wait for their reclamation.
static DESTRUCTION_REQ: SegQueue<Tid> = SegQueue::new();

static SCHEDULER: AtomicCell<Option<&'static dyn Scheduler>> = AtomicCell::new(None);

/// Set the scheduler of the kernel.
pub(crate) fn set_scheduler(sched: &'static dyn Scheduler) {
    assert!(
        SCHEDULER.swap(Some(sched)).is_none(),
        "The scheduler is already set."
    );
}

/// Get the reference of the kernel scheduler.
pub fn scheduler() -> &'static dyn Scheduler {
    match SCHEDULER.load() {
        Some(sched) => sched,
        None => panic!("The scheduler is not set."),
    }
}

/// Tick accounting since boot.
pub fn stats() -> TickStats {
    with_state(|st| st.stats)
}

/// Prints the tick accounting.
pub fn print_stats() {
    let stats = stats();
    println!(
        "Thread: {} idle ticks, {} kernel ticks",
        stats.idle_ticks, stats.kernel_ticks
    );
}

/// 100 times the system load average, rounded to the nearest integer.
///
/// Always 0 unless the scheduler tracks the load average.
pub fn load_avg() -> i32 {
    scheduler()
        .load_avg()
        .map(|la| (la * 100).to_int_round())
        .unwrap_or(0)
}

/// Makes the calling context the first thread of the kernel.
pub(crate) fn init(time_slice: u64, max_threads: usize) {
    let tid = super::allocate_tid();
    let mut th = Box::new(Thread::new(tid, "main", super::PRI_DEFAULT));
    th.state = ThreadState::Running;
    th.context = Some(Context::adopt_current());
    scheduler().init_thread(&mut th);
    with_state(|st| {
        st.threads.insert(th);
        st.running = tid;
        st.time_slice = time_slice;
        st.max_threads = max_threads;
    });
    info!("Thread: {} threads at most, {} ticks per slice.", max_threads, time_slice);
}

/// Creates the idle thread. It gets the cpu only when no other thread is
/// ready.
pub(crate) fn start_idle() -> Result<(), KernelError> {
    let tid = super::allocate_tid();
    let context = Context::spawn("idle", idle).map_err(|e| {
        warn!("Failed to create the idle thread: {e}");
        KernelError::NoMemory
    })?;
    let mut th = Box::new(Thread::new(tid, "idle", PRI_MIN));
    th.context = Some(context);
    with_state(|st| {
        st.threads.insert(th);
        st.idle = Some(tid);
    });
    Ok(())
}

/// The idle thread.
///
/// Blocks itself whenever it runs, and halts the cpu when it is dispatched
/// again because nothing else is ready.
fn idle() {
    finish_context_switch();
    loop {
        unsafe { InterruptState::disable() };
        let stalled = with_state(|st| {
            scheduler().ready_len() == 0
                && !crate::timer::has_sleepers()
                && st
                    .threads
                    .iter()
                    .any(|th| th.state == ThreadState::Blocked && Some(th.tid) != st.idle)
        });
        if stalled {
            let blocked = with_state(|st| {
                st.threads
                    .iter()
                    .filter(|th| th.state == ThreadState::Blocked && Some(th.tid) != st.idle)
                    .map(|th| th.name.clone())
                    .collect::<Vec<String>>()
            });
            panic!("Deadlock: every thread is blocked: {:?}", blocked);
        }
        block();
        abyss::intrinsics::halt();
    }
}

/// Creates a thread that runs `entry` and makes it ready.
///
/// Yields if the new thread outranks the caller.
pub(crate) fn spawn(
    name: String,
    priority: i32,
    entry: impl FnOnce() + Send + 'static,
) -> Result<Tid, KernelError> {
    let context = Context::spawn(&name, entry).map_err(|e| {
        warn!("Failed to create thread {name}: {e}");
        KernelError::NoMemory
    })?;
    let tid = super::allocate_tid();
    let mut th = Box::new(Thread::new(tid, name, priority));
    th.context = Some(context.clone());
    let sched = scheduler();
    let admitted = with_state(|st| {
        if st.threads.len() >= st.max_threads {
            return false;
        }
        sched.init_thread(&mut th);
        st.threads.insert(th);
        true
    });
    if !admitted {
        context.reap();
        return Err(KernelError::NoMemory);
    }
    debug!("Thread {tid} created.");
    unblock(tid);
    preempt_if_outranked();
    Ok(tid)
}

/// Makes a blocked thread ready.
///
/// The caller keeps the cpu, even if `tid` outranks it.
///
/// # Panics
/// Panics if `tid` is not blocked.
pub(crate) fn unblock(tid: Tid) {
    let sched = scheduler();
    with_state(|st| {
        let th = &mut st.threads[tid];
        assert_eq!(
            th.state,
            ThreadState::Blocked,
            "Try to unblock thread {} that is not blocked.",
            th.name
        );
        th.state = ThreadState::Ready;
        if st.idle != Some(tid) {
            sched.push_to_queue(&st.threads, tid);
        }
    });
}

/// Blocks the running thread until it is unblocked.
///
/// Interrupts must be disabled.
pub(crate) fn block() {
    assert!(
        !in_interrupt_context(),
        "Try to block inside an interrupt handler."
    );
    schedule(ThreadState::Blocked);
}

/// Yields the cpu. The running thread stays ready.
pub(crate) fn yield_now() {
    assert!(
        !in_interrupt_context(),
        "Try to yield inside an interrupt handler."
    );
    let _guard = InterruptGuard::new();
    schedule(ThreadState::Ready);
}

/// Yields if a ready thread outranks the running one.
///
/// Inside an interrupt handler, the yield happens when the handler returns.
pub(crate) fn preempt_if_outranked() {
    let sched = scheduler();
    let outranked = with_state(|st| match sched.highest_ready(&st.threads) {
        Some(_) if st.idle == Some(st.running) => true,
        Some(priority) => priority > st.threads[st.running].priority,
        None => false,
    });
    if outranked {
        if in_interrupt_context() {
            yield_on_return();
        } else {
            yield_now();
        }
    }
}

/// Position of the first thread of the highest effective priority among
/// `tids`.
pub(crate) fn pick_highest(tids: impl Iterator<Item = Tid>) -> Option<usize> {
    with_state(|st| {
        let mut best: Option<(usize, i32)> = None;
        for (idx, tid) in tids.enumerate() {
            let priority = st.threads[tid].priority;
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.map(|(idx, _)| idx)
    })
}

/// Accounts a timer tick to the running thread.
pub(crate) fn timer_tick(ticks: u64) {
    let sched = scheduler();
    let expired = with_state(|st| {
        let running = st.running;
        if st.idle == Some(running) {
            st.stats.idle_ticks += 1;
        } else {
            st.stats.kernel_ticks += 1;
        }
        let outranked = sched.timer_tick(&mut st.threads, running, st.idle, ticks);
        st.slice += 1;
        outranked || st.slice >= st.time_slice
    });
    if expired {
        yield_on_return();
    }
}

/// Moves the running thread to `status` and dispatches the next thread.
///
/// Returns true when the running thread gets the cpu back. Returns false if
/// the thread died and has been reclaimed.
pub(crate) fn schedule(status: ThreadState) -> bool {
    assert_eq!(
        InterruptState::current(),
        InterruptState::Off,
        "Try to schedule with interrupts enabled."
    );
    let sched = scheduler();
    let (curr, next, from, to) = with_state(|st| {
        let curr = st.running;
        let th = &mut st.threads[curr];
        assert_eq!(th.state, ThreadState::Running);
        th.state = status;
        if status == ThreadState::Ready && st.idle != Some(curr) {
            sched.push_to_queue(&st.threads, curr);
        }
        let next = match sched.next_to_run(&st.threads).or(st.idle) {
            Some(next) => next,
            None => panic!("No thread to run."),
        };
        st.threads[next].state = ThreadState::Running;
        st.running = next;
        st.slice = 0;
        (
            curr,
            next,
            st.threads[curr].context.clone(),
            st.threads[next].context.clone(),
        )
    });
    if curr == next {
        return true;
    }
    let (Some(from), Some(to)) = (from, to) else {
        panic!("Thread without an execution context.");
    };
    trace!("Switch: {curr} -> {next}");
    if status == ThreadState::Dying {
        DESTRUCTION_REQ.push(curr);
    }
    if unsafe { Context::switch(&from, &to) } {
        drop((from, to));
        finish_context_switch();
        true
    } else {
        false
    }
}

/// Reclaims the threads that died before the running thread got the cpu.
pub(crate) fn finish_context_switch() {
    while let Some(tid) = DESTRUCTION_REQ.pop() {
        if let Some(th) = with_state(|st| st.threads.remove(tid)) {
            if let Some(context) = &th.context {
                context.reap();
            }
            debug!("Thread {} ({}) reclaimed.", th.name, tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(priorities: &[(Tid, i32)]) -> ThreadTable {
        let mut threads = ThreadTable::new();
        for (tid, priority) in priorities {
            threads.insert(Box::new(Thread::new(*tid, "test", *priority)));
        }
        threads
    }

    #[test]
    fn ready_queue_orders_by_priority() {
        let threads = table(&[(1, 10), (2, 30), (3, 20), (4, 30), (5, 10)]);
        let queue = ReadyQueue::new();
        for tid in 1..=5 {
            queue.push(&threads, tid);
        }
        assert_eq!(queue.tids(), [2, 4, 3, 1, 5]);
        assert_eq!(queue.peek_priority(&threads), Some(30));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn ready_queue_reorder_is_stable() {
        let mut threads = table(&[(1, 10), (2, 20), (3, 10), (4, 10)]);
        let queue = ReadyQueue::new();
        for tid in 1..=4 {
            queue.push(&threads, tid);
        }
        assert_eq!(queue.tids(), [2, 1, 3, 4]);
        threads[3].priority = 40;
        threads[2].priority = 10;
        queue.reorder(&threads);
        assert_eq!(queue.tids(), [3, 2, 1, 4]);
    }

    #[test]
    fn ready_queue_empty() {
        let threads = ThreadTable::new();
        let queue = ReadyQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.peek_priority(&threads), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    #[should_panic(expected = "No such thread")]
    fn table_lookup_of_unknown_thread() {
        let threads = table(&[(1, 10)]);
        let _ = threads[2].priority;
    }
}

//! Priority donation.
//!
//! A thread that waits for a lock lends its effective priority to the holder
//! of the lock, so that a low-priority holder cannot be starved by threads of
//! intermediate priority while a high-priority thread waits for it. When the
//! holder itself waits for another lock, the donation is passed along the
//! chain of holders, up to [`DONATION_DEPTH`] links.
//!
//! The effective priority of a thread is the maximum of its base priority and
//! the effective priorities of its donors. A donation is revoked when the
//! holder releases the lock that the donor waited for; the waiters that are
//! left behind donate to the next holder instead.
//!
//! The functions of this module only operate on the thread table and on the
//! lock holders; callers are responsible for locking the scheduler state and
//! for reordering the ready queue afterwards.
use super::{Tid, scheduler::ThreadTable};
use alloc::{collections::BTreeMap, vec::Vec};
use arrayvec::ArrayVec;
use core::cmp::Reverse;

/// Maximum number of holders a single donation propagates through.
pub const DONATION_DEPTH: usize = 8;

/// Identity of a lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LockId(usize);

impl LockId {
    /// The identity of the lock at `lock`.
    ///
    /// Two locks alive at the same time never share an identity.
    pub fn of<T>(lock: &T) -> Self {
        LockId(lock as *const T as usize)
    }
}

/// Holders of the locks that are currently held.
pub type Holders = BTreeMap<LockId, Tid>;

/// Effective priority of `tid`: the maximum of its base priority and the
/// priorities of its donors.
pub fn effective_priority(threads: &ThreadTable, tid: Tid) -> i32 {
    let th = &threads[tid];
    th.donations
        .iter()
        .map(|donor| threads[*donor].priority)
        .fold(th.base_priority, i32::max)
}

/// Recomputes the effective priority of `tid`. Returns true if it changed.
pub fn refresh(threads: &mut ThreadTable, tid: Tid) -> bool {
    let priority = effective_priority(threads, tid);
    let th = &mut threads[tid];
    let changed = th.priority != priority;
    th.priority = priority;
    changed
}

fn insert_donor(threads: &mut ThreadTable, holder: Tid, donor: Tid) {
    let priority = threads[donor].priority;
    let pos = threads[holder]
        .donations
        .partition_point(|d| threads[*d].priority >= priority);
    threads[holder].donations.insert(pos, donor);
}

fn sort_donors(threads: &mut ThreadTable, holder: Tid) {
    let mut donors = core::mem::take(&mut threads[holder].donations);
    donors.sort_by_key(|d| Reverse(threads[*d].priority));
    threads[holder].donations = donors;
}

/// `waiter` is about to wait for `lock`.
///
/// If the lock is held and `donate` is set, `waiter` becomes a donor of the
/// holder and its priority is propagated along the chain of holders. The walk
/// stops at the first holder whose priority is already high enough, or after
/// [`DONATION_DEPTH`] holders.
///
/// Returns the threads whose effective priority was raised, nearest first.
///
/// # Panics
/// Panics if `waiter` already holds `lock`.
pub fn lock_wait(
    threads: &mut ThreadTable,
    holders: &Holders,
    waiter: Tid,
    lock: LockId,
    donate: bool,
) -> ArrayVec<Tid, DONATION_DEPTH> {
    let holder = holders.get(&lock).copied();
    assert!(
        holder != Some(waiter),
        "Try to acquire a lock that is already held by the current thread."
    );
    threads[waiter].waiting_on = Some(lock);

    let mut boosted = ArrayVec::new();
    let Some(holder) = holder else {
        return boosted;
    };
    if !donate {
        return boosted;
    }
    insert_donor(threads, holder, waiter);

    let (mut giver, mut receiver) = (waiter, holder);
    while !boosted.is_full() {
        let priority = threads[giver].priority;
        if threads[receiver].priority >= priority {
            break;
        }
        threads[receiver].priority = priority;
        boosted.push(receiver);
        match threads[receiver]
            .waiting_on
            .and_then(|lock| holders.get(&lock))
            .copied()
        {
            Some(next) => {
                sort_donors(threads, next);
                giver = receiver;
                receiver = next;
            }
            None => break,
        }
    }
    boosted
}

/// `holder` acquired `lock`.
///
/// If `donate` is set, the threads still waiting for `lock` become donors of
/// the new holder.
///
/// # Panics
/// Panics if `lock` is already held.
pub fn lock_acquired(
    threads: &mut ThreadTable,
    holders: &mut Holders,
    holder: Tid,
    lock: LockId,
    donate: bool,
) {
    if let Some(prev) = holders.insert(lock, holder) {
        panic!("Lock {lock:?} is acquired by {holder} while held by {prev}.");
    }
    threads[holder].waiting_on = None;
    if donate {
        let waiters = threads
            .iter()
            .filter(|th| th.waiting_on == Some(lock))
            .map(|th| th.tid)
            .collect::<Vec<_>>();
        for waiter in waiters {
            insert_donor(threads, holder, waiter);
        }
        refresh(threads, holder);
    }
}

/// `releaser` gives `lock` up.
///
/// Revokes the donations of the threads that waited for `lock`, and
/// recomputes the effective priority of `releaser`. Returns true if it
/// changed.
///
/// # Panics
/// Panics if `releaser` does not hold `lock`.
pub fn lock_released(
    threads: &mut ThreadTable,
    holders: &mut Holders,
    releaser: Tid,
    lock: LockId,
) -> bool {
    if holders.get(&lock) != Some(&releaser) {
        panic!("Try to release a lock that is not held by the current thread.");
    }
    holders.remove(&lock);
    let mut donors = core::mem::take(&mut threads[releaser].donations);
    donors.retain(|d| threads[*d].waiting_on != Some(lock));
    threads[releaser].donations = donors;
    refresh(threads, releaser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{PRI_MAX, PRI_MIN, Thread};
    use alloc::boxed::Box;

    fn spawn(threads: &mut ThreadTable, tid: Tid, priority: i32) {
        threads.insert(Box::new(Thread::new(tid, "test", priority)));
    }

    fn acquire(threads: &mut ThreadTable, holders: &mut Holders, tid: Tid, lock: LockId) {
        lock_wait(threads, holders, tid, lock, true);
        lock_acquired(threads, holders, tid, lock, true);
    }

    #[test]
    fn single_donation() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 10);
        spawn(&mut threads, 2, 30);
        acquire(&mut threads, &mut holders, 1, lock);

        let boosted = lock_wait(&mut threads, &holders, 2, lock, true);
        assert_eq!(boosted.as_slice(), &[1]);
        assert_eq!(threads[1].priority, 30);
        assert_eq!(threads[1].base_priority, 10);
        assert_eq!(threads[1].donors(), &[2]);

        assert!(lock_released(&mut threads, &mut holders, 1, lock));
        assert_eq!(threads[1].priority, 10);
        assert!(threads[1].donors().is_empty());

        lock_acquired(&mut threads, &mut holders, 2, lock, true);
        assert_eq!(holders.get(&lock), Some(&2));
        assert_eq!(threads[2].waiting_on, None);
    }

    #[test]
    fn lower_waiter_does_not_donate() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 40);
        spawn(&mut threads, 2, 30);
        acquire(&mut threads, &mut holders, 1, lock);
        assert!(lock_wait(&mut threads, &holders, 2, lock, true).is_empty());
        assert_eq!(threads[1].priority, 40);
        assert_eq!(threads[1].donors(), &[2]);
    }

    #[test]
    fn multiple_locks() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let (a, b) = (LockId(1), LockId(2));
        spawn(&mut threads, 1, 10);
        spawn(&mut threads, 2, 20);
        spawn(&mut threads, 3, 30);
        acquire(&mut threads, &mut holders, 1, a);
        acquire(&mut threads, &mut holders, 1, b);

        lock_wait(&mut threads, &holders, 2, b, true);
        lock_wait(&mut threads, &holders, 3, a, true);
        assert_eq!(threads[1].priority, 30);
        assert_eq!(threads[1].donors(), &[3, 2]);

        lock_released(&mut threads, &mut holders, 1, a);
        assert_eq!(threads[1].priority, 20);
        lock_released(&mut threads, &mut holders, 1, b);
        assert_eq!(threads[1].priority, 10);
    }

    #[test]
    fn new_holder_adopts_waiters() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 10);
        spawn(&mut threads, 2, 20);
        spawn(&mut threads, 3, 30);
        acquire(&mut threads, &mut holders, 1, lock);
        lock_wait(&mut threads, &holders, 2, lock, true);
        lock_wait(&mut threads, &holders, 3, lock, true);
        assert_eq!(threads[1].priority, 30);

        lock_released(&mut threads, &mut holders, 1, lock);
        lock_acquired(&mut threads, &mut holders, 3, lock, true);
        assert_eq!(threads[3].donors(), &[2]);
        assert_eq!(threads[3].priority, 30);
        assert_eq!(threads[1].priority, 10);
    }

    #[test]
    fn nested_donation_is_bounded() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let locks = (0..10).map(LockId).collect::<Vec<_>>();
        let main = 100;
        spawn(&mut threads, main, PRI_MIN);
        acquire(&mut threads, &mut holders, main, locks[0]);
        for i in 1..10 {
            let tid = i as Tid;
            spawn(&mut threads, tid, 10 + 3 * i as i32);
            acquire(&mut threads, &mut holders, tid, locks[i]);
            lock_wait(&mut threads, &holders, tid, locks[i - 1], true);
        }
        // The last waiter reaches only eight holders.
        assert_eq!(threads[8].priority, 37);
        assert_eq!(threads[1].priority, 37);
        assert_eq!(threads[main].priority, 34);

        spawn(&mut threads, 50, PRI_MAX);
        let boosted = lock_wait(&mut threads, &holders, 50, locks[9], true);
        assert_eq!(boosted.as_slice(), &[9, 8, 7, 6, 5, 4, 3, 2]);
        for tid in 2..10 {
            assert_eq!(threads[tid].priority, PRI_MAX);
        }
        assert_eq!(threads[1].priority, 37);
        assert_eq!(threads[main].priority, 34);
    }

    #[test]
    fn donation_stops_at_high_enough_holder() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let (a, b) = (LockId(1), LockId(2));
        spawn(&mut threads, 1, 50);
        spawn(&mut threads, 2, 10);
        spawn(&mut threads, 3, 40);
        acquire(&mut threads, &mut holders, 1, a);
        acquire(&mut threads, &mut holders, 2, b);
        lock_wait(&mut threads, &holders, 2, a, true);
        let boosted = lock_wait(&mut threads, &holders, 3, b, true);
        assert_eq!(boosted.as_slice(), &[2]);
        assert_eq!(threads[2].priority, 40);
        assert_eq!(threads[1].priority, 50);
    }

    #[test]
    fn donation_disabled() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 10);
        spawn(&mut threads, 2, 30);
        lock_wait(&mut threads, &holders, 1, lock, false);
        lock_acquired(&mut threads, &mut holders, 1, lock, false);
        assert!(lock_wait(&mut threads, &holders, 2, lock, false).is_empty());
        assert_eq!(threads[1].priority, 10);
        assert_eq!(threads[2].waiting_on, Some(lock));
        assert!(threads[1].donors().is_empty());
    }

    #[test]
    #[should_panic(expected = "not held by the current thread")]
    fn release_by_non_holder() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 10);
        spawn(&mut threads, 2, 10);
        acquire(&mut threads, &mut holders, 1, lock);
        lock_released(&mut threads, &mut holders, 2, lock);
    }

    #[test]
    #[should_panic(expected = "already held by the current thread")]
    fn recursive_acquire() {
        let (mut threads, mut holders) = (ThreadTable::new(), Holders::new());
        let lock = LockId(1);
        spawn(&mut threads, 1, 10);
        acquire(&mut threads, &mut holders, 1, lock);
        lock_wait(&mut threads, &holders, 1, lock, true);
    }
}

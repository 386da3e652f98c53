//! Ranked locks.
//!
//! Every lock shared between the request path, administrative calls and the
//! DNS threads carries a [`LockRank`]. A thread may only acquire locks in
//! non-decreasing rank order:
//!
//! ```text
//! Membership (dynamic pool tracked set)
//!     → Pool (member list, read or write)
//!         → Cursor (round-robin position)
//!             → Lookup (per-entry wake state)
//! ```
//!
//! Equal ranks may nest (a pool whose member is another pool). Taking a lower
//! rank while a higher one is held panics before the lock is touched, so an
//! ordering bug shows up as a panic on the first bad path instead of as an
//! occasional deadlock.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Position of a lock in the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockRank {
    Membership = 1,
    Pool = 2,
    Cursor = 3,
    Lookup = 4,
}

thread_local! {
    static HELD: RefCell<Vec<LockRank>> = const { RefCell::new(Vec::new()) };
}

/// Records that the current thread holds a lock of the given rank.
#[derive(Debug)]
pub struct RankToken {
    rank: LockRank,
}

impl RankToken {
    /// Register `rank` for the current thread, panicking on an order violation.
    pub fn acquire(rank: LockRank) -> Self {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(top) = held.iter().max() {
                if rank < *top {
                    panic!("lock order violation: acquiring {:?} while holding {:?}", rank, top);
                }
            }
            held.push(rank);
        });
        Self { rank }
    }
}

impl Drop for RankToken {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|r| *r == self.rank) {
                held.remove(pos);
            }
        });
    }
}

/// Ranks currently held by this thread, innermost last.
pub fn held_ranks() -> Vec<LockRank> {
    HELD.with(|held| held.borrow().clone())
}

/// `parking_lot::RwLock` tagged with a rank.
#[derive(Debug)]
pub struct RankedRwLock<T> {
    rank: LockRank,
    inner: RwLock<T>,
}

impl<T> RankedRwLock<T> {
    pub fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: RwLock::new(value),
        }
    }

    pub fn read(&self) -> RankedReadGuard<'_, T> {
        let token = RankToken::acquire(self.rank);
        RankedReadGuard {
            guard: self.inner.read(),
            _token: token,
        }
    }

    pub fn write(&self) -> RankedWriteGuard<'_, T> {
        let token = RankToken::acquire(self.rank);
        RankedWriteGuard {
            guard: self.inner.write(),
            _token: token,
        }
    }
}

// Field order matters: the lock is released before the rank is forgotten.
pub struct RankedReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    _token: RankToken,
}

impl<T> Deref for RankedReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct RankedWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _token: RankToken,
}

impl<T> Deref for RankedWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RankedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// `parking_lot::Mutex` tagged with a rank.
#[derive(Debug)]
pub struct RankedMutex<T> {
    rank: LockRank,
    inner: Mutex<T>,
}

impl<T> RankedMutex<T> {
    pub fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> RankedMutexGuard<'_, T> {
        let token = RankToken::acquire(self.rank);
        RankedMutexGuard {
            guard: self.inner.lock(),
            _token: token,
        }
    }
}

pub struct RankedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _token: RankToken,
}

impl<T> RankedMutexGuard<'_, T> {
    /// Block on `cond` until notified or `deadline` passes. Returns true on timeout.
    pub fn wait_until(&mut self, cond: &Condvar, deadline: Instant) -> bool {
        cond.wait_until(&mut self.guard, deadline).timed_out()
    }

    /// Block on `cond` until notified.
    pub fn wait(&mut self, cond: &Condvar) {
        cond.wait(&mut self.guard);
    }
}

impl<T> Deref for RankedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RankedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

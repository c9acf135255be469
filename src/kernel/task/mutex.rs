//! Recursive, task-aware mutex (§4.7): unlike [`crate::prelude::Mutex`]
//! (a spinlock for short kernel-internal critical sections), this one
//! tracks *which task* owns it, allows the owner to relock it, and
//! suspends contending tasks via the scheduler rather than spinning.
//!
//! Grounded on the reference kernel's `MutexNoPreemption`/`PreemptGuard`
//! pairing in `prelude.rs` for the "disable preemption around the
//! bookkeeping spinlock" shape, generalized from a plain spinlock to a
//! task-owned recursive lock with a FIFO wait queue.

use alloc::collections::VecDeque;

use super::scheduler;
use super::tcb::{TaskId, WaitObject};
use crate::prelude::*;

struct Inner {
    owner: Option<TaskId>,
    lock_count: u32,
    waiters: VecDeque<TaskId>,
}

pub struct TaskMutex {
    inner: Mutex<Inner>,
}

impl TaskMutex {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { owner: None, lock_count: 0, waiters: VecDeque::new() }),
        }
    }

    /// Acquire the lock, suspending the calling task if another task
    /// already owns it. Recursive: the owning task may call this again
    /// without deadlocking, incrementing `lock_count`.
    pub fn lock(&self) {
        let current = scheduler::current_id();
        let mut inner = self.inner.lock();

        match inner.owner {
            None => {
                inner.owner = Some(current);
                inner.lock_count = 1;
            }
            Some(owner) if owner == current => {
                inner.lock_count += 1;
            }
            Some(_) => {
                inner.waiters.push_back(current);
                drop(inner);
                scheduler::block_current(WaitObject::Mutex(self as *const _ as u32));
                // `unlock` only wakes the waiter it just handed ownership
                // to (owner already set, lock_count already 1), so there's
                // nothing left to check on resume.
            }
        }
    }

    /// Non-blocking variant of [`Self::lock`]; returns `Busy` if another
    /// task owns the mutex.
    pub fn try_lock(&self) -> KResult<()> {
        let current = scheduler::current_id();
        let mut inner = self.inner.lock();
        match inner.owner {
            None => {
                inner.owner = Some(current);
                inner.lock_count = 1;
                Ok(())
            }
            Some(owner) if owner == current => {
                inner.lock_count += 1;
                Ok(())
            }
            Some(_) => Err(Error::Busy),
        }
    }

    /// Release one level of recursive ownership. Only the owning task may
    /// call this; violating that contract is a kernel invariant failure
    /// (per the spec's panic policy), not a recoverable error.
    pub fn unlock(&self) {
        let current = scheduler::current_id();
        let mut inner = self.inner.lock();

        assert_eq!(inner.owner, Some(current), "unlock: caller does not own this mutex");

        inner.lock_count -= 1;
        if inner.lock_count > 0 {
            return;
        }

        inner.owner = None;
        if let Some(next) = inner.waiters.pop_front() {
            inner.owner = Some(next);
            inner.lock_count = 1;
            drop(inner);
            scheduler::unblock(next);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().owner.is_some()
    }
}

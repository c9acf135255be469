//! Common imports and the preemption-disabling mutex wrapper used
//! throughout the kernel, grounded on the reference kernel's
//! `src/prelude.rs`. The reference kernel disables preemption through an
//! extern "C" counter maintained by its C bootstrap code; here the same
//! IRQ-nesting counter the scheduler itself checks (see
//! `kernel::task::scheduler`) lives directly in this module.

pub use crate::error::{Error, KResult};

#[allow(unused_imports)]
pub(crate) use alloc::{boxed::Box, string::String, vec, vec::Vec};

#[allow(unused_imports)]
pub(crate) use core::{fmt::Write, str};

#[allow(unused_imports)]
pub(crate) use klog::{print, println, println_debug, println_fatal, println_info, println_warn};

use core::sync::atomic::{AtomicUsize, Ordering};

/// Nesting depth of in-kernel critical sections. The timer IRQ only calls
/// into the scheduler when this is zero; see the spec's "Preemption
/// window" design note.
static PREEMPT_COUNT: AtomicUsize = AtomicUsize::new(0);

#[inline(always)]
pub fn preempt_disable() {
    PREEMPT_COUNT.fetch_add(1, Ordering::AcqRel);
}

#[inline(always)]
pub fn preempt_enable() {
    PREEMPT_COUNT.fetch_sub(1, Ordering::AcqRel);
}

#[inline(always)]
pub fn preempt_count() -> usize {
    PREEMPT_COUNT.load(Ordering::Acquire)
}

#[derive(Debug)]
#[repr(transparent)]
pub struct PreemptGuard;

impl PreemptGuard {
    #[inline(always)]
    pub fn new() -> Self {
        preempt_disable();
        Self
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    #[inline(always)]
    fn drop(&mut self) {
        preempt_enable();
    }
}

#[repr(transparent)]
pub struct MutexNoPreemptionGuard<'a, T: ?Sized> {
    data_guard: spin::mutex::MutexGuard<'a, T>,
    _preempt_guard: PreemptGuard,
}

impl<'a, T: ?Sized> MutexNoPreemptionGuard<'a, T> {
    #[inline(always)]
    pub fn new(preempt_guard: PreemptGuard, data_guard: spin::mutex::MutexGuard<'a, T>) -> Self {
        Self { data_guard, _preempt_guard: preempt_guard }
    }
}

impl<'a, T: ?Sized> core::ops::Deref for MutexNoPreemptionGuard<'a, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.data_guard
    }
}

impl<'a, T: ?Sized> core::ops::DerefMut for MutexNoPreemptionGuard<'a, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data_guard
    }
}

/// A spinlock that also disables preemption for its critical section, used
/// for kernel bookkeeping structures (scheduler queues, mount table, FD
/// table) that the timer IRQ handler must never observe half-updated.
#[repr(transparent)]
pub struct MutexNoPreemption<T: ?Sized> {
    lock: spin::mutex::Mutex<T>,
}

impl<T> MutexNoPreemption<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self { lock: spin::mutex::Mutex::new(value) }
    }
}

#[allow(dead_code)]
impl<T: ?Sized> MutexNoPreemption<T> {
    #[inline(always)]
    pub fn lock(&self) -> MutexNoPreemptionGuard<T> {
        let preempt_guard = PreemptGuard::new();
        let data_guard = self.lock.lock();
        MutexNoPreemptionGuard::new(preempt_guard, data_guard)
    }

    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    #[inline(always)]
    pub fn try_lock(&self) -> Option<MutexNoPreemptionGuard<T>> {
        let preempt_guard = PreemptGuard::new();
        self.lock.try_lock().map(|data_guard| MutexNoPreemptionGuard::new(preempt_guard, data_guard))
    }

    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.lock.get_mut()
    }
}

pub type Mutex<T> = MutexNoPreemption<T>;

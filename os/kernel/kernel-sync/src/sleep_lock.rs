use crate::{Channel, Scheduler, SpinLock};
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
};

/// A long-term lock whose waiters block in the scheduler instead of spinning.
///
/// Safe to hold across disk I/O. The inner [`SpinLock`] only guards the
/// `locked` flag and is never held while the protected data is in use.
pub struct SleepLock<T> {
    /// `true` while a [`SleepLockGuard`] exists.
    locked: SpinLock<bool>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// Safety: the `locked` flag grants exclusive access to `data`.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            locked: SpinLock::new("sleep lock", false),
            name,
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The channel waiters of this lock sleep on.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> Channel {
        Channel::of(self)
    }

    /// Whether some guard currently exists.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    /// Block until the lock is free, then take it.
    pub fn lock<'a, S: Scheduler>(&'a self, sched: &'a S) -> SleepLockGuard<'a, T, S> {
        let mut held = self.locked.lock();
        while *held {
            sched.sleep(self.channel(), held);
            held = self.locked.lock();
        }
        *held = true;
        drop(held);
        SleepLockGuard { lock: self, sched }
    }

    /// Take the lock if it is free; never blocks.
    pub fn try_lock<'a, S: Scheduler>(&'a self, sched: &'a S) -> Option<SleepLockGuard<'a, T, S>> {
        let mut held = self.locked.lock();
        if *held {
            return None;
        }
        *held = true;
        Some(SleepLockGuard { lock: self, sched })
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SleepLockGuard<'a, T, S: Scheduler> {
    lock: &'a SleepLock<T>,
    sched: &'a S,
}

impl<T, S: Scheduler> Deref for SleepLockGuard<'_, T, S> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard proves the `locked` flag is ours.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, S: Scheduler> DerefMut for SleepLockGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the `locked` flag is ours.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, S: Scheduler> Drop for SleepLockGuard<'_, T, S> {
    fn drop(&mut self) {
        let mut held = self.lock.locked.lock();
        *held = false;
        self.sched.wakeup(self.lock.channel());
    }
}

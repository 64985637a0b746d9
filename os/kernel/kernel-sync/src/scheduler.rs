//! The blocking primitive sleep-locks rely on.
//!
//! The process subsystem owns scheduling; this crate only needs "block the
//! caller until someone wakes the channel" and "wake everyone on a channel".

use crate::SpinLockGuard;
use core::hint::spin_loop;

/// Identity of a wait condition, usually the address of the object waited on.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Channel(usize);

impl Channel {
    /// Channel keyed by the address of `obj`.
    #[inline]
    #[must_use]
    pub fn of<T>(obj: &T) -> Self {
        Self(core::ptr::from_ref(obj).addr())
    }

    /// Channel for a key handed out by [`as_usize`](Self::as_usize).
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Blocking and wakeup, provided by the scheduler.
///
/// `sleep` must release `guard` atomically with respect to [`wakeup`](Self::wakeup)
/// on the same channel: a wakeup issued by someone who acquired that spin lock
/// after the sleeper must not be lost. Spurious returns are allowed; every
/// caller re-checks its condition after reacquiring the lock.
pub trait Scheduler: Sync {
    /// Release `guard` and block the caller until `chan` is woken.
    fn sleep<T>(&self, chan: Channel, guard: SpinLockGuard<'_, T>);

    /// Make every thread sleeping on `chan` runnable.
    fn wakeup(&self, chan: Channel);
}

/// Busy-waiting stand-in used before the scheduler runs.
///
/// `sleep` drops the guard and returns after a spin hint, so the caller
/// polls its condition; `wakeup` has nothing to do.
#[derive(Copy, Clone, Default, Debug)]
pub struct SpinWait;

impl Scheduler for SpinWait {
    #[inline]
    fn sleep<T>(&self, _chan: Channel, guard: SpinLockGuard<'_, T>) {
        drop(guard);
        spin_loop();
    }

    #[inline]
    fn wakeup(&self, _chan: Channel) {}
}

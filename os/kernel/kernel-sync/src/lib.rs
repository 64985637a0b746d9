//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: short critical sections; never held across blocking calls.
//! * [`SleepLock`]: long-held locks (e.g. a buffer across disk I/O); waiters
//!   block through a [`Scheduler`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod scheduler;
mod sleep_lock;
mod spin_lock;

pub use scheduler::{Channel, Scheduler, SpinWait};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};

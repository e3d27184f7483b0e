//! Stand-in for "disable interrupts" in a hosted, std-backed runtime.
//!
//! The spec protects the scheduler, alarm queue, semaphore waiter lists and port
//! tables by masking the clock interrupt rather than by locking — but since this
//! runtime has no real interrupt to mask, every one of those structures is instead
//! owned by its own `std::sync::Mutex`, and *holding that lock* is the masked region.
//! `masked` is a thin, named wrapper around `Mutex::lock` that documents this mapping
//! at each call site and keeps the one invariant the spec calls out as load-bearing:
//! the region must never itself call a primitive that can block (no `P` on a
//! semaphore that might go negative, no allocation that waits). That invariant is a
//! calling convention, not something the type system enforces — every closure passed
//! to `masked` is reviewed for this on the assumption it runs to completion.
//!
//! Lock release happens via the returned guard's `Drop`, so it is restored on every
//! exit path, including an unwinding panic — the same guarantee the teacher kernel's
//! `Spinlock`/`MutexGuard` RAII pattern provides for its own masked sections.

use std::sync::{Mutex, MutexGuard};

/// Acquire `lock` and run `f` with exclusive access, mirroring the original's
/// "disable interrupts; do work; restore mask" shape as a single expression.
pub fn masked<T, R>(lock: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard: MutexGuard<T> = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

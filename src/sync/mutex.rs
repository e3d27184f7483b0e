//! A sleeping mutex: built directly on [`Semaphore`] as a binary semaphore, per spec
//! §5 ("the socket send/receive mutex is a semaphore \[...\] and serializes
//! application calls"). Unlike `std::sync::Mutex`, a blocked `lock()` parks the
//! calling minithread via the scheduler rather than blocking the backing OS thread
//! directly — holding it across a later semaphore `P` (as `StreamSocket` does for the
//! whole duration of `send`/`receive`/`close`) is therefore safe and does not wedge an
//! unrelated minithread's turn on the `Vcpu` token.

use crate::sync::semaphore::Semaphore;
use crate::task::thread::ThreadId;
use crate::Handle;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// A mutex that blocks the calling minithread (rather than spinning) when contended.
pub struct Mutex<T> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex { sem: Semaphore::new(1), data: UnsafeCell::new(value) }
    }

    /// Acquire the mutex, blocking the calling minithread `me` if it is held.
    pub fn lock<'a>(&'a self, rt: &Handle, me: ThreadId) -> MutexGuard<'a, T> {
        self.sem.p(rt, me);
        MutexGuard { mutex: self, rt: rt.clone() }
    }
}

/// RAII guard for a held [`Mutex`]. Releases (via `V`) on drop.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    rt: Handle,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.sem.v(&self.rt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::net::transport::UdpTransport;
    use crate::task::scheduler::Runtime;
    use std::sync::Arc;

    fn test_runtime() -> Handle {
        let transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind loopback"));
        Runtime::with_config(transport, RuntimeConfig::fast_for_tests())
    }

    #[test]
    fn serializes_four_minithreads() {
        let rt = test_runtime();
        let mutex = Arc::new(Mutex::new(0u32));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..4 {
            let (m, o) = (mutex.clone(), order.clone());
            rt.fork(
                format!("locker-{i}"),
                Box::new(move |h| {
                    let me = h.self_id();
                    let mut guard = m.lock(&h, me);
                    *guard += 1;
                    o.lock().unwrap().push(*guard);
                }),
            );
        }
        rt.join_idle();
        let mut seen = order.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }
}

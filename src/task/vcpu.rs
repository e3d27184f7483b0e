//! Context-switch substitute: a single-token turnstile handed between real OS threads.
//!
//! The original C backs each minithread with its own stack and does the switch with
//! hand-written assembly (`stack_alloc`, `stack_init`, `ctx_switch`) — explicitly out
//! of scope for this spec. Rather than leave the seam unimplemented, this rewrite backs
//! each minithread with a genuine `std::thread`, and makes "context switch" mean
//! "hand a token to the OS thread that should run next, then park until it's handed
//! back". Exactly one minithread ever holds the token, so the spec's core invariant —
//! no two minithreads execute at the same instant — holds by construction, in safe
//! Rust, with no stack-layout assumptions at all.

use crate::task::thread::ThreadId;
use std::sync::{Condvar, Mutex};

/// The single CPU token. `None` means nothing is scheduled to run (the vcpu is idle,
/// waiting for the tick handler or an external event to pick a thread).
pub struct Vcpu {
    current: Mutex<Option<ThreadId>>,
    cv: Condvar,
}

impl Vcpu {
    pub fn new() -> Self {
        Vcpu { current: Mutex::new(None), cv: Condvar::new() }
    }

    /// Hand the token to `next`. If the caller (`from`) is not `next`, the caller
    /// blocks here until the token comes back to it. Pass `from = None` when called
    /// from a context that does not itself hold the token (e.g. the alarm tick
    /// handler deciding a switch should happen on the next yield point) — in that case
    /// the call never blocks.
    pub fn switch(&self, from: Option<ThreadId>, next: Option<ThreadId>) {
        let mut guard = self.current.lock().unwrap();
        *guard = next;
        self.cv.notify_all();
        if let Some(me) = from {
            if Some(me) != next {
                guard = self
                    .cv
                    .wait_while(guard, |cur| *cur != Some(me))
                    .unwrap();
                drop(guard);
            }
        }
    }

    /// Block the calling OS thread until it is handed the token as `me`. Used by a
    /// freshly spawned minithread's backing OS thread before it may run its body.
    pub fn wait_for_turn(&self, me: ThreadId) {
        let guard = self.current.lock().unwrap();
        let _guard = self.cv.wait_while(guard, |cur| *cur != Some(me)).unwrap();
    }

    /// True if nothing currently holds the token.
    pub fn is_idle(&self) -> bool {
        self.current.lock().unwrap().is_none()
    }
}

impl Default for Vcpu {
    fn default() -> Self {
        Self::new()
    }
}

//! Thread identity and lifecycle state.
//!
//! Trimmed down from a full process-table entry (the teacher kernel's `Thread` also
//! carries a page directory, FPU state, and process identity — none of which apply
//! here: this spec has no process isolation, a stated Non-goal).

use crate::net::header::PORT_MAX;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Opaque thread identity, monotonically assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub fn next() -> ThreadId {
        ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Execution state of a thread in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to be picked by the scheduler; sitting in some level queue.
    Runnable,
    /// Currently holding the CPU token.
    Running,
    /// Blocked on a semaphore, alarm-backed timeout, or socket operation.
    Waiting,
    /// The thread's top-level procedure has returned; awaiting reaping.
    Zombie,
}

/// Everything the scheduler needs to know about one minithread.
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    /// Current MLFQ level, 0 = highest priority.
    pub level: usize,
    /// Quanta consumed at the current level since the last demotion.
    pub level_quanta: u32,
}

impl Thread {
    pub fn new(id: ThreadId, name: impl Into<String>) -> Self {
        Thread {
            id,
            name: name.into(),
            state: ThreadState::Runnable,
            level: 0,
            level_quanta: 0,
        }
    }
}

/// A thread's top-level procedure. Receives a handle back into the runtime so it can
/// call `fork`, `yield_now`, semaphore `P`/`V`, socket operations, and so on — the
/// idiomatic-Rust stand-in for the original C API's implicit global kernel calls.
pub type ThreadProc = Box<dyn FnOnce(crate::Handle) + Send + 'static>;

/// Clamp a stream/datagram port number into the valid range, used by callers that
/// validate ports before handing them to the port/socket tables.
pub fn valid_port(port: u32) -> bool {
    port <= PORT_MAX as u32
}

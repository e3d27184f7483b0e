//! Synchronization primitives for the runtime.
//!
//! Provides a sleeping [`mutex::Mutex`] and a counting [`semaphore::Semaphore`],
//! both built on the scheduler's own lock rather than spinning — see each module's
//! docs for why that sharing matters.

pub mod mutex;
pub mod semaphore;

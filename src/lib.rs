//! A cooperative-preemptive user-space threading runtime, with a reliable stream
//! transport (`net::stream`) and a datagram transport (`net::port`) layered over a
//! raw, unreliable packet primitive (`net::transport`).
//!
//! The runtime is a single [`Runtime`] object (see [`task::scheduler`]) rather than
//! the original's process-wide globals: construct one with [`Runtime::new`], fork
//! minithreads onto it with [`Runtime::fork`], and everything else — semaphores,
//! alarms, datagram miniports, stream sockets — takes a [`Handle`] (a cloneable
//! `Arc<Runtime>`) as its first argument, the idiomatic-Rust stand-in for the
//! original's implicit global kernel API.
//!
//! See `DESIGN.md` for the grounding ledger (which teacher/example file each module
//! is modeled on) and `SPEC_FULL.md` for the full module-by-module contract.

pub mod clock;
pub mod config;
pub mod error;
pub mod net;
pub mod preempt;
pub mod queue;
pub mod sync;
pub mod task;

pub use error::{RuntimeError, RuntimeResult};
pub use task::scheduler::{Handle, Runtime};

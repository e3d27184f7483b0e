//! The runtime's error taxonomy.
//!
//! Every public operation that can fail returns `Result<T, RuntimeError>` instead of
//! the original C code's `out-parameter + int` convention. The variants mirror the
//! error codes named in the spec one-to-one so a reader can map straight back to them.

use thiserror::Error;

/// Unified error type for the scheduler, port, and socket layers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// The client or server port space is exhausted.
    #[error("no more ports available")]
    NoMorePorts,
    /// A server tried to bind a stream port that is already in use.
    #[error("port already in use")]
    PortInUse,
    /// A client's handshake retransmit budget was exhausted without a SYNACK.
    #[error("no server responded to the handshake")]
    NoServer,
    /// A resource (port, socket) is transiently unavailable.
    #[error("resource busy")]
    Busy,
    /// A transport-level send failed, or a send's retransmit budget was exhausted.
    #[error("send failed")]
    SendError,
    /// A transport-level receive failed, or the peer closed the connection.
    #[error("receive failed")]
    ReceiveError,
    /// A caller passed a null/out-of-range/oversized argument.
    #[error("invalid parameters")]
    InvalidParams,
    /// An allocation (port table slot, socket slot, packet buffer) failed.
    #[error("out of memory")]
    OutOfMemory,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

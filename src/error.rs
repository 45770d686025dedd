//! Error types for the broadcast node.

use thiserror::Error;

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire error codes, following the Maelstrom convention.
pub mod code {
    /// The request type is not handled by this node.
    pub const NOT_SUPPORTED: u32 = 10;
    /// The node cannot serve the request right now (e.g. before `init`).
    pub const TEMPORARILY_UNAVAILABLE: u32 = 11;
    /// The request body is missing fields or has fields of the wrong type.
    pub const MALFORMED_REQUEST: u32 = 12;
    /// Internal failure while handling the request.
    pub const CRASH: u32 = 13;
    /// The request was aborted (e.g. node shutting down).
    pub const ABORT: u32 = 14;
    /// A precondition of the request was violated.
    pub const PRECONDITION_FAILED: u32 = 22;
}

/// Errors that can occur while handling node requests.
#[derive(Debug, Error)]
pub enum Error {
    /// A required field is missing or has the wrong type.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Message type whose payload was rejected.
        kind: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// The request envelope could not be decoded.
    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// An outbound message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// A peer was unreachable or an RPC failed.
    #[error("transport error sending to {target}: {reason}")]
    Transport {
        /// Peer the send was addressed to.
        target: String,
        /// Underlying failure.
        reason: String,
    },

    /// A request arrived before `init`.
    #[error("node has not been initialized")]
    NotInitialized,

    /// A second `init` arrived.
    #[error("node {0} is already initialized")]
    AlreadyInitialized(String),

    /// The request type is not handled by this node.
    #[error("unsupported message type: {0}")]
    NotSupported(String),

    /// A peer answered an RPC with an unexpected body.
    #[error("unexpected reply from {from}: expected {expected}, got {got}")]
    UnexpectedReply {
        /// Peer that replied.
        from: String,
        /// Reply type we were waiting for.
        expected: &'static str,
        /// Reply type we received.
        got: String,
    },

    /// The node has been shut down.
    #[error("node has been shut down")]
    Shutdown,

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::MalformedPayload`] for the given message type.
    pub fn malformed(kind: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedPayload {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`Error::Transport`] for the given target.
    pub fn transport(target: impl Into<String>, reason: impl ToString) -> Self {
        Error::Transport {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Wire error code reported to the caller for this error.
    pub fn code(&self) -> u32 {
        match self {
            Error::MalformedPayload { .. } | Error::Decode(_) => code::MALFORMED_REQUEST,
            Error::NotInitialized => code::TEMPORARILY_UNAVAILABLE,
            Error::AlreadyInitialized(_) => code::PRECONDITION_FAILED,
            Error::NotSupported(_) => code::NOT_SUPPORTED,
            Error::Shutdown => code::ABORT,
            Error::Encode(_)
            | Error::Transport { .. }
            | Error::UnexpectedReply { .. }
            | Error::Io(_) => code::CRASH,
        }
    }
}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(err: async_channel::SendError<T>) -> Self {
        Error::transport("stdout", err)
    }
}

//! Error types for POF encoding and decoding.

use std::io;
use thiserror::Error;

/// The main error type for POF operations.
///
/// None of these are retried internally; a record that fails mid-write must
/// be discarded in its entirety by the caller.
#[derive(Debug, Error)]
pub enum PofError {
    /// A property index was negative or not strictly greater than the
    /// previously written/requested one.
    #[error("ordering violation: {0}")]
    Ordering(String),

    /// A structural rule of the stream was broken: writing or reading
    /// outside an open record, double termination, unbalanced begin/end.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A uniform container element did not match the declared element type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// No serializer or wire mapping exists for a value or type id.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// A sparse array index fell outside the addressable index space.
    #[error("index out of range: {0}")]
    IndexRange(String),

    /// An identity was assigned twice for the same object.
    #[error("duplicate identity registration: {0}")]
    DuplicateRegistration(String),

    /// The underlying byte stream ended early or refused the operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The stream data itself is malformed (unknown tag, bad UTF-8,
    /// negative count, excessive nesting).
    #[error("malformed stream: {0}")]
    Format(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PofError {
    /// Returns true if the error came from the byte-stream transport and
    /// should poison the in-progress record.
    pub fn is_transport(&self) -> bool {
        matches!(self, PofError::Transport(_) | PofError::Io(_))
    }
}

/// A specialized `Result` type for POF operations.
pub type PofResult<T> = std::result::Result<T, PofError>;

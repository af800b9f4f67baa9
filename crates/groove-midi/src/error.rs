//! Error types for the MIDI interchange subsystem.

use thiserror::Error;

/// Error type for event and file codec operations. Every variant is
/// recoverable: a failed parse abandons the file and surfaces enough
/// context (byte offsets, expected vs. actual) for diagnostics.
#[derive(Error, Debug)]
pub enum Error {
    #[error("read failure: {0}")]
    ReadFailure(#[from] std::io::Error),

    #[error("file structurally unsound: {0}")]
    FileStructurallyUnsound(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("missing event: {0}")]
    MissingEvent(String),
}

pub type Result<T> = std::result::Result<T, Error>;

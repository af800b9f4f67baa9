//! Error types for groove-core.

use thiserror::Error;

/// Error type for clock, time, and transport operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to spawn {context} thread: {source}")]
    ClockInit {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("invalid bar beat time: {0}")]
    InvalidTime(String),
}

pub type Result<T> = std::result::Result<T, Error>;

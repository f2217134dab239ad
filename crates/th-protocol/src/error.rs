//! Protocol error types

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors that can occur while framing events
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line exceeded the configured maximum frame length
    #[error("Frame exceeds maximum length of {max} bytes")]
    FrameTooLarge { max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn from_lines(err: LinesCodecError, max: usize) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLarge { max },
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

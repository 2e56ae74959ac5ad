//! Wire layer error types.

use thiserror::Error;

/// Framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// No frame boundary found before the buffer limit; the buffer was reset
    #[error("buffer overflow: no frame boundary within {limit} bytes")]
    BufferOverflow {
        /// Configured maximum buffer size
        limit: usize,
    },

    /// Delimiter could not be parsed from its configured text
    #[error("invalid delimiter {0:?}")]
    InvalidDelimiter(String),

    /// The selected strategy needs a delimiter that was not configured
    #[error("{0} delimiter is required by the selected frame detection")]
    MissingDelimiter(&'static str),

    /// Unknown checksum algorithm name
    #[error("unknown checksum algorithm {0:?}")]
    UnknownChecksum(String),

    /// Buffer limit is too small to hold any frame
    #[error("invalid max buffer size {0}")]
    BufferLimit(usize),
}

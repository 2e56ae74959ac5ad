//! Session and transport error types.

use ingest_decode::DecodeError;
use ingest_wire::WireError;
use thiserror::Error;

/// Errors raised by transport sources
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not open the device or connect to the peer
    #[error("failed to open {target}: {source}")]
    Open {
        /// Address or device path
        target: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Read failed on an open transport
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while setting up or tearing down a session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid framing configuration
    #[error("framing: {0}")]
    Wire(#[from] WireError),

    /// Decoder could not be built
    #[error("decoder: {0}")]
    Decode(#[from] DecodeError),

    /// Transport could not be opened
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Worker thread could not be started or panicked
    #[error("frame worker: {0}")]
    Worker(String),

    /// Session task panicked or was cancelled
    #[error("session task: {0}")]
    Join(String),
}

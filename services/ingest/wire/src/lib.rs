//! Frame detection, delimiters and checksum validation for byte-stream ingestion.
//!
//! This crate turns an arbitrarily fragmented stream of bytes into discrete
//! raw frames, and verifies their integrity before they reach a decoder.
//!
//! ## Features
//!
//! - **Boundary Strategies**: end delimiter, start delimiter, start and end
//!   delimiters, read/line boundaries, and balanced JSON objects
//! - **Re-entrant Scanning**: partial frames survive across reads without
//!   rescanning bytes already inspected
//! - **Bounded Buffering**: overflow is detected, reported and recovered
//! - **Checksums**: XOR, sum, CRC-8/16/32, Fletcher-16, Adler-32 and SHA-256
//!   trailers, big-endian on the wire
//! - **Zero-Copy Buffering**: uses `Bytes`/`BytesMut` for the accumulation
//!   buffer and frame payloads
//!
//! ## Frame Layout
//!
//! ```text
//! +-----------------+------------------+---------------+----------------+
//! | start (opt)     | payload          | end (opt)     | checksum (opt) |
//! +-----------------+------------------+---------------+----------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod checksum;
pub mod delimiter;
pub mod detector;
pub mod error;
pub mod frame;
pub mod strategy;

// Re-export main types
pub use buffer::AccumulationBuffer;
pub use checksum::{validate, ChecksumAlgorithm, ChecksumBytes, ChecksumValidator, Validation};
pub use delimiter::Delimiter;
pub use detector::{DetectorStats, FrameDetector};
pub use error::WireError;
pub use frame::{encode_frame, RawFrame};
pub use strategy::{
    BoundaryStrategy, FrameDetection, FramingConfig, DEFAULT_MAX_BUFFER_SIZE,
    HARD_MAX_BUFFER_SIZE,
};

//! Raw frames extracted from the byte stream.

use crate::checksum::ChecksumAlgorithm;
use crate::strategy::BoundaryStrategy;
use bytes::{BufMut, Bytes, BytesMut};

/// One complete frame with delimiters stripped
///
/// The payload is an independent copy of the buffered bytes, so the
/// accumulation buffer can be compacted right after extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame payload (never empty)
    pub payload: Bytes,
    /// Trailing checksum bytes, empty when no checksum is configured
    pub checksum: Bytes,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(payload: Bytes, checksum: Bytes) -> Self {
        Self { payload, checksum }
    }

    /// Frame without checksum trailer
    pub fn plain(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            checksum: Bytes::new(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Build the on-wire bytes of a frame for the given strategy and checksum
///
/// For `NoDelimiters` a line terminator is appended, matching text
/// transports.
pub fn encode_frame(
    strategy: &BoundaryStrategy,
    algorithm: ChecksumAlgorithm,
    payload: &[u8],
) -> Bytes {
    let checksum = algorithm.compute(payload);
    let mut buf = BytesMut::with_capacity(payload.len() + checksum.len() + 8);

    if let Some(start) = strategy.start_delimiter() {
        buf.put_slice(start.as_bytes());
    }

    buf.put_slice(payload);

    match strategy {
        BoundaryStrategy::EndDelimiterOnly { end } | BoundaryStrategy::StartAndEndDelimiter { end, .. } => {
            buf.put_slice(end.as_bytes());
            buf.put_slice(&checksum);
        }
        BoundaryStrategy::NoDelimiters => {
            buf.put_slice(&checksum);
            buf.put_u8(b'\n');
        }
        BoundaryStrategy::StartDelimiterOnly { .. } | BoundaryStrategy::JsonObject => {
            buf.put_slice(&checksum);
        }
    }

    buf.freeze()
}

//! Pipeline counters shared between the reader and the frame worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    bytes_in: AtomicU64,
    chunks: AtomicU64,
    frames_detected: AtomicU64,
    frames_rejected: AtomicU64,
    frames_decoded: AtomicU64,
    parser_errors: AtomicU64,
    overflows: AtomicU64,
    chunks_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes read from the transport
    pub bytes_in: u64,
    /// Chunks read from the transport
    pub chunks: u64,
    /// Raw frames found by the detector
    pub frames_detected: u64,
    /// Frames dropped on checksum mismatch
    pub frames_rejected: u64,
    /// Frames decoded and published
    pub frames_decoded: u64,
    /// Frames that failed to decode
    pub parser_errors: u64,
    /// Buffer overflows
    pub overflows: u64,
    /// Chunks dropped by the worker queue
    pub chunks_dropped: u64,
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_chunk(&self, len: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_detected(&self) {
        self.frames_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_parser_error(&self) {
        self.parser_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Count dropped chunks; returns the new total
    pub(crate) fn record_dropped(&self, n: u64) -> u64 {
        self.chunks_dropped.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            frames_detected: self.frames_detected.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            parser_errors: self.parser_errors.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
        }
    }
}

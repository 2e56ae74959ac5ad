//! Frame detector state machine.
//!
//! Scans the accumulation buffer with the configured [`BoundaryStrategy`]
//! and extracts every complete frame, leaving trailing partial bytes in
//! place for the next read. The detector is re-entrant across reads:
//!
//! - `SeekStart`: locate the start delimiter (or the first `{` for JSON),
//!   discarding noise before it
//! - `SeekEnd`: locate the end condition, resuming from where the previous
//!   read stopped
//! - `Emit`: end found, waiting for the checksum trailer bytes, then the
//!   frame is copied out and consumed
//!
//! # Example
//!
//! ```
//! use ingest_wire::{BoundaryStrategy, ChecksumAlgorithm, Delimiter, FrameDetector};
//!
//! let strategy = BoundaryStrategy::StartAndEndDelimiter {
//!     start: Delimiter::from_text("/*").unwrap(),
//!     end: Delimiter::from_text("*/").unwrap(),
//! };
//! let mut detector = FrameDetector::new(strategy, ChecksumAlgorithm::None, 4096).unwrap();
//!
//! let frames = detector.push(b"noise/*AA*/junk/*B").unwrap();
//! assert_eq!(frames.len(), 1);
//! let frames = detector.push(b"B*/").unwrap();
//! assert_eq!(&frames[0].payload[..], b"BB");
//! ```

use crate::buffer::AccumulationBuffer;
use crate::checksum::ChecksumAlgorithm;
use crate::error::WireError;
use crate::frame::RawFrame;
use crate::strategy::{BoundaryStrategy, FramingConfig};
use bytes::Bytes;
use tracing::{trace, warn};

/// Brace/string tracking for JSON object detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct JsonCursor {
    depth: u32,
    in_string: bool,
    escaped: bool,
}

/// Byte offsets of a located frame, relative to the buffer start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    payload_end: usize,
    trailer_start: usize,
    trailer_end: usize,
    consume: usize,
}

/// Scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the start of a frame
    SeekStart,
    /// Start found (or not required), looking for the end condition
    SeekEnd { scan: usize, json: JsonCursor },
    /// End found, waiting for the whole trailer to arrive
    Emit(Boundary),
}

/// Outcome of a single scanning step
enum Step {
    Frame(RawFrame),
    Skipped,
    Oversized,
    NeedMore,
}

/// Detector counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    /// Frames emitted
    pub frames: u64,
    /// Zero-length frames skipped
    pub empty_frames: u64,
    /// Noise bytes discarded before a start condition
    pub noise_bytes: u64,
    /// Buffer overflows
    pub overflows: u64,
}

/// Extracts raw frames from a fragmented byte stream
#[derive(Debug)]
pub struct FrameDetector {
    strategy: BoundaryStrategy,
    trailer_len: usize,
    text_lines: bool,
    buffer: AccumulationBuffer,
    state: ScanState,
    stats: DetectorStats,
}

impl FrameDetector {
    /// Create a detector for the given strategy and checksum trailer
    pub fn new(
        strategy: BoundaryStrategy,
        checksum: ChecksumAlgorithm,
        max_buffer_size: usize,
    ) -> Result<Self, WireError> {
        let buffer = AccumulationBuffer::new(max_buffer_size)?;
        let state = initial_state(&strategy);
        Ok(Self {
            strategy,
            trailer_len: checksum.len(),
            text_lines: true,
            buffer,
            state,
            stats: DetectorStats::default(),
        })
    }

    /// Create a detector from the framing configuration
    pub fn from_config(config: &FramingConfig) -> Result<Self, WireError> {
        let strategy = BoundaryStrategy::from_config(config)?;
        let mut detector = Self::new(strategy, config.checksum, config.max_buffer_size)?;
        detector.text_lines = config.text_lines;
        Ok(detector)
    }

    /// Split `NoDelimiters` input on line terminators instead of reads
    pub fn with_text_lines(mut self, text_lines: bool) -> Self {
        self.text_lines = text_lines;
        self
    }

    /// Active strategy
    pub fn strategy(&self) -> &BoundaryStrategy {
        &self.strategy
    }

    /// Detector counters
    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Number of bytes retained for the next read
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Replace strategy and trailer length between frames
    ///
    /// Buffered bytes are kept and rescanned from the start under the new
    /// rules on the next call.
    pub fn reconfigure(&mut self, config: &FramingConfig) -> Result<(), WireError> {
        let strategy = BoundaryStrategy::from_config(config)?;
        if config.max_buffer_size != self.buffer.max_size() {
            let mut buffer = AccumulationBuffer::new(config.max_buffer_size)?;
            buffer.append(self.buffer.peek());
            self.buffer = buffer;
        }
        self.state = initial_state(&strategy);
        self.strategy = strategy;
        self.trailer_len = config.checksum.len();
        self.text_lines = config.text_lines;
        Ok(())
    }

    /// Append a chunk and emit every complete frame, in stream order
    ///
    /// Frames are handed to `on_frame` as soon as they are found. When the
    /// buffer reaches its limit without a boundary, it is cleared and
    /// [`WireError::BufferOverflow`] is returned after all complete frames
    /// have been emitted.
    ///
    /// A frame spanning more than the limit (delimiters and trailer
    /// included) is discarded and reported the same way, even when it
    /// arrives complete in a single chunk.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<usize, WireError>
    where
        F: FnMut(RawFrame),
    {
        self.buffer.append(chunk);
        let limit = self.buffer.max_size();

        let mut emitted = 0;
        let mut oversized = 0;
        loop {
            match self.step() {
                Step::Frame(frame) => {
                    emitted += 1;
                    self.stats.frames += 1;
                    on_frame(frame);
                }
                Step::Skipped => {
                    self.stats.empty_frames += 1;
                }
                Step::Oversized => oversized += 1,
                Step::NeedMore => break,
            }
        }

        // Binary chunk framing never carries bytes over to the next read
        if matches!(self.strategy, BoundaryStrategy::NoDelimiters) && !self.text_lines {
            self.buffer.clear();
            self.state = initial_state(&self.strategy);
        }

        let overflowed = if self.buffer.is_full() {
            warn!("No frame boundary within {} bytes, buffer reset", limit);
            self.buffer.clear();
            self.state = initial_state(&self.strategy);
            true
        } else {
            if oversized > 0 {
                warn!("Discarded {} frame(s) longer than {} bytes", oversized, limit);
            }
            oversized > 0
        };

        if overflowed {
            self.stats.overflows += 1;
            return Err(WireError::BufferOverflow { limit });
        }
        Ok(emitted)
    }

    /// Append a chunk and collect the complete frames
    ///
    /// On overflow the frames found in the same call are dropped; use
    /// [`FrameDetector::feed`] to keep them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, WireError> {
        let mut frames = Vec::new();
        self.feed(chunk, |frame| frames.push(frame))?;
        Ok(frames)
    }

    /// Rescan the buffered bytes without appending anything
    pub fn detect<F>(&mut self, on_frame: F) -> Result<usize, WireError>
    where
        F: FnMut(RawFrame),
    {
        self.feed(&[], on_frame)
    }

    /// Flush the final frame when the stream terminates
    ///
    /// Only `StartDelimiterOnly` and line-split `NoDelimiters` treat the end
    /// of the stream as a frame boundary; anything else still buffered is a
    /// partial frame and is discarded.
    pub fn finish<F>(&mut self, mut on_frame: F) -> usize
    where
        F: FnMut(RawFrame),
    {
        let len = self.buffer.len();
        let flush = match (&self.strategy, self.state) {
            (BoundaryStrategy::StartDelimiterOnly { .. }, ScanState::SeekEnd { .. }) => true,
            (BoundaryStrategy::NoDelimiters, _) => true,
            _ => false,
        };

        let mut emitted = 0;
        if flush && len > 0 {
            let boundary = self.segment_boundary(len, len);
            if let Step::Frame(frame) = self.take(boundary) {
                self.stats.frames += 1;
                emitted = 1;
                on_frame(frame);
            }
        }

        self.reset();
        emitted
    }

    /// Discard buffered bytes and restart scanning
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = initial_state(&self.strategy);
    }

    fn step(&mut self) -> Step {
        loop {
            match self.state {
                ScanState::SeekStart => {
                    if !self.seek_start() {
                        return Step::NeedMore;
                    }
                }
                ScanState::SeekEnd { scan, json } => match self.seek_end(scan, json) {
                    Some(boundary) => self.state = ScanState::Emit(boundary),
                    None => return Step::NeedMore,
                },
                ScanState::Emit(boundary) => {
                    if self.buffer.len() < boundary.consume {
                        return Step::NeedMore;
                    }
                    return self.take(boundary);
                }
            }
        }
    }

    /// Copy out the located frame and consume it from the buffer
    fn take(&mut self, boundary: Boundary) -> Step {
        if boundary.consume > self.buffer.max_size() {
            self.buffer.consume(boundary.consume);
            self.state = initial_state(&self.strategy);
            return Step::Oversized;
        }

        let data = self.buffer.peek();
        let payload = Bytes::copy_from_slice(&data[..boundary.payload_end]);
        let checksum = Bytes::copy_from_slice(&data[boundary.trailer_start..boundary.trailer_end]);
        self.buffer.consume(boundary.consume);
        self.state = initial_state(&self.strategy);

        if payload.is_empty() {
            trace!("Skipping empty frame");
            return Step::Skipped;
        }
        Step::Frame(RawFrame::new(payload, checksum))
    }

    /// Find the start condition; returns false when more data is needed
    fn seek_start(&mut self) -> bool {
        let data = self.buffer.peek();
        let (found, keep) = match &self.strategy {
            BoundaryStrategy::JsonObject => (
                data.iter().position(|&b| b == b'{').map(|pos| (pos, 0)),
                0,
            ),
            strategy => match strategy.start_delimiter() {
                Some(start) => (
                    start.find_in(data, 0).map(|pos| (pos, start.len())),
                    start.len() - 1,
                ),
                None => (Some((0, 0)), 0),
            },
        };

        match found {
            Some((noise, strip)) => {
                self.stats.noise_bytes += noise as u64;
                self.buffer.consume(noise + strip);
                self.state = ScanState::SeekEnd {
                    scan: 0,
                    json: JsonCursor::default(),
                };
                true
            }
            None => {
                // Keep a possible partial start delimiter at the tail
                let discard = data.len().saturating_sub(keep);
                self.stats.noise_bytes += discard as u64;
                self.buffer.consume(discard);
                false
            }
        }
    }

    /// Find the end condition, resuming at `scan`
    fn seek_end(&mut self, scan: usize, mut json: JsonCursor) -> Option<Boundary> {
        let data = self.buffer.peek();
        let len = data.len();
        let n = self.trailer_len;

        match &self.strategy {
            BoundaryStrategy::EndDelimiterOnly { end }
            | BoundaryStrategy::StartAndEndDelimiter { end, .. } => {
                match end.find_in(data, scan) {
                    Some(pos) => {
                        let trailer_start = pos + end.len();
                        Some(Boundary {
                            payload_end: pos,
                            trailer_start,
                            trailer_end: trailer_start + n,
                            consume: trailer_start + n,
                        })
                    }
                    None => {
                        let resume = len.saturating_sub(end.len() - 1);
                        self.state = ScanState::SeekEnd { scan: resume, json };
                        None
                    }
                }
            }
            BoundaryStrategy::StartDelimiterOnly { start } => match start.find_in(data, scan) {
                Some(pos) => Some(self.segment_boundary(pos, pos)),
                None => {
                    let resume = len.saturating_sub(start.len() - 1);
                    self.state = ScanState::SeekEnd { scan: resume, json };
                    None
                }
            },
            BoundaryStrategy::NoDelimiters if self.text_lines => {
                let from = scan.min(len);
                match data[from..].iter().position(|&b| b == b'\n' || b == b'\r') {
                    Some(offset) => {
                        let pos = from + offset;
                        Some(self.segment_boundary(pos, pos + 1))
                    }
                    None => {
                        self.state = ScanState::SeekEnd { scan: len, json };
                        None
                    }
                }
            }
            BoundaryStrategy::NoDelimiters => {
                if len == 0 {
                    return None;
                }
                Some(self.segment_boundary(len, len))
            }
            BoundaryStrategy::JsonObject => {
                let from = scan.min(len);
                for (offset, &byte) in data[from..].iter().enumerate() {
                    if json.in_string {
                        if json.escaped {
                            json.escaped = false;
                        } else if byte == b'\\' {
                            json.escaped = true;
                        } else if byte == b'"' {
                            json.in_string = false;
                        }
                        continue;
                    }

                    match byte {
                        b'"' => json.in_string = true,
                        b'{' => json.depth += 1,
                        b'}' if json.depth > 0 => {
                            json.depth -= 1;
                            if json.depth == 0 {
                                let close = from + offset + 1;
                                return Some(Boundary {
                                    payload_end: close,
                                    trailer_start: close,
                                    trailer_end: close + n,
                                    consume: close + n,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                self.state = ScanState::SeekEnd { scan: len, json };
                None
            }
        }
    }

    /// Boundary for a segment ending at `end` whose trailer is its last bytes
    fn segment_boundary(&self, end: usize, consume: usize) -> Boundary {
        let payload_end = end.saturating_sub(self.trailer_len);
        Boundary {
            payload_end,
            trailer_start: payload_end,
            trailer_end: end,
            consume,
        }
    }
}

fn initial_state(strategy: &BoundaryStrategy) -> ScanState {
    match strategy {
        BoundaryStrategy::StartDelimiterOnly { .. }
        | BoundaryStrategy::StartAndEndDelimiter { .. }
        | BoundaryStrategy::JsonObject => ScanState::SeekStart,
        BoundaryStrategy::EndDelimiterOnly { .. } | BoundaryStrategy::NoDelimiters => {
            ScanState::SeekEnd {
                scan: 0,
                json: JsonCursor::default(),
            }
        }
    }
}

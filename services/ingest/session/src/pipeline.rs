//! Pipeline context: detector, validator and decoder for one session.
//!
//! A [`Pipeline`] owns the accumulation buffer and the active configuration.
//! Chunks are processed strictly in order and every frame is published as
//! soon as it is decoded. Configuration changes requested through
//! [`PipelineControl`] are applied at the next chunk boundary, never in the
//! middle of a scan.

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::report::Report;
use crate::stats::PipelineStats;
use ingest_decode::{Decoder, ErrorLatch, LoadedDecoder};
use ingest_wire::{
    BoundaryStrategy, ChecksumValidator, FrameDetector, FramingConfig, RawFrame, Validation,
    WireError, HARD_MAX_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Execution options for a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Run detection and decoding on a dedicated worker thread
    pub threaded: bool,
    /// Worker queue capacity in chunks
    pub queue_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threaded: false,
            queue_capacity: crate::queue::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Changes waiting for the next chunk boundary
#[derive(Debug, Default)]
struct Pending {
    framing: Option<FramingConfig>,
    decoder: Option<LoadedDecoder>,
}

/// Handle for changing a running pipeline's configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineControl {
    pending: Arc<Mutex<Pending>>,
}

impl PipelineControl {
    /// Switch framing; validated now, applied at the next chunk boundary
    pub fn reconfigure(&self, framing: FramingConfig) -> Result<(), WireError> {
        BoundaryStrategy::from_config(&framing)?;
        if framing.max_buffer_size == 0 || framing.max_buffer_size > HARD_MAX_BUFFER_SIZE {
            return Err(WireError::BufferLimit(framing.max_buffer_size));
        }
        self.lock().framing = Some(framing);
        Ok(())
    }

    /// Replace the decoder at the next chunk boundary
    pub fn replace_decoder(&self, decoder: LoadedDecoder) {
        self.lock().decoder = Some(decoder);
    }

    fn take(&self) -> Pending {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Validation, decoding and publication of extracted frames
#[derive(Debug)]
struct FrameStage {
    validator: ChecksumValidator,
    decoder: Box<dyn Decoder>,
    latch: ErrorLatch,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<PipelineStats>,
    seq: u64,
}

impl FrameStage {
    fn handle(&mut self, raw: RawFrame) {
        self.stats.record_detected();

        if let Validation::Rejected { .. } = self.validator.validate(&raw) {
            self.stats.record_rejected();
            let report = Report::ChecksumMismatch {
                algorithm: self.validator.algorithm(),
                rejected_total: self.validator.rejected(),
            };
            warn!("{}", report);
            self.dispatcher.report(&report);
            return;
        }

        match self.decoder.decode(&raw.payload) {
            Ok(mut frame) => {
                self.latch.clear();
                self.seq += 1;
                frame.seq = self.seq;
                self.stats.record_decoded();
                self.dispatcher.publish(&frame);
            }
            Err(err) => {
                self.stats.record_parser_error();
                if self.latch.observe(&err) {
                    warn!("Frame skipped: {}", err);
                    self.dispatcher.report(&Report::ParserError {
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn install_decoder(&mut self, loaded: LoadedDecoder) {
        self.decoder = loaded.decoder;
        self.latch.clear();
        if let Some(migration) = loaded.migration {
            self.dispatcher.report(&Report::LegacySignatureMigrated {
                notice: migration.notice,
            });
        }
    }
}

/// One session's ingestion pipeline
#[derive(Debug)]
pub struct Pipeline {
    detector: FrameDetector,
    stage: FrameStage,
    control: PipelineControl,
}

impl Pipeline {
    /// Create a pipeline publishing to `dispatcher`
    ///
    /// A migration notice carried by `decoder` is reported once, here.
    pub fn new(
        framing: &FramingConfig,
        decoder: LoadedDecoder,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, SessionError> {
        let detector = FrameDetector::from_config(framing)?;
        info!(
            "Pipeline ready: {:?} framing, {} checksum, {:?} decoder",
            framing.detection,
            framing.checksum,
            decoder.decoder.mode()
        );

        let mut stage = FrameStage {
            validator: ChecksumValidator::new(framing.checksum),
            decoder: decoder.decoder,
            latch: ErrorLatch::new(),
            dispatcher,
            stats,
            seq: 0,
        };
        if let Some(migration) = decoder.migration {
            stage.dispatcher.report(&Report::LegacySignatureMigrated {
                notice: migration.notice,
            });
        }

        Ok(Self {
            detector,
            stage,
            control: PipelineControl::default(),
        })
    }

    /// Handle for reconfiguring this pipeline while it runs
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    /// Dispatcher receiving this pipeline's output
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.stage.dispatcher.clone()
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stage.stats.clone()
    }

    /// Bytes retained for the next chunk
    pub fn buffered(&self) -> usize {
        self.detector.buffered()
    }

    /// Process one transport chunk
    pub fn process_chunk(&mut self, chunk: &[u8]) {
        self.apply_pending();
        self.stage.stats.record_chunk(chunk.len());
        self.stage.dispatcher.publish_raw(chunk);

        let stage = &mut self.stage;
        if let Err(WireError::BufferOverflow { limit }) =
            self.detector.feed(chunk, |raw| stage.handle(raw))
        {
            stage.stats.record_overflow();
            stage.dispatcher.report(&Report::BufferOverflow { limit });
        }
    }

    /// Flush a frame terminated by end of stream, then clear the buffer
    pub fn finish(&mut self) {
        let stage = &mut self.stage;
        let flushed = self.detector.finish(|raw| stage.handle(raw));
        if flushed > 0 {
            debug!("Flushed {} frame at end of stream", flushed);
        }
    }

    /// Discard buffered bytes without emitting anything
    pub fn reset(&mut self) {
        if self.detector.buffered() > 0 {
            debug!("Discarding {} buffered bytes", self.detector.buffered());
        }
        self.detector.reset();
    }

    fn apply_pending(&mut self) {
        let pending = self.control.take();

        if let Some(framing) = pending.framing {
            match self.detector.reconfigure(&framing) {
                Ok(()) => {
                    self.stage.validator.set_algorithm(framing.checksum);
                    info!(
                        "Framing switched to {:?} with {} checksum",
                        framing.detection, framing.checksum
                    );
                }
                Err(e) => warn!("Framing change rejected: {}", e),
            }
        }

        if let Some(decoder) = pending.decoder {
            info!("Decoder switched to {:?}", decoder.decoder.mode());
            self.stage.install_decoder(decoder);
        }
    }
}

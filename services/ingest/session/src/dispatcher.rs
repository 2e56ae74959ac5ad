//! Ordered delivery of decoded frames to registered sinks.

use crate::report::Report;
use bytes::Bytes;
use ingest_decode::DecodedFrame;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Consumer of pipeline output
///
/// Sinks are called from the pipeline's execution context, one frame at a
/// time and in publication order; they must not block for long.
pub trait FrameSink: Send + Sync + fmt::Debug {
    /// A decoded frame was published
    fn on_frame(&self, frame: &DecodedFrame);

    /// Raw bytes arrived from the transport, before any framing
    fn on_raw(&self, _data: &[u8]) {}

    /// A non-fatal condition was reported
    fn on_report(&self, _report: &Report) {}
}

/// Fans pipeline output out to sinks in registration order
#[derive(Debug)]
pub struct Dispatcher {
    sinks: RwLock<Vec<Arc<dyn FrameSink>>>,
    active: AtomicBool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an active dispatcher with no sinks
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
        }
    }

    /// Register a sink
    pub fn register(&self, sink: Arc<dyn FrameSink>) {
        debug!("Registered sink {:?}", sink);
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sink);
    }

    /// Number of registered sinks
    pub fn sink_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn FrameSink>> {
        self.sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver a decoded frame to every sink
    pub fn publish(&self, frame: &DecodedFrame) {
        if !self.is_active() {
            return;
        }
        for sink in self.snapshot() {
            sink.on_frame(frame);
        }
    }

    /// Deliver raw transport bytes to every sink
    pub fn publish_raw(&self, data: &[u8]) {
        if !self.is_active() {
            return;
        }
        for sink in self.snapshot() {
            sink.on_raw(data);
        }
    }

    /// Deliver a report to every sink
    pub fn report(&self, report: &Report) {
        if !self.is_active() {
            return;
        }
        for sink in self.snapshot() {
            sink.on_report(report);
        }
    }

    /// Stop all further delivery
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Resume delivery after a reconnect
    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Whether output is currently delivered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Pipeline output forwarded over a channel
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Decoded frame
    Frame(DecodedFrame),
    /// Raw transport bytes
    Raw(Bytes),
    /// Non-fatal condition
    Report(Report),
}

/// Sink that forwards output into a tokio channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    raw: bool,
}

impl ChannelSink {
    /// Forward frames and reports
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx, raw: false }
    }

    /// Also forward raw transport bytes
    pub fn with_raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: &DecodedFrame) {
        self.tx.send(PipelineEvent::Frame(frame.clone())).ok();
    }

    fn on_raw(&self, data: &[u8]) {
        if self.raw {
            self.tx
                .send(PipelineEvent::Raw(Bytes::copy_from_slice(data)))
                .ok();
        }
    }

    fn on_report(&self, report: &Report) {
        self.tx.send(PipelineEvent::Report(report.clone())).ok();
    }
}

//! Transports, pipeline context, dispatcher and session loop for ingest.
//!
//! This crate ties the framing layer (`ingest-wire`) and the decoders
//! (`ingest-decode`) to byte-producing devices and delivers decoded frames
//! to registered sinks.
//!
//! ## Features
//!
//! - **Transports**: TCP client, UDP, serial device nodes, stdin and an
//!   in-process channel for external producers
//! - **Pipeline Context**: per-session buffer, detector, validator and
//!   decoder with reconfiguration at chunk boundaries
//! - **Dispatcher**: ordered fan-out of frames, raw bytes and reports
//! - **Threaded Mode**: optional `frame-worker` thread behind a bounded,
//!   drop-oldest queue
//! - **Statistics**: lock-free counters for bytes, frames and errors
//!
//! ## Example
//!
//! ```rust,no_run
//! use ingest_decode::{build_decoder, DecodingConfig};
//! use ingest_session::{
//!     channel_transport, ChannelSink, Dispatcher, Pipeline, PipelineOptions, PipelineStats,
//!     Session,
//! };
//! use ingest_wire::FramingConfig;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (frame_tx, mut frames) = mpsc::unbounded_channel();
//! let dispatcher = Arc::new(Dispatcher::new());
//! dispatcher.register(Arc::new(ChannelSink::new(frame_tx)));
//!
//! let decoder = build_decoder(&DecodingConfig::default(), None, None)?;
//! let pipeline = Pipeline::new(
//!     &FramingConfig::default(),
//!     decoder,
//!     dispatcher,
//!     Arc::new(PipelineStats::new()),
//! )?;
//!
//! let (feed, transport) = channel_transport("demo", 16);
//! let (event_tx, _events) = mpsc::channel(16);
//! let handle = Session::spawn(Box::new(transport), pipeline, &PipelineOptions::default(), event_tx);
//!
//! feed.send(bytes::Bytes::from_static(b"1,2,3*/")).await?;
//! if let Some(event) = frames.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! handle.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod session;
pub mod stats;
pub mod transport;

// Re-export main types
pub use dispatcher::{ChannelSink, Dispatcher, FrameSink, PipelineEvent};
pub use error::{SessionError, TransportError};
pub use pipeline::{Pipeline, PipelineControl, PipelineOptions};
pub use queue::{ChunkQueue, QueueItem, DEFAULT_QUEUE_CAPACITY};
pub use report::Report;
pub use session::{Session, SessionEnd, SessionEvent, SessionHandle, SessionOutcome};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{
    channel_transport, open_transport, ChannelTransport, SerialTransport, StdinTransport,
    TcpTransport, Transport, TransportConfig, UdpTransport, READ_CHUNK_SIZE,
};

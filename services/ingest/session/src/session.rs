//! Session loop: transport reads driving a pipeline.
//!
//! A session reads chunks from one transport and hands them to its
//! [`Pipeline`], either inline on the reading task or through a bounded
//! queue to a dedicated `frame-worker` thread. In both modes chunks are
//! processed in arrival order and frames are published in stream order.
//!
//! When the session ends the pipeline is handed back in a
//! [`SessionOutcome`], so a caller can reconnect and keep the same
//! configuration, counters and sinks.

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::pipeline::{Pipeline, PipelineControl, PipelineOptions};
use crate::queue::{ChunkQueue, QueueItem};
use crate::report::Report;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Reading started
    Connected {
        /// Transport name
        transport: String,
    },
    /// Session stopped by request or end of stream
    Disconnected,
    /// Transport read failed
    TransportFailed {
        /// Error description
        message: String,
    },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped through [`SessionHandle::disconnect`]
    Disconnected,
    /// The transport reported end of stream
    EndOfStream,
    /// The transport failed
    TransportFailed(String),
}

/// A finished session and its pipeline
#[derive(Debug)]
pub struct SessionOutcome {
    /// Pipeline, ready to be reused on a new transport
    pub pipeline: Pipeline,
    /// Why the session ended
    pub end: SessionEnd,
}

/// Handle to a running session
#[derive(Debug)]
pub struct SessionHandle {
    task: Option<JoinHandle<Result<SessionOutcome, SessionError>>>,
    stop: Option<oneshot::Sender<()>>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<PipelineStats>,
    control: PipelineControl,
}

impl SessionHandle {
    /// Stop reading and wait for the session to wind down
    ///
    /// Delivery to sinks stops before this returns; frames still buffered
    /// are discarded.
    pub async fn disconnect(mut self) -> Result<SessionOutcome, SessionError> {
        info!("Disconnecting session");
        self.dispatcher.deactivate();
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        self.wait().await
    }

    /// Wait for the session to end on its own
    ///
    /// Cancel safe: dropping the returned future leaves the session running.
    pub async fn wait(&mut self) -> Result<SessionOutcome, SessionError> {
        let task = self
            .task
            .as_mut()
            .ok_or_else(|| SessionError::Join("session already joined".to_string()))?;
        let result = task.await;
        self.task = None;
        result.map_err(|e| SessionError::Join(e.to_string()))?
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Reconfiguration handle for the running pipeline
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    /// Whether the session task has ended
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

/// Session entry points
pub struct Session;

impl Session {
    /// Start reading `transport` into `pipeline`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Box<dyn Transport>,
        pipeline: Pipeline,
        options: &PipelineOptions,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let dispatcher = pipeline.dispatcher();
        let stats = pipeline.stats();
        let control = pipeline.control();

        let task = if options.threaded {
            let capacity = options.queue_capacity;
            tokio::spawn(run_threaded(transport, pipeline, capacity, stop_rx, events))
        } else {
            tokio::spawn(run_inline(transport, pipeline, stop_rx, events))
        };

        SessionHandle {
            task: Some(task),
            stop: Some(stop_tx),
            dispatcher,
            stats,
            control,
        }
    }
}

/// Read outcome shared by both execution modes
enum Read {
    Chunk(bytes::Bytes),
    End(SessionEnd),
}

async fn next_read(
    transport: &mut dyn Transport,
    stop: &mut oneshot::Receiver<()>,
) -> Read {
    tokio::select! {
        biased;

        _ = stop => Read::End(SessionEnd::Disconnected),

        result = transport.read_chunk() => match result {
            Ok(Some(chunk)) => Read::Chunk(chunk),
            Ok(None) => Read::End(SessionEnd::EndOfStream),
            Err(e) => Read::End(SessionEnd::TransportFailed(e.to_string())),
        },
    }
}

async fn announce_end(
    end: &SessionEnd,
    dispatcher: &Dispatcher,
    events: &mpsc::Sender<SessionEvent>,
) {
    match end {
        SessionEnd::Disconnected | SessionEnd::EndOfStream => {
            info!("Session ended: {:?}", end);
            events.send(SessionEvent::Disconnected).await.ok();
        }
        SessionEnd::TransportFailed(message) => {
            error!("Transport failed: {}", message);
            dispatcher.report(&Report::TransportFailure {
                message: message.clone(),
            });
            events
                .send(SessionEvent::TransportFailed {
                    message: message.clone(),
                })
                .await
                .ok();
        }
    }
}

async fn run_inline(
    mut transport: Box<dyn Transport>,
    mut pipeline: Pipeline,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<SessionOutcome, SessionError> {
    let name = transport.name();
    debug!("Inline session started on {}", name);
    events
        .send(SessionEvent::Connected { transport: name })
        .await
        .ok();

    let end = loop {
        match next_read(transport.as_mut(), &mut stop).await {
            Read::Chunk(chunk) => pipeline.process_chunk(&chunk),
            Read::End(end) => break end,
        }
    };

    match end {
        SessionEnd::EndOfStream => pipeline.finish(),
        _ => pipeline.reset(),
    }
    announce_end(&end, &pipeline.dispatcher(), &events).await;
    Ok(SessionOutcome { pipeline, end })
}

/// Hand an item to the worker, reporting chunks evicted to make room
fn enqueue(queue: &ChunkQueue, item: QueueItem, stats: &PipelineStats, dispatcher: &Dispatcher) {
    let dropped = queue.push(item);
    if dropped > 0 {
        let total = stats.record_dropped(dropped as u64);
        warn!("Frame worker falling behind, {} chunks dropped", total);
        dispatcher.report(&Report::QueueOverflow {
            dropped_total: total,
        });
    }
}

async fn run_threaded(
    mut transport: Box<dyn Transport>,
    pipeline: Pipeline,
    capacity: usize,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<SessionOutcome, SessionError> {
    let dispatcher = pipeline.dispatcher();
    let stats = pipeline.stats();
    let queue = Arc::new(ChunkQueue::new(capacity));

    let worker_queue = queue.clone();
    let worker = std::thread::Builder::new()
        .name("frame-worker".to_string())
        .spawn(move || {
            let mut pipeline = pipeline;
            while let Some(item) = worker_queue.pop() {
                match item {
                    QueueItem::Chunk(chunk) => pipeline.process_chunk(&chunk),
                    QueueItem::EndOfStream => {
                        pipeline.finish();
                        break;
                    }
                    QueueItem::Stop => break,
                }
            }
            pipeline
        })
        .map_err(|e| SessionError::Worker(e.to_string()))?;

    let name = transport.name();
    debug!("Threaded session started on {} (queue {})", name, capacity);
    events
        .send(SessionEvent::Connected { transport: name })
        .await
        .ok();

    let end = loop {
        match next_read(transport.as_mut(), &mut stop).await {
            Read::Chunk(chunk) => enqueue(&queue, QueueItem::Chunk(chunk), &stats, &dispatcher),
            Read::End(end) => break end,
        }
    };

    match end {
        SessionEnd::EndOfStream => enqueue(&queue, QueueItem::EndOfStream, &stats, &dispatcher),
        SessionEnd::TransportFailed(_) => enqueue(&queue, QueueItem::Stop, &stats, &dispatcher),
        SessionEnd::Disconnected => queue.close(),
    }

    let joined = tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| SessionError::Join(e.to_string()))?;
    let mut pipeline =
        joined.map_err(|_| SessionError::Worker("frame worker panicked".to_string()))?;
    pipeline.reset();

    announce_end(&end, &dispatcher, &events).await;
    Ok(SessionOutcome { pipeline, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ChannelSink, PipelineEvent};
    use crate::error::TransportError;
    use crate::transport::channel_transport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use ingest_decode::{
        build_decoder, Dataset, DecodeError, DecodedFrame, Decoder, DecoderMode, DecodingConfig,
        LoadedDecoder, Value,
    };
    use ingest_wire::{FrameDetection, FramingConfig};
    use std::collections::VecDeque;
    use std::time::Duration;

    fn pipeline_with(decoder: LoadedDecoder) -> (Pipeline, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register(Arc::new(ChannelSink::new(tx)));
        let framing = FramingConfig {
            detection: FrameDetection::EndDelimiterOnly,
            end_delimiter: "\\n".to_string(),
            ..FramingConfig::default()
        };
        let pipeline =
            Pipeline::new(&framing, decoder, dispatcher, Arc::new(PipelineStats::new())).unwrap();
        (pipeline, rx)
    }

    fn pipeline() -> (Pipeline, mpsc::UnboundedReceiver<PipelineEvent>) {
        pipeline_with(build_decoder(&DecodingConfig::default(), None, None).unwrap())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Yields one chunk per read, then fails
    #[derive(Debug)]
    struct FailingTransport {
        chunks: VecDeque<Bytes>,
    }

    #[async_trait]
    impl Transport for FailingTransport {
        async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None => Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "link lost",
                ))),
            }
        }

        fn name(&self) -> String {
            "failing://test".to_string()
        }
    }

    /// Blocks in `decode` until released, announcing each call
    #[derive(Debug)]
    struct GatedDecoder {
        entered: mpsc::UnboundedSender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl Decoder for GatedDecoder {
        fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
            self.entered.send(()).ok();
            self.release.recv().ok();
            let value = Value::Text(String::from_utf8_lossy(payload).into_owned());
            Ok(DecodedFrame::new("gated", vec![Dataset::field(1, value)]))
        }

        fn mode(&self) -> DecoderMode {
            DecoderMode::Script
        }
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<Value> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("sink channel closed");
            if let PipelineEvent::Frame(frame) = event {
                return frame.values().cloned().collect();
            }
        }
    }

    fn options(threaded: bool) -> PipelineOptions {
        PipelineOptions {
            threaded,
            ..PipelineOptions::default()
        }
    }

    async fn run_to_end(threaded: bool) {
        let (pipeline, mut rx) = pipeline();
        let (feed, transport) = channel_transport("test", 16);
        let (event_tx, mut event_rx) = mpsc::channel(16);

        let mut handle = Session::spawn(Box::new(transport), pipeline, &options(threaded), event_tx);
        assert_eq!(
            event_rx.recv().await,
            Some(SessionEvent::Connected {
                transport: "channel://test".to_string()
            })
        );

        for chunk in ["1,2\n3", ",4\n", "5\n6"] {
            feed.send(Bytes::from(chunk)).await.unwrap();
        }
        drop(feed);

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.end, SessionEnd::EndOfStream);
        assert_eq!(event_rx.recv().await, Some(SessionEvent::Disconnected));

        assert_eq!(next_frame(&mut rx).await, vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(next_frame(&mut rx).await, vec![Value::Number(3.0), Value::Number(4.0)]);
        assert_eq!(next_frame(&mut rx).await, vec![Value::Number(5.0)]);
        assert!(rx.try_recv().is_err());

        let stats = handle.stats();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.frames_decoded, 3);
        assert_eq!(outcome.pipeline.buffered(), 0);
    }

    #[tokio::test]
    async fn test_inline_session_in_order() {
        run_to_end(false).await;
    }

    #[tokio::test]
    async fn test_threaded_session_in_order() {
        run_to_end(true).await;
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        for threaded in [false, true] {
            let (pipeline, mut rx) = pipeline();
            let (feed, transport) = channel_transport("test", 16);
            let (event_tx, _event_rx) = mpsc::channel(16);

            let handle = Session::spawn(Box::new(transport), pipeline, &options(threaded), event_tx);
            feed.send(Bytes::from_static(b"1\n2")).await.unwrap();
            assert_eq!(next_frame(&mut rx).await, vec![Value::Number(1.0)]);

            let outcome = handle.disconnect().await.unwrap();
            assert_eq!(outcome.end, SessionEnd::Disconnected);
            assert_eq!(outcome.pipeline.buffered(), 0);

            feed.send(Bytes::from_static(b"\n3\n")).await.ok();
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_reconnect_reuses_pipeline() {
        let (pipeline, mut rx) = pipeline();
        let (feed, transport) = channel_transport("first", 4);
        let (event_tx, _event_rx) = mpsc::channel(16);

        let handle = Session::spawn(Box::new(transport), pipeline, &options(false), event_tx.clone());
        feed.send(Bytes::from_static(b"1\n")).await.unwrap();
        assert_eq!(next_frame(&mut rx).await, vec![Value::Number(1.0)]);
        let outcome = handle.disconnect().await.unwrap();

        let pipeline = outcome.pipeline;
        pipeline.dispatcher().activate();
        let (feed, transport) = channel_transport("second", 4);
        let mut handle = Session::spawn(Box::new(transport), pipeline, &options(false), event_tx);
        feed.send(Bytes::from_static(b"2\n")).await.unwrap();
        assert_eq!(next_frame(&mut rx).await, vec![Value::Number(2.0)]);
        drop(feed);

        handle.wait().await.unwrap();
        assert_eq!(handle.stats().frames_decoded, 2);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_wait_twice_fails() {
        let (pipeline, _rx) = pipeline();
        let (feed, transport) = channel_transport("test", 1);
        let (event_tx, _event_rx) = mpsc::channel(16);
        drop(feed);

        let mut handle = Session::spawn(Box::new(transport), pipeline, &options(false), event_tx);
        assert!(handle.wait().await.is_ok());
        assert!(matches!(handle.wait().await, Err(SessionError::Join(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_hands_back_pipeline() {
        for threaded in [false, true] {
            let (pipeline, mut rx) = pipeline();
            let transport = FailingTransport {
                chunks: VecDeque::from([Bytes::from_static(b"1\n2")]),
            };
            let (event_tx, mut event_rx) = mpsc::channel(16);

            let mut handle =
                Session::spawn(Box::new(transport), pipeline, &options(threaded), event_tx);
            let outcome = handle.wait().await.unwrap();

            let message = match &outcome.end {
                SessionEnd::TransportFailed(message) => message.clone(),
                other => panic!("unexpected end {:?}", other),
            };
            assert!(message.contains("link lost"));
            assert_eq!(outcome.pipeline.buffered(), 0);

            assert_eq!(
                event_rx.recv().await,
                Some(SessionEvent::Connected {
                    transport: "failing://test".to_string()
                })
            );
            assert_eq!(
                event_rx.recv().await,
                Some(SessionEvent::TransportFailed {
                    message: message.clone()
                })
            );

            // Bytes read before the failure are still processed
            assert_eq!(next_frame(&mut rx).await, vec![Value::Number(1.0)]);
            assert_eq!(
                drain(&mut rx),
                vec![PipelineEvent::Report(Report::TransportFailure { message })]
            );
            assert_eq!(handle.stats().chunks, 1);
        }
    }

    #[tokio::test]
    async fn test_threaded_overflow_counts_every_chunk() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let (pipeline, mut rx) = pipeline_with(LoadedDecoder {
            decoder: Box::new(GatedDecoder {
                entered: entered_tx,
                release: release_rx,
            }),
            migration: None,
        });
        let (feed, transport) = channel_transport("test", 16);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let small_queue = PipelineOptions {
            threaded: true,
            queue_capacity: 1,
        };

        let mut handle = Session::spawn(Box::new(transport), pipeline, &small_queue, event_tx);
        feed.send(Bytes::from_static(b"1\n")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), entered_rx.recv())
            .await
            .expect("worker never started decoding");

        // The worker is stuck on the first frame; the queue holds one chunk
        for chunk in ["2\n", "3\n", "4\n"] {
            feed.send(Bytes::from(chunk)).await.unwrap();
        }
        let mut overflows = Vec::new();
        while overflows.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for overflow report")
                .expect("sink channel closed");
            if let PipelineEvent::Report(Report::QueueOverflow { dropped_total }) = event {
                overflows.push(dropped_total);
            }
        }
        assert_eq!(overflows, vec![1, 2]);

        // End of stream arrives while the queue is still full
        drop(feed);
        drop(release_tx);
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.end, SessionEnd::EndOfStream);

        let stats = handle.stats();
        assert_eq!(stats.chunks_dropped, 2);
        assert_eq!(stats.chunks + stats.chunks_dropped, 4);
        assert_eq!(stats.frames_decoded, 2);

        let frames: Vec<Vec<Value>> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Frame(f) => Some(f.values().cloned().collect()),
                _ => None,
            })
            .collect();
        assert_eq!(
            frames,
            vec![
                vec![Value::Text("1".to_string())],
                vec![Value::Text("4".to_string())],
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_interrupts_runaway_script() {
        let decoding = DecodingConfig {
            mode: DecoderMode::Script,
            script_time_limit_ms: 100,
            ..DecodingConfig::default()
        };
        let source = "function parse(f) while true do end end";

        for threaded in [false, true] {
            let (pipeline, _rx) = pipeline_with(build_decoder(&decoding, None, Some(source)).unwrap());
            let (feed, transport) = channel_transport("test", 16);
            let (event_tx, _event_rx) = mpsc::channel(16);

            let handle = Session::spawn(Box::new(transport), pipeline, &options(threaded), event_tx);
            feed.send(Bytes::from_static(b"x\n")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;

            let outcome = tokio::time::timeout(Duration::from_secs(3), handle.disconnect())
                .await
                .expect("disconnect did not complete")
                .unwrap();
            assert_eq!(outcome.end, SessionEnd::Disconnected);
            assert!(outcome.pipeline.stats().snapshot().parser_errors <= 1);
        }
    }
}

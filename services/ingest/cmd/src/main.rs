//! Byte-stream ingestion binary.
//!
//! Reads telemetry from a TCP, UDP, serial or stdin transport, extracts and
//! validates frames, decodes them through a project schema or parser script
//! and prints or exports the resulting datasets.

use anyhow::Context;
use clap::Parser;
use ingest_decode::{
    build_decoder, DecoderMode, InputEncoding, LoadedDecoder, Migration, ProjectSchema,
};
use ingest_session::{
    open_transport, Dispatcher, Pipeline, PipelineStats, Session, SessionEnd, SessionEvent,
    TransportConfig,
};
use ingest_wire::{ChecksumAlgorithm, FrameDetection};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod logging;
mod config;
mod sinks;

use config::IngestConfig;
use logging::IngestLogFormatter;
use sinks::{ConsoleSink, CsvSink};

/// Parse a snake_case configuration name into its enum
fn parse_name<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_yaml::from_str(value).map_err(|_| format!("unknown value {:?}", value))
}

/// Telemetry ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "ingest", version, about = "Frame detection and decoding for device byte streams")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "ingest.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Delay before reconnecting after a transport failure; 0s disables
    #[arg(long, default_value = "2s")]
    reconnect_delay: humantime::Duration,

    // Transport overrides
    /// Connect to a TCP server, e.g. 192.168.4.1:23
    #[arg(long, conflicts_with_all = ["udp", "serial", "stdin"])]
    tcp: Option<String>,

    /// Bind a UDP socket, e.g. 0.0.0.0:9000
    #[arg(long, conflicts_with_all = ["serial", "stdin"])]
    udp: Option<String>,

    /// Read from a serial device node, e.g. /dev/ttyUSB0
    #[arg(long, conflicts_with = "stdin")]
    serial: Option<PathBuf>,

    /// Read from standard input
    #[arg(long)]
    stdin: bool,

    // Framing overrides
    /// Frame detection: end_delimiter_only, start_delimiter_only,
    /// start_and_end_delimiter, no_delimiters, json_object
    #[arg(long, value_parser = parse_name::<FrameDetection>)]
    detection: Option<FrameDetection>,

    /// Start delimiter (escapes such as \n are honoured)
    #[arg(long)]
    start_delimiter: Option<String>,

    /// End delimiter (escapes such as \n are honoured)
    #[arg(long)]
    end_delimiter: Option<String>,

    /// Checksum trailer algorithm, e.g. crc16-modbus
    #[arg(long)]
    checksum: Option<ChecksumAlgorithm>,

    /// Maximum buffered bytes without a frame boundary
    #[arg(long)]
    max_buffer: Option<usize>,

    // Decoding overrides
    /// Decoder mode: schema, script, quick_plot, device_json
    #[arg(long, value_parser = parse_name::<DecoderMode>)]
    mode: Option<DecoderMode>,

    /// Payload conversion: plain_text, hexadecimal, base64, binary
    #[arg(long, value_parser = parse_name::<InputEncoding>)]
    encoding: Option<InputEncoding>,

    /// Field separator
    #[arg(long)]
    separator: Option<String>,

    /// JSON project file
    #[arg(long)]
    project: Option<PathBuf>,

    /// Lua parser script
    #[arg(long)]
    script: Option<PathBuf>,

    // Pipeline and sinks
    /// Decode on a dedicated worker thread
    #[arg(long)]
    threaded: bool,

    /// Print raw transport bytes instead of decoded frames
    #[arg(long)]
    raw: bool,

    /// Do not print frames to stdout
    #[arg(long)]
    quiet: bool,

    /// Append decoded frames to a CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(addr) = &self.tcp {
            config.transport = TransportConfig::Tcp { addr: addr.clone() };
        } else if let Some(bind) = &self.udp {
            config.transport = TransportConfig::Udp {
                bind: bind.clone(),
                peer: None,
            };
        } else if let Some(path) = &self.serial {
            config.transport = TransportConfig::Serial { path: path.clone() };
        } else if self.stdin {
            config.transport = TransportConfig::Stdin;
        }

        let framing = &mut config.framing;
        if let Some(detection) = self.detection {
            framing.detection = detection;
        }
        if let Some(start) = &self.start_delimiter {
            framing.start_delimiter = start.clone();
        }
        if let Some(end) = &self.end_delimiter {
            framing.end_delimiter = end.clone();
        }
        if let Some(checksum) = self.checksum {
            framing.checksum = checksum;
        }
        if let Some(max) = self.max_buffer {
            framing.max_buffer_size = max;
        }

        let decoding = &mut config.decoding;
        if let Some(mode) = self.mode {
            decoding.mode = mode;
        }
        if let Some(encoding) = self.encoding {
            decoding.encoding = encoding;
        }
        if let Some(separator) = &self.separator {
            decoding.separator = separator.clone();
        }
        if let Some(project) = &self.project {
            decoding.project = Some(project.clone());
        }
        if let Some(script) = &self.script {
            decoding.script = Some(script.clone());
            if self.mode.is_none() {
                decoding.mode = DecoderMode::Script;
            }
        }

        if self.threaded {
            config.pipeline.threaded = true;
        }
        if self.raw {
            config.sinks.raw = true;
        }
        if self.quiet {
            config.sinks.console = false;
        }
        if let Some(csv) = &self.csv {
            config.sinks.csv = Some(csv.clone());
        }
    }
}

/// Store a rewritten parser script back into the project file
///
/// Scripts loaded from a standalone file are left untouched.
fn persist_migration(
    config: &IngestConfig,
    project: Option<&ProjectSchema>,
    migration: &Migration,
) -> anyhow::Result<()> {
    if config.decoding.script.is_some() {
        warn!("Parser script migrated in memory only; update the script file to silence this notice");
        return Ok(());
    }

    if let (Some(path), Some(project)) = (&config.decoding.project, project) {
        let mut updated = project.clone();
        updated.set_frame_parser(Some(migration.source.clone()));
        updated
            .save(path)
            .with_context(|| format!("failed to update project {}", path.display()))?;
        component_info!("decode", "Migrated parser script saved to {}", path.display());
    }
    Ok(())
}

/// Build the configured decoder, falling back to one that skips every frame
fn load_decoder(
    config: &IngestConfig,
    project: Option<Arc<ProjectSchema>>,
    script: Option<&str>,
) -> LoadedDecoder {
    match build_decoder(&config.decoding, project, script) {
        Ok(decoder) => decoder,
        Err(e) => {
            component_error!("decode", "Decoder unavailable, frames will be skipped: {}", e);
            LoadedDecoder::unavailable(config.decoding.mode, e)
        }
    }
}

/// Sleep for `delay`; false if interrupted
async fn wait_or_interrupt(delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,ingest={level},ingest_session={level},ingest_wire={level},ingest_decode={level}",
            level = args.log_level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .event_format(IngestLogFormatter::new())
        .init();

    info!("Starting ingest v{}", env!("CARGO_PKG_VERSION"));

    let mut config = IngestConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let project = match &config.decoding.project {
        Some(path) => Some(Arc::new(
            ProjectSchema::load(path)
                .with_context(|| format!("failed to load project {}", path.display()))?,
        )),
        None => None,
    };
    let script = match &config.decoding.script {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read parser script {}", path.display()))?,
        ),
        None => None,
    };

    let decoder = load_decoder(&config, project.clone(), script.as_deref());
    if let Some(migration) = &decoder.migration {
        if let Err(e) = persist_migration(&config, project.as_deref(), migration) {
            warn!("{:#}", e);
        }
    }

    let dispatcher = Arc::new(Dispatcher::new());
    if config.sinks.console {
        dispatcher.register(Arc::new(ConsoleSink::new(config.sinks.raw)));
    }
    if let Some(path) = &config.sinks.csv {
        let sink = CsvSink::create(path)
            .with_context(|| format!("failed to open CSV file {}", path.display()))?;
        component_info!("csv", "Exporting frames to {}", path.display());
        dispatcher.register(Arc::new(sink));
    }

    let stats = Arc::new(PipelineStats::new());
    let mut pipeline = Pipeline::new(&config.framing, decoder, dispatcher.clone(), stats.clone())?;

    let (event_tx, mut event_rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Connected { transport } => {
                    component_info!("session", "Connected to {}", transport)
                }
                SessionEvent::Disconnected => component_info!("session", "Disconnected"),
                SessionEvent::TransportFailed { message } => {
                    component_warn!("session", "Connection lost: {}", message)
                }
            }
        }
    });

    let reconnect_delay: Duration = args.reconnect_delay.into();

    loop {
        let transport = match open_transport(&config.transport).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("{}", e);
                if reconnect_delay.is_zero() {
                    return Err(e.into());
                }
                info!("Retrying in {}", humantime::format_duration(reconnect_delay));
                if wait_or_interrupt(reconnect_delay).await {
                    continue;
                }
                break;
            }
        };

        dispatcher.activate();
        let mut handle = Session::spawn(transport, pipeline, &config.pipeline, event_tx.clone());

        let finished = tokio::select! {
            result = handle.wait() => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        let outcome = match finished {
            Some(result) => result?,
            None => {
                info!("Interrupted, disconnecting");
                handle.disconnect().await?;
                break;
            }
        };

        match outcome.end {
            SessionEnd::EndOfStream => {
                info!("End of stream");
                break;
            }
            SessionEnd::Disconnected => break,
            SessionEnd::TransportFailed(_) if reconnect_delay.is_zero() => break,
            SessionEnd::TransportFailed(_) => {
                pipeline = outcome.pipeline;
                info!("Reconnecting in {}", humantime::format_duration(reconnect_delay));
                if !wait_or_interrupt(reconnect_delay).await {
                    break;
                }
            }
        }
    }

    let s = stats.snapshot();
    info!(
        "Final statistics: {} bytes in {} chunks, {} frames detected, {} decoded, {} rejected, {} parser errors, {} overflows, {} chunks dropped",
        s.bytes_in,
        s.chunks,
        s.frames_detected,
        s.frames_decoded,
        s.frames_rejected,
        s.parser_errors,
        s.overflows,
        s.chunks_dropped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "ingest",
            "--tcp",
            "127.0.0.1:23",
            "--detection",
            "start_and_end_delimiter",
            "--checksum",
            "crc32",
            "--script",
            "parser.lua",
            "--threaded",
            "--quiet",
        ]);

        let mut config = IngestConfig::default();
        args.apply(&mut config);

        assert_eq!(
            config.transport,
            TransportConfig::Tcp {
                addr: "127.0.0.1:23".to_string()
            }
        );
        assert_eq!(config.framing.detection, FrameDetection::StartAndEndDelimiter);
        assert_eq!(config.framing.checksum, ChecksumAlgorithm::Crc32);
        assert_eq!(config.decoding.mode, DecoderMode::Script);
        assert!(config.pipeline.threaded);
        assert!(!config.sinks.console);
        assert_eq!(Duration::from(args.reconnect_delay), Duration::from_secs(2));
    }

    #[test]
    fn test_bad_enum_value_rejected() {
        assert!(Args::try_parse_from(["ingest", "--mode", "telepathy"]).is_err());
        assert!(Args::try_parse_from(["ingest", "--tcp", "a:1", "--stdin"]).is_err());
    }

    #[test]
    fn test_persist_migration_updates_project() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let project = ProjectSchema::new("Rover");
        project.save(&path).unwrap();

        let mut config = IngestConfig::default();
        config.decoding.project = Some(path.clone());
        let migration = Migration {
            source: "function parse(frame)\n  local sep = \",\"\nend\n".to_string(),
            notice: "migrated".to_string(),
        };

        persist_migration(&config, Some(&project), &migration).unwrap();
        let reloaded = ProjectSchema::load(&path).unwrap();
        assert_eq!(reloaded.frame_parser(), Some(migration.source.as_str()));
        assert_eq!(reloaded.title(), "Rover");
    }

    #[test]
    fn test_load_decoder_falls_back_on_error() {
        let mut config = IngestConfig::default();
        config.decoding.mode = DecoderMode::Script;

        let mut loaded = load_decoder(&config, None, Some("function parse(f) return {"));
        assert_eq!(loaded.decoder.mode(), DecoderMode::Script);
        assert!(matches!(
            loaded.decoder.decode(b"1,2"),
            Err(ingest_decode::DecodeError::Syntax(_))
        ));

        let mut loaded = load_decoder(&config, None, Some("function parse(f) return { #f } end"));
        assert_eq!(loaded.decoder.decode(b"abc").unwrap().len(), 1);
    }
}

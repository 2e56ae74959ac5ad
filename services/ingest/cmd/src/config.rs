//! Configuration handling for the ingest service.
//!
//! This module reads the YAML configuration file and applies environment
//! variable overrides on top of it. Command-line flags are applied last, in
//! `main.rs`.

use anyhow::Result;
use ingest_decode::DecodingConfig;
use ingest_session::{PipelineOptions, TransportConfig};
use ingest_wire::FramingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Ingest service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Byte source
    pub transport: TransportConfig,
    /// Frame detection and checksum
    pub framing: FramingConfig,
    /// Frame decoding
    pub decoding: DecodingConfig,
    /// Execution mode
    pub pipeline: PipelineOptions,
    /// Output sinks
    pub sinks: SinksConfig,
}

/// Output sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    /// Print decoded frames to stdout
    pub console: bool,
    /// Print raw transport bytes instead of decoded frames
    pub raw: bool,
    /// Append decoded frames to this CSV file
    pub csv: Option<PathBuf>,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            console: true,
            raw: false,
            csv: None,
        }
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<IngestConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Final ingest configuration: transport={:?}, detection={:?}, checksum={}, mode={:?}, threaded={}",
            config.transport,
            config.framing.detection,
            config.framing.checksum,
            config.decoding.mode,
            config.pipeline.threaded
        );

        Ok(config)
    }

    /// Apply `INGEST_*` overrides read through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(transport) = transport_override(&self.transport, &lookup) {
            info!("Transport overridden by environment: {:?}", transport);
            self.transport = transport;
        }

        if let Some(threaded) = lookup("INGEST_THREADED") {
            self.pipeline.threaded = matches!(threaded.to_lowercase().as_str(), "true" | "1" | "yes");
            info!("Threaded mode overridden by environment: {}", self.pipeline.threaded);
        }

        if let Some(max) = lookup("INGEST_MAX_BUFFER") {
            match max.parse::<usize>() {
                Ok(max) => {
                    self.framing.max_buffer_size = max;
                    info!("Max buffer size overridden by environment: {}", max);
                }
                Err(_) => warn!("Ignoring invalid INGEST_MAX_BUFFER {:?}", max),
            }
        }

        if let Some(project) = lookup("INGEST_PROJECT") {
            self.decoding.project = Some(PathBuf::from(project));
            info!("Project overridden by environment: {:?}", self.decoding.project);
        }
    }
}

/// Transport selected through `INGEST_TRANSPORT` and its parameter variables
///
/// Parameters not given in the environment are kept from `current` when it
/// is already of the requested kind.
fn transport_override<F>(current: &TransportConfig, lookup: &F) -> Option<TransportConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let tcp_addr = lookup("INGEST_TCP_ADDR");
    let udp_bind = lookup("INGEST_UDP_BIND");
    let serial_path = lookup("INGEST_SERIAL_PATH");

    let kind = match lookup("INGEST_TRANSPORT") {
        Some(kind) => kind.to_lowercase(),
        None if tcp_addr.is_some() => "tcp".to_string(),
        None if udp_bind.is_some() => "udp".to_string(),
        None if serial_path.is_some() => "serial".to_string(),
        None => return None,
    };

    let transport = match (kind.as_str(), current) {
        ("stdin", _) => TransportConfig::Stdin,
        ("tcp", current) => TransportConfig::Tcp {
            addr: match (tcp_addr, current) {
                (Some(addr), _) => addr,
                (None, TransportConfig::Tcp { addr }) => addr.clone(),
                (None, _) => {
                    warn!("INGEST_TRANSPORT=tcp requires INGEST_TCP_ADDR");
                    return None;
                }
            },
        },
        ("udp", current) => match (udp_bind, current) {
            (Some(bind), TransportConfig::Udp { peer, .. }) => TransportConfig::Udp {
                bind,
                peer: peer.clone(),
            },
            (Some(bind), _) => TransportConfig::Udp { bind, peer: None },
            (None, TransportConfig::Udp { .. }) => current.clone(),
            (None, _) => {
                warn!("INGEST_TRANSPORT=udp requires INGEST_UDP_BIND");
                return None;
            }
        },
        ("serial", current) => TransportConfig::Serial {
            path: match (serial_path, current) {
                (Some(path), _) => PathBuf::from(path),
                (None, TransportConfig::Serial { path }) => path.clone(),
                (None, _) => {
                    warn!("INGEST_TRANSPORT=serial requires INGEST_SERIAL_PATH");
                    return None;
                }
            },
        },
        (other, _) => {
            warn!("Ignoring unknown INGEST_TRANSPORT {:?}", other);
            return None;
        }
    };

    Some(transport)
}

//! Transport sources.
//!
//! A transport yields byte chunks in arrival order and knows nothing about
//! framing. TCP, UDP, serial device nodes and stdin are opened from
//! configuration; [`channel_transport`] lets an external collaborator (a
//! BLE notification or audio capture callback) push bytes directly.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Read size for stream transports
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Largest UDP datagram accepted
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Transport kind and connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// TCP client
    Tcp {
        /// `host:port` to connect to
        addr: String,
    },
    /// UDP socket
    Udp {
        /// Local `host:port` to bind
        bind: String,
        /// Only accept datagrams from this peer
        #[serde(default)]
        peer: Option<String>,
    },
    /// Serial device node; line settings are applied externally
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0`
        path: PathBuf,
    },
    /// Standard input
    #[default]
    Stdin,
}

/// A byte-producing device
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Next chunk of bytes; `None` at end of stream
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Human-readable endpoint name
    fn name(&self) -> String;
}

/// Open the transport described by `config`
pub async fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match config {
        TransportConfig::Tcp { addr } => Box::new(TcpTransport::connect(addr).await?),
        TransportConfig::Udp { bind, peer } => {
            Box::new(UdpTransport::bind(bind, peer.as_deref()).await?)
        }
        TransportConfig::Serial { path } => Box::new(SerialTransport::open(path.clone()).await?),
        TransportConfig::Stdin => Box::new(StdinTransport::new()),
    };
    info!("Opened transport {}", transport.name());
    Ok(transport)
}

/// Read once from a stream into `buf`, splitting off what arrived
async fn read_stream<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    buf.reserve(READ_CHUNK_SIZE);
    let n = reader.read_buf(buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.split().freeze()))
}

/// TCP client transport
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    buf: BytesMut,
}

impl TcpTransport {
    /// Connect to `addr`
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Open {
                target: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        debug!("Connected to {}", peer);
        Ok(Self::from_stream(stream, peer))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, peer: String) -> Self {
        Self {
            stream,
            peer,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        read_stream(&mut self.stream, &mut self.buf).await
    }

    fn name(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// UDP transport; every datagram is one chunk
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: String,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind to `bind`, optionally restricting to a single peer
    pub async fn bind(bind: &str, peer: Option<&str>) -> Result<Self, TransportError> {
        let open_err = |target: &str| {
            let target = target.to_string();
            move |source| TransportError::Open { target, source }
        };

        let socket = UdpSocket::bind(bind).await.map_err(open_err(bind))?;
        if let Some(peer) = peer {
            socket.connect(peer).await.map_err(open_err(peer))?;
        }
        let local = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| bind.to_string());

        Ok(Self {
            socket,
            local,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let (n, _from) = self.socket.recv_from(&mut self.buf).await?;
            if n > 0 {
                return Ok(Some(Bytes::copy_from_slice(&self.buf[..n])));
            }
        }
    }

    fn name(&self) -> String {
        format!("udp://{}", self.local)
    }
}

/// Serial device (or any readable file) transport
#[derive(Debug)]
pub struct SerialTransport {
    file: tokio::fs::File,
    path: PathBuf,
    buf: BytesMut,
}

impl SerialTransport {
    /// Open the device node for reading
    pub async fn open(path: PathBuf) -> Result<Self, TransportError> {
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| TransportError::Open {
                target: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            file,
            path,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        read_stream(&mut self.file, &mut self.buf).await
    }

    fn name(&self) -> String {
        format!("serial://{}", self.path.display())
    }
}

/// Standard input transport
#[derive(Debug)]
pub struct StdinTransport {
    stdin: tokio::io::Stdin,
    buf: BytesMut,
}

impl StdinTransport {
    /// Read from the process's standard input
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }
}

impl Default for StdinTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdinTransport {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        read_stream(&mut self.stdin, &mut self.buf).await
    }

    fn name(&self) -> String {
        "stdin".to_string()
    }
}

/// Transport fed by an external producer
#[derive(Debug)]
pub struct ChannelTransport {
    name: String,
    rx: mpsc::Receiver<Bytes>,
}

/// Create a channel transport and the sender that feeds it
///
/// The stream ends once every sender is dropped.
pub fn channel_transport(
    name: impl Into<String>,
    capacity: usize,
) -> (mpsc::Sender<Bytes>, ChannelTransport) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        tx,
        ChannelTransport {
            name: name.into(),
            rx,
        },
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }

    fn name(&self) -> String {
        format!("channel://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"1,2,3\n").await.unwrap();
        });

        let config = TransportConfig::Tcp {
            addr: addr.to_string(),
        };
        let mut transport = open_transport(&config).await.unwrap();
        assert!(transport.name().starts_with("tcp://"));

        let mut received = Vec::new();
        while let Some(chunk) = transport.read_chunk().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"1,2,3\n");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::connect(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[tokio::test]
    async fn test_udp_datagrams() {
        let mut transport = UdpTransport::bind("127.0.0.1:0", None).await.unwrap();
        let target = transport.socket.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"a;1", target).await.unwrap();
        sender.send_to(b"b;2", target).await.unwrap();

        assert_eq!(&transport.read_chunk().await.unwrap().unwrap()[..], b"a;1");
        assert_eq!(&transport.read_chunk().await.unwrap().unwrap()[..], b"b;2");
    }

    #[tokio::test]
    async fn test_serial_reads_device_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"$1,2$3,4").unwrap();
        file.flush().unwrap();

        let config = TransportConfig::Serial {
            path: file.path().to_path_buf(),
        };
        let mut transport = open_transport(&config).await.unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = transport.read_chunk().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"$1,2$3,4");

        let missing = TransportConfig::Serial {
            path: PathBuf::from("/nonexistent/ttyUSB9"),
        };
        assert!(open_transport(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_transport() {
        let (tx, mut transport) = channel_transport("ble", 4);
        tx.send(Bytes::from_static(b"xy")).await.unwrap();
        drop(tx);

        assert_eq!(transport.name(), "channel://ble");
        assert_eq!(transport.read_chunk().await.unwrap(), Some(Bytes::from_static(b"xy")));
        assert_eq!(transport.read_chunk().await.unwrap(), None);
    }

    #[test]
    fn test_config_yaml() {
        let config: TransportConfig =
            serde_yaml::from_str("kind: udp\nbind: 0.0.0.0:9000\n").unwrap();
        assert_eq!(
            config,
            TransportConfig::Udp {
                bind: "0.0.0.0:9000".to_string(),
                peer: None
            }
        );
        let config: TransportConfig = serde_yaml::from_str("kind: stdin\n").unwrap();
        assert_eq!(config, TransportConfig::Stdin);
    }
}

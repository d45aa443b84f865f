//! Stanza transports.
//!
//! The core only needs one thing from a connection: a send primitive that
//! is safe to call from many tasks at once. Inbound traffic is handed to the
//! component as a plain stream of decoded stanzas.

use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    pusher_protocol::{Handshake, MAX_FRAME_BYTES, Stanza},
    tokio::{
        io::{AsyncWriteExt, BufWriter},
        net::{TcpStream, tcp::OwnedWriteHalf},
        sync::{Mutex, mpsc},
    },
    tokio_stream::wrappers::UnboundedReceiverStream,
    tokio_util::codec::{FramedRead, LinesCodec},
    tracing::{debug, info, trace, warn},
};

/// Inbound side of a connection.
pub type StanzaStream = Pin<Box<dyn Stream<Item = Stanza> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Fire-and-forget send primitive shared by every caller.
#[async_trait]
pub trait StanzaSink: Send + Sync {
    /// Write one complete stanza. Concurrent calls never interleave.
    async fn send(&self, stanza: Stanza) -> Result<(), TransportError>;
}

// ── In-memory transport ─────────────────────────────────────────────────────

/// Sink backed by an unbounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Stanza>,
}

#[async_trait]
impl StanzaSink for ChannelSink {
    async fn send(&self, stanza: Stanza) -> Result<(), TransportError> {
        self.tx.send(stanza).map_err(|_| TransportError::Closed)
    }
}

/// A sink and the receiver observing everything written to it.
pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<Stanza>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

/// Adapt a channel receiver into an inbound stanza stream.
pub fn receiver_stream(rx: mpsc::UnboundedReceiver<Stanza>) -> StanzaStream {
    Box::pin(UnboundedReceiverStream::new(rx))
}

// ── TCP transport ───────────────────────────────────────────────────────────

/// Line-delimited JSON over a TCP connection to the server.
pub struct TcpSink {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
}

impl TcpSink {
    async fn write_frame(&self, stanza: &Stanza) -> Result<(), TransportError> {
        let mut line = serde_json::to_string(stanza)?;
        if line.len() > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                size: line.len(),
                max: MAX_FRAME_BYTES,
            });
        }
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl StanzaSink for TcpSink {
    async fn send(&self, stanza: Stanza) -> Result<(), TransportError> {
        trace!(?stanza, "component -> server");
        self.write_frame(&stanza).await
    }
}

/// Connect, authenticate with `handshake`, and split into sink and stream.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    handshake: Handshake,
) -> Result<(TcpSink, StanzaStream), TransportError> {
    info!(host, port, component = %handshake.component, "connecting to server");
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    let sink = TcpSink {
        writer: Mutex::new(BufWriter::new(write_half)),
    };
    sink.write_frame(&Stanza::Handshake(handshake)).await?;

    let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let inbound = lines.filter_map(|line| async move {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "error reading from server");
                return None;
            },
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<Stanza>(trimmed) {
            Ok(stanza) => {
                trace!(raw = %trimmed, "server -> component");
                Some(stanza)
            },
            Err(e) => {
                debug!(error = %e, line = %trimmed, "skipping undecodable frame");
                None
            },
        }
    });

    Ok((sink, Box::pin(inbound)))
}

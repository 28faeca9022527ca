//! Backend connection state and socket access.
//!
//! `BackendConnection` owns the socket and the single frame buffer slot
//! an exchange may occupy. The exchange driver never touches the socket
//! directly; all reads land in the attached buffer and all writes go
//! through the connection, so partial-write handling and closure
//! detection live in one place.

use std::sync::Arc;
use std::task::{Context, Poll};

use sqlgate_core::{ConnectionError, ConnectionErrorKind, Error, Result};
use sqlgate_pool::ChunkPool;

use crate::buffer::{FrameBuffer, PacketView};

/// The socket seam between the exchange driver and a byte stream.
///
/// Implemented for the TCP transport and for in-memory test streams.
pub trait ExchangeStream: Unpin {
    fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>>;

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>>;

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>>;
}

/// A MySQL backend link carrying at most one exchange at a time.
#[derive(Debug)]
pub struct BackendConnection<S> {
    stream: S,
    pool: Arc<ChunkPool>,
    /// Frame buffer of the in-flight exchange, if any
    buffer: Option<FrameBuffer>,
    /// Error text of the most recent failed exchange
    last_message: Option<String>,
    /// Sequence id tracked across the packets of the current exchange
    sequence_id: u8,
    /// Negotiated capability flags
    capabilities: u32,
}

impl<S: ExchangeStream> BackendConnection<S> {
    /// Wrap an established stream.
    pub fn new(stream: S, pool: Arc<ChunkPool>, capabilities: u32) -> Self {
        Self {
            stream,
            pool,
            buffer: None,
            last_message: None,
            sequence_id: 0,
            capabilities,
        }
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// The underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// The chunk pool backing this connection's exchanges.
    pub fn pool(&self) -> &Arc<ChunkPool> {
        &self.pool
    }

    /// Whether an exchange currently holds the buffer slot.
    pub fn exchange_in_flight(&self) -> bool {
        self.buffer.is_some()
    }

    /// Tracked sequence id for the next packet.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Reset the tracked sequence id for a fresh exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Overwrite the tracked sequence id (driven by response headers).
    pub fn set_sequence(&mut self, sequence_id: u8) {
        self.sequence_id = sequence_id;
    }

    /// Record the error text of a failing exchange, returning it.
    pub fn set_last_message(&mut self, message: impl Into<String>) -> &str {
        self.last_message = Some(message.into());
        self.last_message.as_deref().unwrap_or_default()
    }

    /// Error text of the most recent failed exchange.
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    /// Take the error text, clearing the slot.
    pub fn take_last_message(&mut self) -> Option<String> {
        self.last_message.take()
    }

    /// Check out a frame buffer for a new exchange.
    ///
    /// Fails fast with a typed error when an exchange is already in
    /// flight; the caller never gets a half-shared buffer.
    pub fn attach_buffer(&mut self) -> Result<()> {
        if self.buffer.is_some() {
            return Err(Error::exchange_in_flight(
                "an exchange is already in flight on this connection",
            ));
        }
        self.buffer = Some(FrameBuffer::new(&self.pool));
        Ok(())
    }

    /// The attached buffer, or a typed error when no exchange is open.
    pub fn buffer_mut(&mut self) -> Result<&mut FrameBuffer> {
        self.buffer
            .as_mut()
            .ok_or_else(|| Error::protocol("no exchange buffer attached"))
    }

    /// Detach the buffer at exchange end. Dropping it returns the chunk
    /// to the pool.
    pub fn detach_buffer(&mut self) -> Option<FrameBuffer> {
        self.buffer.take()
    }

    /// Read whatever the socket has into the attached buffer.
    ///
    /// Returns the number of bytes appended; `Ok(0)` means the peer
    /// closed the stream.
    pub async fn read_available(&mut self) -> Result<usize> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(Error::protocol("read without an attached exchange buffer"));
        };
        let stream = &mut self.stream;
        let writable = buffer.writable();
        let n = std::future::poll_fn(|cx| stream.poll_read(cx, writable))
            .await
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!("failed to read from backend: {}", e),
                    source: Some(Box::new(e)),
                })
            })?;
        buffer.advance_written(n);
        Ok(n)
    }

    /// Write a staged packet out of the attached buffer and flush.
    pub async fn write_staged(&mut self, view: PacketView) -> Result<()> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Err(Error::protocol("write without an attached exchange buffer"));
        };
        let bytes = buffer.payload(view);
        let stream = &mut self.stream;
        write_all(stream, bytes).await
    }

    /// Write an externally built packet and flush.
    ///
    /// Used mid-exchange (LOAD DATA content) when the buffer already
    /// holds inbound bytes and cannot stage outbound data.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        write_all(&mut self.stream, bytes).await
    }
}

/// Partial-write loop: `poll_write` may accept fewer bytes than given.
async fn write_all<S: ExchangeStream>(stream: &mut S, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let n = std::future::poll_fn(|cx| stream.poll_write(cx, &bytes[written..]))
            .await
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!("failed to write to backend: {}", e),
                    source: Some(Box::new(e)),
                })
            })?;
        if n == 0 {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: "connection closed while writing a packet".to_string(),
                source: None,
            }));
        }
        written += n;
    }
    std::future::poll_fn(|cx| stream.poll_flush(cx))
        .await
        .map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("failed to flush backend stream: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
    Ok(())
}

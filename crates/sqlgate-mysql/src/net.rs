//! Async TCP transport for backend links.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;

use sqlgate_core::{ConnectionError, ConnectionErrorKind, Error, Result};
use sqlgate_pool::ChunkPool;

use crate::config::BackendConfig;
use crate::connection::{BackendConnection, ExchangeStream};

/// A TCP stream to a MySQL backend.
#[derive(Debug)]
pub struct TcpBackend {
    stream: TcpStream,
}

impl TcpBackend {
    /// Connect with the configured timeout and TCP options.
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let addr = config.socket_addr();
        let socket_addr: std::net::SocketAddr = addr.parse().map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("invalid socket address {}: {}", addr, e),
                source: None,
            })
        })?;
        let stream = TcpStream::connect_timeout(socket_addr, config.connect_timeout)
            .await
            .map_err(|e| {
                let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                Error::Connection(ConnectionError {
                    kind,
                    message: format!("failed to connect to {}: {}", addr, e),
                    source: Some(Box::new(e)),
                })
            })?;
        stream.set_nodelay(true).ok();
        tracing::debug!(%addr, "backend connected");
        Ok(Self { stream })
    }
}

impl ExchangeStream for TcpBackend {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut read_buf = ReadBuf::new(buf);
        match Pin::new(&mut self.stream).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }
}

/// Connect and wrap the stream into a ready [`BackendConnection`].
pub async fn connect(
    config: &BackendConfig,
    pool: Arc<ChunkPool>,
) -> Result<BackendConnection<TcpBackend>> {
    let stream = TcpBackend::connect(config).await?;
    Ok(BackendConnection::new(
        stream,
        pool,
        config.capability_flags(),
    ))
}

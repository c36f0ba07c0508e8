//! Line-delimited TCP transport.
//!
//! One [`LineConnection`] wraps a TCP stream split into halves, each
//! behind its own async mutex, so a single `Arc`ed connection can serve
//! a read loop and an independent writer task at the same time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP listener producing [`LineConnection`]s.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds the transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        tracing::info!(addr, "transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for and accepts the next incoming connection.
    pub async fn accept(&self) -> Result<LineConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::ConnectFailed)?;
        let conn = LineConnection::from_stream(stream);
        tracing::debug!(id = %conn.id(), %addr, "accepted connection");
        Ok(conn)
    }
}

/// A full-duplex, newline-framed connection.
///
/// All methods take `&self`; the read and write halves are serialized
/// independently, so concurrent readers (or concurrent writers) queue
/// behind each other while a reader never blocks a writer.
pub struct LineConnection {
    id: ConnectionId,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl LineConnection {
    fn from_stream(stream: TcpStream) -> Self {
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (read_half, write_half) = stream.into_split();
        Self {
            id,
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
        }
    }

    /// Opens a client-side connection to the given address.
    pub async fn connect(addr: &str) -> Result<Arc<Self>, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let conn = Self::from_stream(stream);
        tracing::debug!(id = %conn.id(), addr, "connected");
        Ok(Arc::new(conn))
    }

    /// Sends one line, appending the newline terminator.
    ///
    /// The line and its terminator go out in a single write; writing
    /// them separately leaves the frame incomplete until Nagle's
    /// algorithm releases the trailing byte, stalling the peer's
    /// line parser for tens of milliseconds per line.
    pub async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    /// Receives the next line, without its terminator.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    pub async fn recv_line(
        &self,
    ) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Shuts down the write side, signalling end-of-stream to the peer.
    ///
    /// The peer's blocked read completes without its cooperation; our own
    /// blocked read completes once the peer closes in turn or the socket
    /// errors.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (Arc<LineConnection>, LineConnection) {
        let transport =
            TcpTransport::bind("127.0.0.1:0").await.expect("bind");
        let addr = transport.local_addr().expect("addr").to_string();
        let client = tokio::spawn(async move {
            LineConnection::connect(&addr).await.expect("connect")
        });
        let server = transport.accept().await.expect("accept");
        (client.await.expect("join"), server)
    }

    #[tokio::test]
    async fn test_send_line_round_trips_without_terminator() {
        let (client, server) = pair().await;

        client.send_line("hello there").await.expect("send");

        let line = server.recv_line().await.expect("recv");
        assert_eq!(line.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn test_recv_line_returns_none_on_clean_close() {
        let (client, server) = pair().await;

        client.close().await.expect("close");

        let line = server.recv_line().await.expect("recv");
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn test_send_line_preserves_order() {
        let (client, server) = pair().await;

        for i in 0..10 {
            client.send_line(&format!("msg-{i}")).await.expect("send");
        }
        for i in 0..10 {
            let line = server.recv_line().await.expect("recv");
            assert_eq!(line.as_deref(), Some(format!("msg-{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let (a, b) = pair().await;
        assert_ne!(a.id(), b.id());
    }
}

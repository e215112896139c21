//! Byte-level duplex wrapper around an accepted TCP socket: peek, counters,
//! deadlines, and an address-tuple identity, matching the role the upstream
//! connection object plays ahead of protocol parsing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    Closed,
    Timeout,
    Io,
}

/// A connection wraps exactly one socket; closing it is idempotent and the
/// socket is closed at most once (on drop, once no task still holds a
/// reference). [`WrappedConn::close`] additionally unblocks any task
/// currently parked in [`WrappedConn::read`] or [`WrappedConn::read_exact`]
/// so reconnection takeover doesn't wait on a dead peer's read timeout.
pub struct WrappedConn {
    pub conn_id: u64,
    stream: TcpStream,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub created_at: DateTime<Utc>,
    closed: AtomicBool,
    close_signal: Notify,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl WrappedConn {
    pub fn new(stream: TcpStream, conn_id: u64) -> std::io::Result<Self> {
        Self::new_with_remote(stream, conn_id, None)
    }

    /// Same as [`WrappedConn::new`], but `remote_override` substitutes the
    /// socket's own peer address — used when a PROXY protocol header names
    /// the real originating address ahead of a load balancer (spec.md's
    /// proxy-protocol supplement).
    pub fn new_with_remote(
        stream: TcpStream,
        conn_id: u64,
        remote_override: Option<SocketAddr>,
    ) -> std::io::Result<Self> {
        let remote_addr = match remote_override {
            Some(addr) => addr,
            None => stream.peer_addr()?,
        };
        let local_addr = stream.local_addr()?;
        Ok(Self {
            conn_id,
            stream,
            remote_addr,
            local_addr,
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        })
    }

    /// Remote/local address 4-tuple, used for logging and identity.
    pub fn tuple(&self) -> [String; 4] {
        [
            self.remote_addr.ip().to_string(),
            self.remote_addr.port().to_string(),
            self.local_addr.ip().to_string(),
            self.local_addr.port().to_string(),
        ]
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Marks the connection closed and wakes any task blocked reading from
    /// it. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_waiters();
        }
    }

    pub async fn peek(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.peek(buf).await
    }

    /// Reads into `buf`, racing against [`WrappedConn::close`] and an
    /// optional deadline. `Ok(0)` or a peer-reset error both fold into
    /// [`ReadError::Io`]; the caller treats every variant as fatal for the
    /// connection (spec taxonomy: `io_error` / `read_timeout`).
    pub async fn read(&self, buf: &mut [u8], deadline: Option<Duration>) -> Result<usize, ReadError> {
        let read_fut = async {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ReadError::Closed);
            }
            match (&self.stream).read(buf).await {
                Ok(0) => Err(ReadError::Io),
                Ok(n) => {
                    self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                    Ok(n)
                }
                Err(_) => Err(ReadError::Io),
            }
        };

        let raced = async {
            tokio::select! {
                biased;
                () = self.close_signal.notified() => Err(ReadError::Closed),
                res = read_fut => res,
            }
        };

        match deadline {
            Some(d) => tokio::time::timeout(d, raced).await.unwrap_or(Err(ReadError::Timeout)),
            None => raced.await,
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> std::io::Result<()> {
        (&self.stream).write_all(buf).await?;
        self.bytes_out.fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

pub type SharedConn = Arc<WrappedConn>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (WrappedConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (WrappedConn::new(server, 1).unwrap(), client)
    }

    #[tokio::test]
    async fn read_returns_bytes_written_by_peer() {
        let (conn, mut client) = connected_pair().await;
        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        let n = conn.read(&mut buf, None).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(conn.bytes_in(), 5);
    }

    #[tokio::test]
    async fn close_unblocks_a_pending_read() {
        let (conn, _client) = connected_pair().await;
        let conn = Arc::new(conn);
        let reader = conn.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            reader.read(&mut buf, None).await
        });
        tokio::task::yield_now().await;
        conn.close();
        let result = handle.await.unwrap();
        assert_eq!(result, Err(ReadError::Closed));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn read_times_out_when_peer_is_silent() {
        let (conn, _client) = connected_pair().await;
        let mut buf = [0u8; 1];
        let result = conn.read(&mut buf, Some(Duration::from_millis(20))).await;
        assert_eq!(result, Err(ReadError::Timeout));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (conn, _client) = connected_pair().await;
        conn.close();
        conn.close();
        assert!(conn.is_closed());
    }
}

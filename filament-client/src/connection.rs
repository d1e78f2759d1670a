//! A single full-duplex connection to one remote endpoint.
//!
//! The connection is shared by arbitrarily many concurrent logical calls.
//! Each caller suspends on its own one-shot channel while a single dedicated
//! reader task drains the socket and wakes exactly the caller whose sequence
//! matches. Response ordering across calls is not guaranteed; sequence
//! correlation is the only ordering contract.

use crate::error::ClientError;
use filament_protocol::{Decoder, Encoder, Request, Response, DEFAULT_MAX_PAYLOAD_BYTES};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum time a caller waits for its response.
    pub call_timeout: Duration,
    /// TCP_NODELAY on the socket.
    pub tcp_nodelay: bool,
    /// SO_KEEPALIVE on the socket.
    pub keepalive: bool,
    /// SO_LINGER behavior on close.
    pub linger: Option<Duration>,
    /// SO_RCVBUF hint for the socket.
    pub recv_buffer_size: u32,
    /// Userspace read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Maximum frame payload size, shared with the server.
    pub max_payload_bytes: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(15),
            tcp_nodelay: true,
            keepalive: true,
            linger: Some(Duration::ZERO),
            recv_buffer_size: 8192,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: u32) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

/// Outcome delivered to a waiting caller. Timeout is not represented here;
/// it is the caller's own timer expiring.
#[derive(Debug, Clone)]
enum Wake {
    /// The matching response arrived.
    Response(Response),
    /// A transport or codec exception was recorded while the call was pending.
    Transport(String),
    /// The connection dropped; broadcast to every pending call in one pass.
    Disconnected,
}

/// A connection to one remote endpoint.
pub struct Connection {
    addr: SocketAddr,
    config: ConnectionConfig,
    id: Uuid,
    encoder: Encoder,
    /// Write half, shared by all callers; taken on close.
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Pending calls by sequence. At most one entry per sequence; every
    /// entry is removed when its caller observes an outcome.
    pending: Mutex<HashMap<u64, oneshot::Sender<Wake>>>,
    next_sequence: AtomicU64,
    active: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    /// Opens a socket to `addr` with a bounded connect timeout and starts
    /// the dedicated reader task.
    ///
    /// Failure to establish is fatal to this object
    /// ([`ClientError::ConnectFailed`]); retrying is the router's job.
    pub async fn establish(
        addr: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>, ClientError> {
        let connect_failed = |reason: String| ClientError::ConnectFailed { addr, reason };

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| connect_failed(e.to_string()))?;
        socket.set_keepalive(config.keepalive).ok();
        socket.set_recv_buffer_size(config.recv_buffer_size).ok();

        let stream = tokio::time::timeout(config.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| connect_failed("connect timeout".to_string()))?
            .map_err(|e| connect_failed(e.to_string()))?;

        stream.set_nodelay(config.tcp_nodelay).ok();
        stream.set_linger(config.linger).ok();

        let (read_half, write_half) = stream.into_split();
        let max_payload_bytes = config.max_payload_bytes;
        let conn = Arc::new(Self {
            addr,
            config,
            id: Uuid::new_v4(),
            encoder: Encoder::new(max_payload_bytes),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            pending: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        tracing::info!(conn = %conn.id, %addr, "connected to RPC server");
        tokio::spawn(conn.clone().read_loop(read_half));
        Ok(conn)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of in-flight calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a request and blocks the calling task until the correlated
    /// response arrives, a transport exception is recorded against it, the
    /// connection drops, or the call timeout elapses.
    pub async fn call(&self, mut request: Request) -> Result<Response, ClientError> {
        if !self.is_active() {
            // Known dead: skip network I/O entirely.
            return Err(ClientError::ConnectionInactive { addr: self.addr });
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        request.sequence = sequence;
        let signature = request.signature.clone();
        let encoded = self.encoder.encode_request(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(sequence, tx);

        let write_result = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => {
                    match writer.write_all(&encoded).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    }
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "connection closed",
                )),
            }
        };
        if let Err(e) = write_result {
            self.pending.lock().remove(&sequence);
            // A failed write means the socket is dead; everyone pending is
            // resolved as disconnected.
            tracing::warn!(conn = %self.id, sequence, error = %e, "write failed");
            self.fail_all(Wake::Disconnected).await;
            return Err(ClientError::ConnectionLost { addr: self.addr });
        }
        tracing::debug!(conn = %self.id, sequence, %signature, "request sent");

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(Wake::Response(response))) => {
                if let Some(error) = response.error {
                    Err(ClientError::RemoteInvocationFailed(error))
                } else {
                    Ok(response)
                }
            }
            Ok(Ok(Wake::Transport(cause))) => Err(ClientError::LocalTransportFailed(cause)),
            Ok(Ok(Wake::Disconnected)) => Err(ClientError::ConnectionLost { addr: self.addr }),
            // Sender dropped without a wake; treat like a disconnect.
            Ok(Err(_)) => {
                self.pending.lock().remove(&sequence);
                Err(ClientError::ConnectionLost { addr: self.addr })
            }
            Err(_) => {
                // Timed out: remove our entry so the map stays bounded. A
                // late response for this sequence is dropped on arrival.
                self.pending.lock().remove(&sequence);
                Err(ClientError::CallTimedOut {
                    signature,
                    sequence,
                    waited_ms: self.config.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Dedicated reader: drains the socket, correlates responses by
    /// sequence, and on any unrecoverable condition resolves every pending
    /// call and closes the socket exactly once.
    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut decoder = Decoder::new(self.config.max_payload_bytes);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!(conn = %self.id, addr = %self.addr, "server closed connection");
                    self.fail_all(Wake::Disconnected).await;
                    return;
                }
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => {
                    // A read error (reset included) means the socket is
                    // dead, the same as the peer closing.
                    tracing::warn!(conn = %self.id, addr = %self.addr, error = %e, "read error");
                    self.fail_all(Wake::Disconnected).await;
                    return;
                }
            }

            loop {
                match decoder.decode_response() {
                    Ok(Some(response)) => self.dispatch(response),
                    Ok(None) => break,
                    Err(e) => {
                        // Codec faults poison the stream; no resynchronization.
                        tracing::error!(conn = %self.id, addr = %self.addr, error = %e,
                            "protocol error, closing connection");
                        self.fail_all(Wake::Transport(e.to_string())).await;
                        return;
                    }
                }
            }
        }
    }

    /// Wakes the one caller whose sequence matches. A response for an
    /// already-abandoned call is logged and dropped, never an error.
    fn dispatch(&self, response: Response) {
        let sequence = response.sequence;
        let tx = self.pending.lock().remove(&sequence);
        match tx {
            Some(tx) => {
                let _ = tx.send(Wake::Response(response));
            }
            None => {
                tracing::warn!(conn = %self.id, sequence, "no pending call for response, dropping");
            }
        }
    }

    /// Resolves every pending call with `wake` in a single pass and closes
    /// the socket. Idempotent: later faults on an already-closed connection
    /// are no-ops.
    async fn fail_all(&self, wake: Wake) {
        self.active.store(false, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(conn = %self.id, count = drained.len(), "resolving pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(wake.clone());
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Closes the connection, resolving any pending calls as disconnected.
    pub async fn close(&self) {
        self.fail_all(Wake::Disconnected).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("active", &self.is_active())
            .finish()
    }
}

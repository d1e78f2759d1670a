//! TCP listener and per-connection request dispatch.

use crate::auth::Authorizer;
use crate::error::ServerError;
use crate::worker::{self, ResponseWriter};
use filament_core::{LocalNode, Registry, StatsSink};
use filament_protocol::{Decoder, Encoder, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_PORT};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

/// Runtime server configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
    /// SO_RCVBUF hint for the listening socket.
    pub recv_buffer_size: u32,
    /// Userspace read buffer size per connection.
    pub read_buffer_size: usize,
    /// Size of the invocation worker pool, independent of connection count.
    pub worker_count: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame payload size, shared with clients.
    pub max_payload_bytes: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tcp_nodelay: true,
            recv_buffer_size: 8192,
            read_buffer_size: 8192,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4),
            max_connections: 1000,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_tcp_nodelay(mut self, tcp_nodelay: bool) -> Self {
        self.tcp_nodelay = tcp_nodelay;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: u32) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// The RPC server: accepts connections, authorizes them, decodes requests
/// and dispatches each to the bounded worker pool.
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    node: Option<Arc<LocalNode>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    stats_sink: Option<Arc<dyn StatsSink>>,
    workers: Arc<Semaphore>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    bound_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a server over a fully built registry. Registration is done;
    /// the registry is read-only from here on.
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            workers: Arc::new(Semaphore::new(config.worker_count)),
            config,
            registry,
            node: None,
            authorizer: None,
            stats_sink: None,
            stats: Arc::new(ServerStats::default()),
            shutdown,
            running: AtomicBool::new(false),
            listener: tokio::sync::Mutex::new(None),
            bound_addr: parking_lot::Mutex::new(None),
        }
    }

    /// Creates a server that serves `node`'s registry and records its bound
    /// port on the node, enabling the client-side local shortcut.
    pub fn with_local_node(config: ServerConfig, node: Arc<LocalNode>) -> Self {
        let mut server = Self::new(config, node.registry().clone());
        server.node = Some(node);
        server
    }

    /// Installs the per-connection authorization hook. Absent means "always
    /// allow".
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Installs the external invocation stats sink.
    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    /// Binds the listener without accepting yet. Useful when the caller
    /// needs the bound address (e.g. when binding port 0).
    pub async fn bind(&self) -> Result<SocketAddr, ServerError> {
        let socket = match self.config.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }?;
        socket
            .set_recv_buffer_size(self.config.recv_buffer_size)
            .ok();
        socket.bind(self.config.bind_addr)?;
        let listener = socket.listen(1024)?;
        let addr = listener.local_addr()?;

        *self.listener.lock().await = Some(listener);
        *self.bound_addr.lock() = Some(addr);
        if let Some(node) = &self.node {
            node.add_listener_port(addr.port());
        }
        tracing::info!(%addr, targets = self.registry.len(), "RPC server listening");
        Ok(addr)
    }

    /// The address the listener is bound to, once [`Server::bind`] has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    /// Runs the accept loop until shutdown. Binds first if needed.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.listener.lock().await.is_none() {
            self.bind().await?;
        }
        let listener = match self.listener.lock().await.take() {
            Some(listener) => listener,
            None => return Err(ServerError::ShuttingDown),
        };
        self.running.store(true, Ordering::SeqCst);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        if let (Some(node), Some(addr)) = (&self.node, self.local_addr()) {
            node.remove_listener_port(addr.port());
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Admission for one accepted connection: connection limit, then the
    /// authorization hook; on refusal the socket is dropped before any
    /// request is decoded.
    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!(%peer, "connection limit reached, rejecting");
            return;
        }

        if let Some(authorizer) = &self.authorizer {
            if !authorizer.authorize(peer) {
                tracing::warn!(%peer, "refuse RPC connect");
                return;
            }
        }
        tracing::info!(%peer, "accept RPC connect");

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let registry = self.registry.clone();
        let stats_sink = self.stats_sink.clone();
        let workers = self.workers.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let result = Self::handle_connection(
                stream, peer, registry, stats_sink, workers, stats.clone(), config, shutdown,
            )
            .await;
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "connection error");
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(%peer, "client disconnected");
        });
    }

    /// Drives one connection: decode requests off the I/O task and submit
    /// each to the worker pool. Codec faults close this connection only.
    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<Registry>,
        stats_sink: Option<Arc<dyn StatsSink>>,
        workers: Arc<Semaphore>,
        stats: Arc<ServerStats>,
        config: ServerConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(config.tcp_nodelay).ok();
        let conn_id = Uuid::new_v4();
        let (mut read_half, write_half) = stream.into_split();
        let conn = Arc::new(ResponseWriter::new(
            peer,
            write_half,
            Encoder::new(config.max_payload_bytes),
        ));
        let mut decoder = Decoder::new(config.max_payload_bytes);
        let mut buf = vec![0u8; config.read_buffer_size];

        loop {
            tokio::select! {
                result = read_half.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!(conn = %conn_id, %peer, "connection closed by client");
                            conn.mark_closed();
                            return Ok(());
                        }
                        Ok(n) => decoder.extend(&buf[..n]),
                        Err(e) => {
                            conn.mark_closed();
                            return Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown.recv() => {
                    conn.mark_closed();
                    return Err(ServerError::ShuttingDown);
                }
            }

            loop {
                match decoder.decode_request() {
                    Ok(Some(request)) => {
                        tracing::debug!(
                            conn = %conn_id, %peer,
                            sequence = request.sequence, signature = %request.signature,
                            "request"
                        );
                        stats.requests_total.fetch_add(1, Ordering::Relaxed);

                        // Never invoke the target inline on the I/O task;
                        // excess requests queue for a worker permit.
                        let registry = registry.clone();
                        let stats_sink = stats_sink.clone();
                        let conn = conn.clone();
                        let workers = workers.clone();
                        tokio::spawn(async move {
                            let Ok(_permit) = workers.acquire_owned().await else {
                                return;
                            };
                            worker::execute(registry, stats_sink, conn, request).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Malformed or oversized frames poison the stream;
                        // close this connection, siblings are unaffected.
                        tracing::error!(conn = %conn_id, %peer, error = %e,
                            "protocol error, closing connection");
                        conn.mark_closed();
                        return Err(ServerError::Protocol(e));
                    }
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// The registry this server dispatches against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AddrAllowList;
    use filament_client::{ConnectionConfig, Router, RouterConfig};
    use filament_core::{arg, InvokeError, MethodDef, RpcService, Signature};
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};

    struct Echo;

    impl RpcService for Echo {
        fn interface_name(&self) -> &'static str {
            "Echo"
        }

        fn export(self: Arc<Self>) -> Vec<MethodDef> {
            vec![
                MethodDef::new(Signature::new("Echo", "say", &["String"]), |args| {
                    let text: String = arg(args, 0)?;
                    Ok(json!(text))
                }),
                MethodDef::new(Signature::new("Echo", "touch", &[]), |_| Ok(Value::Null)),
                MethodDef::new(Signature::new("Echo", "boom", &[]), |_| {
                    Err(InvokeError::new("boom"))
                }),
            ]
        }
    }

    fn echo_registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register(Arc::new(Echo)).unwrap();
        Arc::new(registry)
    }

    async fn start_server(server: Server) -> (Arc<Server>, SocketAddr) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let server = Arc::new(server);
        let addr = server.bind().await.unwrap();
        let runner = server.clone();
        tokio::spawn(async move {
            let _ = runner.run().await;
        });
        (server, addr)
    }

    fn test_router() -> Router {
        let config = RouterConfig::default()
            .with_retry_idle(Duration::from_millis(10))
            .with_connection(ConnectionConfig::default().with_call_timeout(Duration::from_secs(5)));
        Router::new(config)
    }

    #[tokio::test]
    async fn test_echo_scenario() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, echo_registry())).await;

        let router = test_router();
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "say", &["String"]);
        let value = router
            .call(&binding, &signature, vec![json!("hi")])
            .await
            .unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[tokio::test]
    async fn test_void_call() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, echo_registry())).await;

        let router = test_router();
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "touch", &[]);
        let value = router.call(&binding, &signature, vec![]).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_no_such_method_is_error_response_with_signature() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, echo_registry())).await;

        let router = test_router();
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "shout", &["String"]);
        let err = router
            .call(&binding, &signature, vec![json!("hi")])
            .await
            .unwrap_err();

        match err {
            filament_client::ClientError::RemoteInvocationFailed(text) => {
                assert!(text.contains("Echo.shout(String)"));
            }
            other => panic!("expected RemoteInvocationFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_remote_invocation_failure_not_retried() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, echo_registry())).await;

        // Long retry idle: if a retry happened, this test would hang on it.
        let router_config = RouterConfig::default().with_retry_idle(Duration::from_secs(60));
        let router = Router::new(router_config);
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "boom", &[]);

        let started = Instant::now();
        let err = router.call(&binding, &signature, vec![]).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_concurrent_calls_correlate_by_sequence() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, echo_registry())).await;

        let router = Arc::new(test_router());
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();

        let mut calls = Vec::new();
        for i in 0..32 {
            let router = router.clone();
            let binding = binding.clone();
            calls.push(tokio::spawn(async move {
                let signature = Signature::new("Echo", "say", &["String"]);
                let value = router
                    .call(&binding, &signature, vec![json!(format!("msg-{i}"))])
                    .await
                    .unwrap();
                (i, value)
            }));
        }

        for call in calls {
            let (i, value) = call.await.unwrap();
            // Each caller got exactly its own response back.
            assert_eq!(value, json!(format!("msg-{i}")));
        }
    }

    #[tokio::test]
    async fn test_authorization_refusal_closes_connection() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::new(config, echo_registry())
            .with_authorizer(Arc::new(AddrAllowList::new(vec!["192.0.2.1"
                .parse()
                .unwrap()])));
        let (_server, addr) = start_server(server).await;

        let router_config = RouterConfig::default()
            .with_max_retries(1)
            .with_retry_idle(Duration::from_millis(10));
        let router = Router::new(router_config);
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "say", &["String"]);

        let err = router
            .call(&binding, &signature, vec![json!("hi")])
            .await
            .unwrap_err();
        // Refused connections never produce a response; the client sees a
        // connection-class failure after its retries are exhausted.
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_stats_recorded() {
        let registry = echo_registry();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (_server, addr) = start_server(Server::new(config, registry.clone())).await;

        let router = test_router();
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let say = Signature::new("Echo", "say", &["String"]);
        let boom = Signature::new("Echo", "boom", &[]);

        router.call(&binding, &say, vec![json!("a")]).await.unwrap();
        router.call(&binding, &say, vec![json!("b")]).await.unwrap();
        let _ = router.call(&binding, &boom, vec![]).await;

        let snapshot = registry.stats_snapshot();
        let say_stats = snapshot
            .iter()
            .find(|s| s.signature == "Echo.say(String)")
            .unwrap();
        assert_eq!(say_stats.calls, 2);
        assert_eq!(say_stats.errors, 0);
        let boom_stats = snapshot
            .iter()
            .find(|s| s.signature == "Echo.boom()")
            .unwrap();
        assert_eq!(boom_stats.calls, 1);
        assert_eq!(boom_stats.errors, 1);
    }

    #[tokio::test]
    async fn test_external_stats_sink_notified() {
        use std::sync::atomic::AtomicU64;

        #[derive(Default)]
        struct CountingSink {
            recorded: AtomicU64,
        }

        impl StatsSink for CountingSink {
            fn on_invocation_recorded(
                &self,
                _signature: &str,
                _start: Instant,
                _end: Instant,
                _success: bool,
            ) {
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }
        }

        let sink = Arc::new(CountingSink::default());
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::new(config, echo_registry()).with_stats_sink(sink.clone());
        let (_server, addr) = start_server(server).await;

        let router = test_router();
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();
        let signature = Signature::new("Echo", "say", &["String"]);
        router
            .call(&binding, &signature, vec![json!("x")])
            .await
            .unwrap();

        assert_eq!(sink.recorded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_local_node_port_registered_on_bind() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let node = LocalNode::new(registry);

        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::with_local_node(config, node.clone());
        let (_server, addr) = start_server(server).await;

        assert!(node.has_listener_port(addr.port()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let (server, _addr) = start_server(Server::new(config, echo_registry())).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());
        server.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_running());
    }
}

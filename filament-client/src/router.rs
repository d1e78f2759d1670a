//! Call routing: proxy bindings, the local-call shortcut, and retry.
//!
//! For a given (interface, host, port) the router decides once whether the
//! target is hosted in the current process - in which case calls bind
//! directly to the local dispatch target, skipping serialization and the
//! network - or must go over a pooled connection. Remote calls are wrapped
//! with bounded retry on connection-class failures only.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use crate::pool::ConnectionPool;
use dashmap::DashMap;
use filament_core::{LocalNode, Signature};
use filament_protocol::Request;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Router configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Additional attempts after a connection-class failure.
    pub max_retries: u32,
    /// Sleep between attempts.
    pub retry_idle: Duration,
    /// Configuration applied to every pooled connection.
    pub connection: ConnectionConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_idle: Duration::from_secs(1),
            connection: ConnectionConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_idle(mut self, retry_idle: Duration) -> Self {
        self.retry_idle = retry_idle;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}

/// Where calls for one (interface, host, port) triple go. Chosen once at
/// bind time and immutable for the process lifetime.
#[derive(Clone)]
enum CallTarget {
    /// Hosted in this process: direct dispatch, no network.
    Local { node: Arc<LocalNode> },
    /// Remote endpoint reached through the pooled connection.
    Remote { addr: SocketAddr },
}

/// A memoized proxy binding.
#[derive(Clone)]
pub struct Binding {
    interface: String,
    target: CallTarget,
}

impl Binding {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_local(&self) -> bool {
        matches!(self.target, CallTarget::Local { .. })
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.target {
            CallTarget::Local { .. } => "local".to_string(),
            CallTarget::Remote { addr } => addr.to_string(),
        };
        f.debug_struct("Binding")
            .field("interface", &self.interface)
            .field("target", &target)
            .finish()
    }
}

/// The client-side call router.
pub struct Router {
    config: RouterConfig,
    pool: ConnectionPool,
    bindings: DashMap<String, Binding>,
    node: Option<Arc<LocalNode>>,
}

impl Router {
    /// A router with no local node: every binding is remote.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            pool: ConnectionPool::new(config.connection.clone()),
            config,
            bindings: DashMap::new(),
            node: None,
        }
    }

    /// A router that can shortcut calls to services hosted by `node`.
    pub fn with_local_node(config: RouterConfig, node: Arc<LocalNode>) -> Self {
        Self {
            pool: ConnectionPool::new(config.connection.clone()),
            config,
            bindings: DashMap::new(),
            node: Some(node),
        }
    }

    /// Resolves the binding for (interface, host, port), memoized per triple.
    ///
    /// The target is local only when the host resolves to one of this
    /// machine's addresses, the port belongs to a listener of this process,
    /// and a local implementation of `interface` is registered. A local
    /// implementation that is not marked remotely callable is a
    /// configuration error raised here, never a silent fallthrough to the
    /// network path.
    pub async fn bind(
        &self,
        interface: &str,
        host: &str,
        port: u16,
    ) -> Result<Binding, ClientError> {
        let key = format!("{interface}@{host}:{port}");
        if let Some(binding) = self.bindings.get(&key) {
            return Ok(binding.clone());
        }

        let target = format!("{host}:{port}");
        let addr = tokio::net::lookup_host(target.clone())
            .await
            .map_err(|e| ClientError::Resolve {
                target: target.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ClientError::Resolve {
                target,
                reason: "no addresses".to_string(),
            })?;

        let call_target = self.classify(interface, addr, port)?;
        let binding = Binding {
            interface: interface.to_string(),
            target: call_target,
        };
        if binding.is_local() {
            tracing::debug!(interface, host, port, "target is local, RPC disabled");
        }
        self.bindings.insert(key, binding.clone());
        Ok(binding)
    }

    fn classify(
        &self,
        interface: &str,
        addr: SocketAddr,
        port: u16,
    ) -> Result<CallTarget, ClientError> {
        if let Some(node) = &self.node {
            if LocalNode::is_local_ip(addr.ip()) && node.has_listener_port(port) {
                match node.registry().interface_callable(interface) {
                    Some(true) => {
                        return Ok(CallTarget::Local { node: node.clone() });
                    }
                    Some(false) => {
                        return Err(ClientError::NotRemotelyCallable {
                            interface: interface.to_string(),
                        });
                    }
                    None => {}
                }
            }
        }
        Ok(CallTarget::Remote { addr })
    }

    /// Invokes `signature` through `binding` with no trace context.
    pub async fn call(
        &self,
        binding: &Binding,
        signature: &Signature,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.call_traced(binding, signature, args, None).await
    }

    /// Invokes `signature` through `binding`, propagating `trace` to the
    /// server for log correlation.
    pub async fn call_traced(
        &self,
        binding: &Binding,
        signature: &Signature,
        args: Vec<Value>,
        trace: Option<HashMap<String, String>>,
    ) -> Result<Value, ClientError> {
        match &binding.target {
            CallTarget::Local { node } => Self::call_local(node, signature, &args),
            CallTarget::Remote { addr } => {
                self.call_remote(*addr, signature, args, trace).await
            }
        }
    }

    fn call_local(
        node: &LocalNode,
        signature: &Signature,
        args: &[Value],
    ) -> Result<Value, ClientError> {
        let entry = node.registry().lookup(signature.as_str()).ok_or_else(|| {
            ClientError::RemoteInvocationFailed(format!("no such method: {signature}"))
        })?;
        entry
            .invoke(args)
            .map_err(|e| ClientError::RemoteInvocationFailed(e.to_string()))
    }

    /// Remote path with bounded retry: up to `max_retries` additional
    /// attempts on connection-class failures, sleeping `retry_idle` between
    /// attempts. Any other failure propagates immediately, and the final
    /// attempt's failure is always propagated.
    async fn call_remote(
        &self,
        addr: SocketAddr,
        signature: &Signature,
        args: Vec<Value>,
        trace: Option<HashMap<String, String>>,
    ) -> Result<Value, ClientError> {
        let mut attempt = 0u32;
        loop {
            let result = self.attempt(addr, signature, &args, trace.clone()).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_connection_failure() => {
                    self.pool.discard(addr);
                    if attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    tracing::warn!(
                        %addr, %signature, attempt, error = %e,
                        "connection failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_idle).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        addr: SocketAddr,
        signature: &Signature,
        args: &[Value],
        trace: Option<HashMap<String, String>>,
    ) -> Result<Value, ClientError> {
        let conn = self.pool.get(addr).await?;
        let request = Request::new(signature.as_str(), args.to_vec()).with_trace(trace);
        let response = conn.call(request).await?;
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// The underlying per-endpoint connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_core::{arg, InvokeError, MethodDef, Registry, RpcService};
    use serde_json::json;
    use std::time::Instant;
    use tokio::net::TcpListener;

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
                MethodDef::new(Signature::new("Echo", "fail", &[]), |_| {
                    Err(InvokeError::new("echo deliberately failed"))
                }),
            ]
        }
    }

    struct Hidden;

    impl RpcService for Hidden {
        fn interface_name(&self) -> &'static str {
            "Hidden"
        }

        fn export(self: Arc<Self>) -> Vec<MethodDef> {
            vec![]
        }

        fn remotely_callable(&self) -> bool {
            false
        }
    }

    fn local_node() -> Arc<LocalNode> {
        let mut registry = Registry::new();
        registry.register(Arc::new(Echo)).unwrap();
        registry.register(Arc::new(Hidden)).unwrap();
        LocalNode::new(registry)
    }

    #[tokio::test]
    async fn test_local_shortcut_dispatches_without_network() {
        let node = local_node();
        node.add_listener_port(7320);

        // No listener is running; a network path would fail.
        let router = Router::with_local_node(RouterConfig::default(), node);
        let binding = router.bind("Echo", "127.0.0.1", 7320).await.unwrap();
        assert!(binding.is_local());

        let signature = Signature::new("Echo", "say", &["String"]);
        let value = router
            .call(&binding, &signature, vec![json!("hi")])
            .await
            .unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[tokio::test]
    async fn test_local_invocation_failure_propagates() {
        let node = local_node();
        node.add_listener_port(7320);
        let router = Router::with_local_node(RouterConfig::default(), node);
        let binding = router.bind("Echo", "127.0.0.1", 7320).await.unwrap();

        let signature = Signature::new("Echo", "fail", &[]);
        let err = router.call(&binding, &signature, vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::RemoteInvocationFailed(_)));
        assert!(err.to_string().contains("echo deliberately failed"));
    }

    #[tokio::test]
    async fn test_not_remotely_callable_is_bind_error() {
        let node = local_node();
        node.add_listener_port(7320);
        let router = Router::with_local_node(RouterConfig::default(), node);

        let err = router.bind("Hidden", "127.0.0.1", 7320).await.unwrap_err();
        assert!(matches!(err, ClientError::NotRemotelyCallable { .. }));
    }

    #[tokio::test]
    async fn test_unknown_interface_falls_through_to_remote() {
        let node = local_node();
        node.add_listener_port(7320);
        let router = Router::with_local_node(RouterConfig::default(), node);

        let binding = router.bind("Ledger", "127.0.0.1", 7320).await.unwrap();
        assert!(!binding.is_local());
    }

    #[tokio::test]
    async fn test_foreign_port_is_remote() {
        let node = local_node();
        node.add_listener_port(7320);
        let router = Router::with_local_node(RouterConfig::default(), node);

        // Right interface, but no listener of ours on that port.
        let binding = router.bind("Echo", "127.0.0.1", 9999).await.unwrap();
        assert!(!binding.is_local());
    }

    #[tokio::test]
    async fn test_binding_memoized() {
        let node = local_node();
        node.add_listener_port(7320);
        let router = Router::with_local_node(RouterConfig::default(), node.clone());

        let first = router.bind("Echo", "127.0.0.1", 7320).await.unwrap();
        // Even if the port later disappears, the memoized choice stands.
        node.remove_listener_port(7320);
        let second = router.bind("Echo", "127.0.0.1", 7320).await.unwrap();
        assert!(first.is_local());
        assert!(second.is_local());
    }

    #[tokio::test]
    async fn test_retries_connection_failures_then_propagates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = RouterConfig::default()
            .with_max_retries(2)
            .with_retry_idle(Duration::from_millis(20));
        let router = Router::new(config);
        let binding = router.bind("Echo", "127.0.0.1", addr.port()).await.unwrap();

        let signature = Signature::new("Echo", "say", &["String"]);
        let started = Instant::now();
        let err = router
            .call(&binding, &signature, vec![json!("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::ConnectFailed { .. }));
        // Two retries means two sleeps between three attempts.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let router = Router::new(RouterConfig::default());
        let result = router.bind("Echo", "host.invalid.", 7320).await;
        assert!(matches!(result, Err(ClientError::Resolve { .. })));
    }
}

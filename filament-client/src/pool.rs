//! Per-endpoint connection cache.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Caches at most one live connection per remote endpoint.
///
/// Connections are created lazily on first use and discarded on disconnect
/// or failure, so the next call rebuilds them.
pub struct ConnectionPool {
    config: ConnectionConfig,
    connections: DashMap<SocketAddr, Arc<Connection>>,
    /// Serializes connection establishment so concurrent first callers to
    /// the same endpoint share one socket.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the live connection for `addr`, establishing one if absent
    /// or dead.
    pub async fn get(&self, addr: SocketAddr) -> Result<Arc<Connection>, ClientError> {
        if let Some(conn) = self.live(addr) {
            return Ok(conn);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(conn) = self.live(addr) {
            return Ok(conn);
        }

        let conn = Connection::establish(addr, self.config.clone()).await?;
        self.connections.insert(addr, conn.clone());
        Ok(conn)
    }

    fn live(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        let conn = self.connections.get(&addr)?;
        if conn.is_active() {
            Some(conn.clone())
        } else {
            None
        }
    }

    /// Evicts the cached connection for `addr` after a failure.
    pub fn discard(&self, addr: SocketAddr) {
        self.connections.remove(&addr);
    }

    /// Number of cached endpoints (live or not yet evicted).
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every cached connection.
    pub async fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close().await;
        }
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_get_caches_single_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                sockets.push(stream);
            }
        });

        let pool = ConnectionPool::new(ConnectionConfig::default());
        let first = pool.get(addr).await.unwrap();
        let second = pool.get(addr).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);

        pool.discard(addr);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_get_propagates_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = ConnectionPool::new(ConnectionConfig::default());
        let result = pool.get(addr).await;
        assert!(matches!(result, Err(ClientError::ConnectFailed { .. })));
        assert!(pool.is_empty());
    }
}

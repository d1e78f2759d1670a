//! Client error types.

use filament_protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// Client errors.
///
/// Only the connection-failure class (`ConnectFailed`, `ConnectionInactive`,
/// `ConnectionLost`) is retried by the router; every other failure
/// propagates immediately.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Initial socket establishment failed. Fatal to the connection object;
    /// retries are the router's responsibility.
    #[error("connect to RPC server {addr} FAILED: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    /// The socket was known dead before the call attempted any I/O.
    #[error("connection to RPC server {addr} is INACTIVE")]
    ConnectionInactive { addr: SocketAddr },

    /// The connection dropped while the call was waiting for its response.
    #[error("connection to RPC server {addr} is LOST")]
    ConnectionLost { addr: SocketAddr },

    /// No response arrived within the configured wait. The server may still
    /// be processing; never retried automatically.
    #[error("RPC call {signature} (sequence {sequence}) timed out after {waited_ms} ms")]
    CallTimedOut {
        signature: String,
        sequence: u64,
        waited_ms: u64,
    },

    /// The server executed the method and it raised; carries the remote
    /// failure description. Never retried.
    #[error("RPC remote invocation failed: {0}")]
    RemoteInvocationFailed(String),

    /// A codec or transport exception occurred on the connection while the
    /// call was pending.
    #[error("RPC transport failed while call was pending: {0}")]
    LocalTransportFailed(String),

    /// The target host could not be resolved at bind time.
    #[error("cannot resolve RPC target {target}: {reason}")]
    Resolve { target: String, reason: String },

    /// The target resolves to this process, but the local implementation is
    /// not marked remotely callable. Raised at bind time, never silently
    /// falling through to the network path.
    #[error("local implementation of {interface} is not marked remotely callable")]
    NotRemotelyCallable { interface: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Whether this failure is in the class the router's retry policy
    /// applies to.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed { .. }
                | ClientError::ConnectionInactive { .. }
                | ClientError::ConnectionLost { .. }
        )
    }
}

//! # filament-client
//!
//! Client side of filament.
//!
//! This crate provides:
//! - A multiplexed full-duplex connection with sequence correlation
//! - A per-endpoint connection pool with lazy establishment
//! - The call router: proxy bindings, local-call shortcut, bounded retry

pub mod connection;
pub mod error;
pub mod pool;
pub mod router;

pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use pool::ConnectionPool;
pub use router::{Binding, Router, RouterConfig};

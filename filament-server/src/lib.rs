//! # filament-server
//!
//! Server side of filament.
//!
//! This crate provides:
//! - The TCP listener with per-connection authorization
//! - Request decoding off the worker pool, invocation on it
//! - Bounded worker dispatch with same-worker response write-back
//! - YAML/environment server configuration

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
mod worker;

pub use auth::{AddrAllowList, Authorizer};
pub use config::{Config, ConfigError, DispatchConfig, LimitsConfig, NetworkConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats};

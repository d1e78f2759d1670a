//! # filament-core
//!
//! Dispatch registry for filament.
//!
//! This crate provides:
//! - Method signatures shared between caller and callee
//! - The service/method model for registering invocable targets
//! - The signature -> target dispatch registry with duplicate rejection
//! - Per-signature invocation statistics
//! - Local-node bookkeeping for the client's local-call shortcut

pub mod error;
pub mod node;
pub mod registry;
pub mod service;
pub mod signature;
pub mod stats;

pub use error::{CoreError, InvokeError};
pub use node::LocalNode;
pub use registry::{DispatchEntry, Registry};
pub use service::{arg, MethodDef, RpcService};
pub use signature::Signature;
pub use stats::{MethodStats, MethodStatsSnapshot, StatsSink};

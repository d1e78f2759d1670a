//! # filament-protocol
//!
//! Wire protocol implementation for filament.
//!
//! This crate provides:
//! - Binary framing with a 4-byte big-endian length prefix
//! - Gzip-compressed JSON payloads
//! - Request/Response envelope types with sequence correlation
//! - Protocol error types

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, LENGTH_PREFIX_SIZE};
pub use message::{Request, Response};

/// Default port for filament servers.
pub const DEFAULT_PORT: u16 = 7320;

/// Default maximum payload size (10 MiB).
///
/// Shared by client and server; bounds memory use against a malicious or
/// buggy peer. Fixed at process start.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 10 * 1024 * 1024;

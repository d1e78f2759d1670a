//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
///
/// `MalformedLength` and `OversizedPayload` are connection-fatal: the
/// connection that produced them must be closed without resynchronization.
/// Other connections are unaffected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame length {length} (valid range is 1..={max})")]
    MalformedLength { length: u64, max: u32 },

    #[error("oversized payload: {size} bytes (max {max})")]
    OversizedPayload { size: u64, max: u32 },

    #[error("compression error: {0}")]
    Compression(std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns whether this error must terminate the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedLength { .. } | ProtocolError::OversizedPayload { .. }
        )
    }
}

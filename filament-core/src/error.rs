//! Registry and invocation error types.

use thiserror::Error;

/// Errors raised by the dispatch registry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two targets were registered under the same signature. This is a
    /// startup-time misconfiguration; the registry refuses to start rather
    /// than pick one arbitrarily.
    #[error(
        "duplicate registration for signature {signature}: \
         already mapped to {existing}, cannot also map to {attempted}"
    )]
    DuplicateRegistration {
        signature: String,
        existing: String,
        attempted: String,
    },
}

/// A failure raised by an invoked service method.
///
/// Carries the failure description that is sent back to the caller in the
/// response's `error` field.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvokeError(String);

impl InvokeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for InvokeError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for InvokeError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

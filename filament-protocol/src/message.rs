//! Request and response envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An RPC request.
///
/// `sequence` is assigned by the sending connection (monotonically
/// increasing, unique per connection instance) and mirrored back in the
/// matching [`Response`]. The request is immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation sequence, assigned by the sending connection.
    pub sequence: u64,

    /// Method signature identifying the dispatch target on the server.
    pub signature: String,

    /// Ordered argument values.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Trace context propagated to the server for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<HashMap<String, String>>,
}

impl Request {
    /// Creates a request with an unassigned sequence.
    pub fn new(signature: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sequence: 0,
            signature: signature.into(),
            args,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<HashMap<String, String>>) -> Self {
        self.trace = trace;
        self
    }
}

/// An RPC response, correlated to its request by `sequence`.
///
/// At most one of `result`/`error` is present; both absent means a void
/// successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence of the request this response answers.
    pub sequence: u64,

    /// Invocation result (absent for void calls and failures).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Remote failure description (absent on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a successful response. `result` is `None` for void calls.
    pub fn ok(sequence: u64, result: Option<Value>) -> Self {
        Self {
            sequence,
            result,
            error: None,
        }
    }

    /// Creates an error response carrying the remote failure description.
    pub fn error(sequence: u64, error: impl Into<String>) -> Self {
        Self {
            sequence,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

//! Method signatures.

use std::fmt;

/// A string uniquely identifying a remotely callable method: declaring
/// interface, method name, and ordered parameter type names, rendered as
/// `Interface.method(T1,T2)`.
///
/// The rendering must be identical when computed on the caller and callee
/// sides - it is the only method metadata that crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Builds a signature from its parts.
    pub fn new(interface: &str, method: &str, param_types: &[&str]) -> Self {
        Self(format!("{interface}.{method}({})", param_types.join(",")))
    }

    /// Wraps an already-rendered signature string.
    pub fn from_rendered(rendered: impl Into<String>) -> Self {
        Self(rendered.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The declaring interface portion, if the rendering is well formed.
    pub fn interface(&self) -> Option<&str> {
        let paren = self.0.find('(')?;
        let dot = self.0[..paren].rfind('.')?;
        Some(&self.0[..dot])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.0
    }
}

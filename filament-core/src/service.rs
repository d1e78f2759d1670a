//! Service and method model.
//!
//! A service object exports its remotely callable methods as a list of
//! [`MethodDef`]s: a signature plus a closure capturing the receiver. The
//! embedding application supplies the registration call list at startup;
//! the registry only needs "here are the objects and the methods they
//! export", not how they were discovered.

use crate::error::InvokeError;
use crate::signature::Signature;
use serde_json::Value;
use std::sync::Arc;

/// The invocable half of a dispatch entry.
pub type MethodFn = Arc<dyn Fn(&[Value]) -> Result<Value, InvokeError> + Send + Sync>;

/// One exported method: a signature and the closure that invokes it.
pub struct MethodDef {
    signature: Signature,
    invoke: MethodFn,
}

impl MethodDef {
    pub fn new<F>(signature: Signature, invoke: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        Self {
            signature,
            invoke: Arc::new(invoke),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn into_parts(self) -> (Signature, MethodFn) {
        (self.signature, self.invoke)
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("signature", &self.signature)
            .finish()
    }
}

/// A service object whose methods can be dispatched.
///
/// Implementations are registered once at startup, before any listener
/// binds. `remotely_callable` marks whether the object may be reached over
/// the wire (and through the client's local-call shortcut); an object that
/// returns `false` is recorded as present but exports nothing.
pub trait RpcService: Send + Sync + 'static {
    /// Name of the service-facing interface this object implements.
    fn interface_name(&self) -> &'static str;

    /// The methods this object exports, with closures capturing the receiver.
    fn export(self: Arc<Self>) -> Vec<MethodDef>;

    /// Whether this object may be called remotely.
    fn remotely_callable(&self) -> bool {
        true
    }
}

/// Deserializes the argument at `index`, reporting a descriptive
/// [`InvokeError`] on absence or type mismatch.
///
/// Intended for use inside [`MethodDef`] closures:
///
/// ```
/// # use filament_core::{arg, InvokeError};
/// # use serde_json::json;
/// # fn demo() -> Result<(), InvokeError> {
/// let args = vec![json!("hi")];
/// let text: String = arg(&args, 0)?;
/// # Ok(())
/// # }
/// ```
pub fn arg<T: serde::de::DeserializeOwned>(args: &[Value], index: usize) -> Result<T, InvokeError> {
    let value = args
        .get(index)
        .ok_or_else(|| InvokeError::new(format!("missing argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| InvokeError::new(format!("argument {index}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arg_extraction() {
        let args = vec![json!("hello"), json!(5)];
        let text: String = arg(&args, 0).unwrap();
        let count: u32 = arg(&args, 1).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(count, 5);
    }

    #[test]
    fn test_arg_missing() {
        let args = vec![json!(1)];
        let result: Result<String, _> = arg(&args, 3);
        assert!(result.unwrap_err().to_string().contains("missing argument 3"));
    }

    #[test]
    fn test_arg_type_mismatch() {
        let args = vec![json!("not a number")];
        let result: Result<u64, _> = arg(&args, 0);
        assert!(result.unwrap_err().to_string().contains("argument 0"));
    }

    #[test]
    fn test_method_def_invoke() {
        let def = MethodDef::new(Signature::new("Echo", "say", &["String"]), |args| {
            let text: String = arg(args, 0)?;
            Ok(json!(text))
        });
        assert_eq!(def.signature().as_str(), "Echo.say(String)");

        let (_, invoke) = def.into_parts();
        let out = invoke(&[json!("hi")]).unwrap();
        assert_eq!(out, json!("hi"));
    }
}

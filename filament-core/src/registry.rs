//! The signature -> invocable target dispatch registry.

use crate::error::{CoreError, InvokeError};
use crate::service::{MethodFn, RpcService};
use crate::signature::Signature;
use crate::stats::{MethodStats, MethodStatsSnapshot};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered dispatch target: signature, invocation closure, and the
/// per-signature invocation statistics.
pub struct DispatchEntry {
    signature: Signature,
    provider: &'static str,
    invoke: MethodFn,
    stats: MethodStats,
}

impl DispatchEntry {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Invokes the target with the request's arguments.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, InvokeError> {
        (self.invoke)(args)
    }

    pub fn stats(&self) -> &MethodStats {
        &self.stats
    }
}

impl std::fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("signature", &self.signature)
            .field("provider", &self.provider)
            .finish()
    }
}

/// The dispatch registry: an immutable, post-startup mapping from method
/// signature to invocable target.
///
/// Built by registering every service object before the listener binds.
/// Lookups at steady state take no locks; mutation is not exposed as a
/// live-reload capability.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, DispatchEntry>,
    /// Interface name -> remotely-callable flag, for every registered
    /// service (including ones that export nothing).
    interfaces: HashMap<String, bool>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service object, adding one dispatch entry per exported
    /// method.
    ///
    /// A signature that is already mapped - by an earlier service or within
    /// this one - fails the whole registration with
    /// [`CoreError::DuplicateRegistration`]; no method of the rejected
    /// service is left registered.
    pub fn register(&mut self, service: Arc<dyn RpcService>) -> Result<(), CoreError> {
        let interface = service.interface_name();
        let callable = service.remotely_callable();
        self.interfaces.insert(interface.to_string(), callable);

        if !callable {
            tracing::debug!(interface, "service registered as not remotely callable");
            return Ok(());
        }

        let defs = service.export();

        // Validate before inserting so a duplicate leaves nothing half-registered.
        {
            let mut seen: Vec<&str> = Vec::with_capacity(defs.len());
            for def in &defs {
                let signature = def.signature().as_str();
                if let Some(existing) = self.entries.get(signature) {
                    return Err(CoreError::DuplicateRegistration {
                        signature: signature.to_string(),
                        existing: existing.provider.to_string(),
                        attempted: interface.to_string(),
                    });
                }
                if seen.contains(&signature) {
                    return Err(CoreError::DuplicateRegistration {
                        signature: signature.to_string(),
                        existing: interface.to_string(),
                        attempted: interface.to_string(),
                    });
                }
                seen.push(signature);
            }
        }

        for def in defs {
            let (signature, invoke) = def.into_parts();
            tracing::debug!(signature = %signature, interface, "registered dispatch target");
            self.entries.insert(
                signature.as_str().to_string(),
                DispatchEntry {
                    signature,
                    provider: interface,
                    invoke,
                    stats: MethodStats::default(),
                },
            );
        }
        Ok(())
    }

    /// Looks up the dispatch target for a signature.
    ///
    /// `None` is a normal, recoverable outcome - the server answers it with
    /// a "no such method" error response.
    pub fn lookup(&self, signature: &str) -> Option<&DispatchEntry> {
        self.entries.get(signature)
    }

    /// Whether an implementation of `interface` was registered, and if so
    /// whether it is remotely callable.
    pub fn interface_callable(&self, interface: &str) -> Option<bool> {
        self.interfaces.get(interface).copied()
    }

    /// Number of registered dispatch targets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A read-only snapshot of per-signature invocation statistics, for
    /// display by ops tooling. Sorted by signature.
    pub fn stats_snapshot(&self) -> Vec<MethodStatsSnapshot> {
        let mut snapshot: Vec<_> = self
            .entries
            .values()
            .map(|entry| entry.stats.snapshot(entry.signature.as_str()))
            .collect();
        snapshot.sort_by(|a, b| a.signature.cmp(&b.signature));
        snapshot
    }
}

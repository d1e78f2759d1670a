//! Local-node bookkeeping for the client's local-call shortcut.

use crate::registry::Registry;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;

/// What this process exposes: the dispatch registry plus the set of ports
/// its listeners are bound to.
///
/// The client router consults a `LocalNode` to decide whether a
/// (interface, host, port) target is actually hosted in the current process,
/// in which case calls bind directly to the dispatch target with no
/// serialization and no network hop.
#[derive(Debug)]
pub struct LocalNode {
    registry: Arc<Registry>,
    listener_ports: RwLock<HashSet<u16>>,
}

impl LocalNode {
    /// Wraps a fully built registry. Registration is finished before the
    /// node is shared, so the registry needs no further locking.
    pub fn new(registry: Registry) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(registry),
            listener_ports: RwLock::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records a port a listener of this process is bound to.
    pub fn add_listener_port(&self, port: u16) {
        self.listener_ports.write().insert(port);
    }

    /// Removes a port when its listener shuts down.
    pub fn remove_listener_port(&self, port: u16) {
        self.listener_ports.write().remove(&port);
    }

    pub fn has_listener_port(&self, port: u16) -> bool {
        self.listener_ports.read().contains(&port)
    }

    /// Whether `ip` is one of this host's own addresses.
    ///
    /// Loopback is always local; any other address is probed by attempting a
    /// local bind. Multi-homed hosts or NAT can misclassify a genuinely
    /// remote peer as local - this check is environment-sensitive, not a
    /// correctness guarantee.
    pub fn is_local_ip(ip: IpAddr) -> bool {
        if ip.is_loopback() {
            return true;
        }
        UdpSocket::bind((ip, 0)).is_ok()
    }
}

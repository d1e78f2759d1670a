//! # filament
//!
//! A binary RPC framework: a process exposes service objects over
//! long-lived, full-duplex TCP connections, and a remote process invokes
//! their methods as if calling a local interface.
//!
//! This facade crate re-exports the workspace members:
//! - [`protocol`] - wire framing and the payload codec
//! - [`core`] - the dispatch registry and service model
//! - [`server`] - the listener and worker dispatch
//! - [`client`] - the connection multiplexer and call router
//!
//! ## Exposing a service
//!
//! ```no_run
//! use filament::core::{arg, MethodDef, Registry, RpcService, Signature};
//! use filament::server::{Server, ServerConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl RpcService for Echo {
//!     fn interface_name(&self) -> &'static str {
//!         "Echo"
//!     }
//!
//!     fn export(self: Arc<Self>) -> Vec<MethodDef> {
//!         vec![MethodDef::new(
//!             Signature::new("Echo", "say", &["String"]),
//!             |args| {
//!                 let text: String = arg(args, 0)?;
//!                 Ok(json!(text))
//!             },
//!         )]
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new();
//! registry.register(Arc::new(Echo))?;
//!
//! let server = Server::new(ServerConfig::default(), Arc::new(registry));
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Calling it
//!
//! ```no_run
//! use filament::client::{Router, RouterConfig};
//! use filament::core::Signature;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::new(RouterConfig::default());
//! let binding = router.bind("Echo", "rpc.example.net", 7320).await?;
//! let signature = Signature::new("Echo", "say", &["String"]);
//! let reply = router.call(&binding, &signature, vec![json!("hi")]).await?;
//! assert_eq!(reply, json!("hi"));
//! # Ok(())
//! # }
//! ```

pub use filament_client as client;
pub use filament_core as core;
pub use filament_protocol as protocol;
pub use filament_server as server;

pub use filament_client::{ClientError, Router, RouterConfig};
pub use filament_core::{LocalNode, Registry, RpcService, Signature};
pub use filament_protocol::{Request, Response};
pub use filament_server::{Server, ServerConfig};

//! # Barricade - Network Fault Injection Engine
//!
//! Barricade partitions a set of network endpoints into isolated groups
//! and independently degrades each endpoint's network quality (packet
//! loss, added latency) or restores it to normal, for testing distributed
//! systems running in containers.
//!
//! ## Overview
//!
//! The engine is organized around four components:
//!
//! - **CommandBackend**: executes the iptables / traffic-control command
//!   vocabulary on the local host or over SSH
//! - **PartitionEngine**: translates endpoint groupings into firewall
//!   chains and rules
//! - **TrafficShaper**: induces loss/latency on a device and restores it
//! - **SessionStore**: durable, uniquely identified session state
//!
//! The surrounding container lifecycle (creating containers, assigning
//! addresses) is an external collaborator; the engine only needs a list
//! of addressable endpoints per call.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use barricade::{
//!     backend::LocalBackend, Endpoint, Partition, PartitionEngine,
//!     SessionStore, TrafficShaper,
//! };
//!
//! #[tokio::main]
//! async fn main() -> barricade::Result<()> {
//!     let backend = Arc::new(LocalBackend::new());
//!
//!     // Establish session identity; the id namespaces all firewall
//!     // objects this run creates.
//!     let store = SessionStore::in_current_dir();
//!     let session = store.initialize(roster(), None).await?;
//!
//!     // Partition the roster into two isolated groups.
//!     let engine = PartitionEngine::new(backend.clone());
//!     engine.clear(session.id()).await?;
//!     engine.apply(session.id(), &partitions()).await?;
//!
//!     // Degrade one endpoint's device.
//!     let shaper = TrafficShaper::new(backend);
//!     shaper.slow("veth3kfp91Qx").await?;
//!
//!     // Converge back to normal.
//!     engine.clear(session.id()).await?;
//!     store.destroy().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared kernel state
//!
//! Firewall chains and queueing disciplines are global, order-sensitive
//! kernel state. Barricade's discipline for safe sharing is namespacing:
//! every object it creates is named under the session id prefix and
//! deletion never targets anything outside that prefix. Idempotent design
//! (replace-not-append shaping, prefix-scoped deletion) means re-running
//! `clear` then `apply` after an interrupted run converges to the same
//! end state.
//!
//! ## Safety
//!
//! Fault injection mutates live firewall and traffic-control
//! configuration. Use in isolated test environments and destroy sessions
//! when done.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod partition;
pub mod session;
pub mod shaper;

// Re-export main types at crate root for convenience
pub use backend::{CommandBackend, LocalBackend, RemoteHost, SharedBackend, SshBackend};
pub use endpoint::{Endpoint, NetworkState, Partition};
pub use error::{BarricadeError, Result};
pub use partition::{PartitionEngine, FORWARD_CHAIN};
pub use session::{Session, SessionStore};
pub use shaper::{ShapingConfig, ShapingKind, TrafficShaper};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backend::{CommandBackend, LocalBackend, SharedBackend};
    pub use crate::endpoint::{Endpoint, NetworkState, Partition};
    pub use crate::error::{BarricadeError, Result};
    pub use crate::partition::PartitionEngine;
    pub use crate::session::{Session, SessionStore};
    pub use crate::shaper::TrafficShaper;
}

//! OSD Agent - Per-node storage daemon reconciliation
//!
//! Converges the OSDs running on a node with the desired state recorded in
//! a hierarchical key-value store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          OSD Agent                                │
//! │  ┌──────────────┐   ┌─────────────────────┐   ┌───────────────┐   │
//! │  │ Config Guard │──▶│ Provisioning        │──▶│    Pruner     │   │
//! │  │ (one pass)   │   │ dirs: in pass       │   │ applied minus │   │
//! │  └──────────────┘   │ devices: background │   │ desired       │   │
//! │                     └──────────┬──────────┘   └───────┬───────┘   │
//! ├────────────────────────────────┼──────────────────────┼───────────┤
//! │                                ▼                      ▼           │
//! │   Store (desired / applied)   Cluster CLI   Formatter   Processes │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`agent`]: config guard, provisioning pipeline, pruner and lifecycle
//! - [`state`]: desired and applied state over the store
//! - [`domain`]: core domain types and port traits
//! - [`adapters`]: store, cluster CLI, formatter and process implementations
//! - [`config`]: agent configuration
//! - [`metrics`]: reconciliation counters
//! - [`error`]: error types and handling

pub mod adapters;
pub mod agent;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use adapters::{
    CephCliConnection, CephCliFactory, CephOsdInitializer, MemoryStore, ProcessManager,
    SgdiskFormatter,
};

pub use agent::{ConfigGuard, ConfigPermit, OsdAgent, ProcessCache, Pruner};

pub use config::AgentConfig;

pub use domain::model::{ClusterInfo, OsdConfig, OsdId, OsdInfo, RegisteredOsd, SlotKind};

pub use domain::ports::{
    AgentContext, ClusterConnection, ConnectionFactory, DeviceFormatter, KeyValueStore,
    OsdInitializer, ProcessHandle, ProcessSupervisor, ServiceAgent, StartPolicy,
};

pub use error::{Error, ErrorClass, Result};

pub use metrics::{AgentMetrics, AgentMetricsSnapshot};

pub use state::{AppliedRecord, DesiredSlots, OsdState, StoreLayout};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

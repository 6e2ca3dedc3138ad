//! Domain Ports - Core trait definitions for the OSD agent
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the desired-state store, the cluster admin connection,
//! the device formatter, the OSD initializer and the process supervisor.
//! Adapters implement these traits to provide concrete functionality.

use crate::domain::model::{ClusterInfo, OsdConfig, RegisteredOsd};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Desired-State Store Port
// =============================================================================

/// A node of a recursively fetched store subtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNode {
    /// Full key path of this node
    pub key: String,
    /// Value for leaf nodes
    pub value: Option<String>,
    /// Child nodes for directory nodes
    pub children: Vec<StoreNode>,
}

impl StoreNode {
    /// Last path segment of the key
    pub fn leaf_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }

    /// Find a direct child by leaf name
    pub fn child(&self, name: &str) -> Option<&StoreNode> {
        self.children.iter().find(|c| c.leaf_name() == name)
    }
}

/// Port for the hierarchical, strongly-consistent key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a single value. Missing keys yield `Error::KeyNotFound`.
    async fn get(&self, key: &str) -> Result<String>;

    /// Get a whole subtree. Missing keys yield `Error::KeyNotFound`.
    async fn get_tree(&self, key: &str) -> Result<StoreNode>;

    /// Set a value, creating intermediate directories
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key, or a directory and everything below it when `recursive`
    async fn delete(&self, key: &str, recursive: bool) -> Result<()>;
}

// =============================================================================
// Cluster Admin Ports
// =============================================================================

/// Authenticated channel to the storage cluster's control plane
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Register a new OSD identity for the given slot
    async fn register_osd(&self, config: &OsdConfig) -> Result<RegisteredOsd>;

    /// Mark an OSD out so its data starts to migrate
    async fn mark_out(&self, osd_id: u32) -> Result<()>;

    /// Remove an OSD from the placement map and membership
    async fn purge(&self, osd_id: u32) -> Result<()>;

    /// Fetch (creating if needed) the bootstrap-osd keyring contents
    async fn bootstrap_osd_keyring(&self) -> Result<String>;

    /// Release the connection
    async fn shutdown(&self);
}

/// Opens connections to the cluster
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Connect with the admin identity
    async fn connect_admin(
        &self,
        cluster: &ClusterInfo,
        config_dir: &Path,
    ) -> Result<ClusterConnectionRef>;

    /// Connect with the provisioning-only bootstrap-osd identity
    async fn connect_bootstrap(
        &self,
        cluster: &ClusterInfo,
        config_dir: &Path,
        keyring_path: &Path,
    ) -> Result<ClusterConnectionRef>;
}

// =============================================================================
// Provisioning Ports
// =============================================================================

/// Destructive raw-device formatting
#[async_trait]
pub trait DeviceFormatter: Send + Sync {
    /// Format `device`, wiping existing partitions only when `force` is set
    async fn format(&self, device: &str, force: bool) -> Result<()>;
}

/// Full daemon initialization of an OSD data directory
#[async_trait]
pub trait OsdInitializer: Send + Sync {
    /// Write keyring, config and identity files under `config.root_path`.
    /// `connection` is the bootstrap connection of the current run.
    async fn initialize(
        &self,
        config: &OsdConfig,
        cluster: &ClusterInfo,
        location: Option<&str>,
        connection: &dyn ClusterConnection,
    ) -> Result<()>;
}

// =============================================================================
// Process Supervisor Port
// =============================================================================

/// What to do when a process matching the launch pattern is already running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPolicy {
    /// Leave the running process alone and report no new handle
    ReuseExisting,
    /// Kill the running process and start a new one
    ReplaceExisting,
}

/// Handle to a supervised child process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Supervisor-assigned handle id
    pub handle_id: u64,
    /// Logical process name (e.g. "osd")
    pub name: String,
    /// OS process id, if known
    pub pid: Option<u32>,
    /// Pattern that uniquely identifies this instance's command line
    pub launch_pattern: String,
    /// When the process was started
    pub started_at: DateTime<Utc>,
}

/// Launches and stops monitored child processes
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start `name` with `args`. Returns `None` when an existing process
    /// matching `launch_pattern` was reused.
    async fn start(
        &self,
        name: &str,
        launch_pattern: &str,
        policy: StartPolicy,
        args: &[String],
    ) -> Result<Option<ProcessHandle>>;

    /// Stop a running process
    async fn stop(&self, handle: &ProcessHandle) -> Result<()>;
}

// =============================================================================
// Node Agent Port
// =============================================================================

/// Node-local context handed to every lifecycle hook
#[derive(Clone)]
pub struct AgentContext {
    /// This node's id in the store layout
    pub node_id: String,
    /// Local configuration root
    pub config_dir: PathBuf,
    /// Desired-state store
    pub store: KeyValueStoreRef,
    /// Process supervisor
    pub supervisor: ProcessSupervisorRef,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("node_id", &self.node_id)
            .field("config_dir", &self.config_dir)
            .finish()
    }
}

/// Lifecycle hooks invoked by the node-agent framework
#[async_trait]
pub trait ServiceAgent: Send + Sync {
    /// Agent name
    fn name(&self) -> &str;

    /// Seed desired state for local discovery
    async fn initialize(&self, ctx: &AgentContext) -> Result<()>;

    /// Converge local services to desired state
    async fn configure_local_service(&self, ctx: &AgentContext) -> Result<()>;

    /// Stop all local services
    async fn destroy_local_service(&self, ctx: &AgentContext) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type KeyValueStoreRef = Arc<dyn KeyValueStore>;
pub type ClusterConnectionRef = Arc<dyn ClusterConnection>;
pub type ConnectionFactoryRef = Arc<dyn ConnectionFactory>;
pub type DeviceFormatterRef = Arc<dyn DeviceFormatter>;
pub type OsdInitializerRef = Arc<dyn OsdInitializer>;
pub type ProcessSupervisorRef = Arc<dyn ProcessSupervisor>;

//! OSD Agent - Orchestration
//!
//! Wires the config guard, provisioning pipeline and pruner together behind
//! the node-agent lifecycle hooks:
//! - `initialize` seeds desired state for local discovery
//! - `configure_local_service` runs one reconciliation pass
//! - `destroy_local_service` stops every locally supervised OSD

use crate::agent::guard::ConfigGuard;
use crate::agent::osd::{bootstrap_osd_dir, bootstrap_osd_keyring_path};
use crate::agent::processes::ProcessCache;
use crate::agent::provision::{ProvisionSettings, Provisioner};
use crate::agent::prune::Pruner;
use crate::config::AgentConfig;
use crate::domain::model::ClusterInfo;
use crate::domain::ports::{
    AgentContext, ClusterConnection, ClusterConnectionRef, ConnectionFactoryRef,
    DeviceFormatterRef, OsdInitializerRef, ServiceAgent,
};
use crate::error::{Error, Result};
use crate::metrics::AgentMetrics;
use crate::state::{load_cluster_info, DesiredSlots, OsdState, StoreLayout};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const OSD_AGENT_NAME: &str = "osd";

// =============================================================================
// OSD Agent
// =============================================================================

/// Per-node OSD reconciliation agent
pub struct OsdAgent {
    config: AgentConfig,
    layout: StoreLayout,
    factory: ConnectionFactoryRef,
    initializer: OsdInitializerRef,
    formatter: DeviceFormatterRef,
    guard: Arc<ConfigGuard>,
    processes: Arc<ProcessCache>,
    metrics: Arc<AgentMetrics>,
    /// Completion signal of the most recent device unit
    devices_done: Mutex<Option<watch::Receiver<bool>>>,
}

impl OsdAgent {
    /// Create a new agent. Node id and config dir come from the context
    /// passed to each hook; the rest of `config` applies to every pass.
    pub fn new(
        config: AgentConfig,
        factory: ConnectionFactoryRef,
        initializer: OsdInitializerRef,
        formatter: DeviceFormatterRef,
    ) -> Self {
        let layout = StoreLayout::new(config.store_namespace.clone());
        Self {
            config,
            layout,
            factory,
            initializer,
            formatter,
            guard: ConfigGuard::new(),
            processes: Arc::new(ProcessCache::new()),
            metrics: Arc::new(AgentMetrics::new()),
            devices_done: Mutex::new(None),
        }
    }

    pub fn guard(&self) -> &Arc<ConfigGuard> {
        &self.guard
    }

    pub fn processes(&self) -> &Arc<ProcessCache> {
        &self.processes
    }

    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn state(&self, ctx: &AgentContext) -> OsdState {
        OsdState::new(ctx.store.clone(), self.layout.clone(), ctx.node_id.clone())
    }

    fn settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            force_format: self.config.force_format,
            location: self.config.location.clone(),
            format_settle: self.config.format_settle(),
        }
    }

    /// Wait for the most recently dispatched device unit to finish. Returns
    /// immediately if none was dispatched.
    pub async fn wait_for_devices(&self) {
        let receiver = self.devices_done.lock().clone();
        if let Some(mut receiver) = receiver {
            // a dropped sender also means the unit is gone
            let _ = receiver.wait_for(|done| *done).await;
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Seed desired state: explicit devices, or the config dir as a single
    /// directory OSD
    pub async fn initialize(&self, ctx: &AgentContext) -> Result<()> {
        let state = self.state(ctx);

        if !self.config.devices.is_empty() {
            for device in &self.config.devices {
                info!(device = %device, "adding device to desired state");
                state.add_desired_device(device).await.map_err(|e| {
                    error!(device = %device, "failed to add desired device: {}", e);
                    e
                })?;
            }
            return Ok(());
        }

        let dir = ctx.config_dir.display().to_string();
        info!(dir = %dir, "adding local config directory to desired state");
        state.add_desired_dir(&dir).await.map_err(|e| {
            error!(dir = %dir, "failed to add current dir: {}", e);
            e
        })
    }

    /// Run one reconciliation pass
    pub async fn configure_local_service(&self, ctx: &AgentContext) -> Result<()> {
        let state = self.state(ctx);

        if !state.is_node_ready().await? {
            debug!(node = %ctx.node_id, "osd configuration not required");
            return Ok(());
        }

        let Some(_permit) = self.guard.try_enter() else {
            self.metrics.record_pass_skipped();
            return Ok(());
        };
        self.metrics.record_pass_started();

        let Some(cluster) = load_cluster_info(ctx.store.as_ref(), &self.layout).await? else {
            info!("the cluster is not initialized yet");
            return Ok(());
        };
        let cluster = Arc::new(cluster);

        let admin = self.factory.connect_admin(&cluster, &ctx.config_dir).await?;
        let result = self.reconcile(ctx, &state, &cluster, admin.as_ref()).await;
        admin.shutdown().await;

        result
    }

    /// Stop all tracked OSD processes. Does not touch the store.
    pub async fn destroy_local_service(&self, ctx: &AgentContext) -> Result<()> {
        let procs = self.processes.drain();
        let stops = procs.iter().map(|(osd_id, handle)| async move {
            info!(osd_id, "stopping osd");
            if let Err(e) = ctx.supervisor.stop(handle).await {
                warn!(osd_id, "failed to stop osd: {}", e);
            }
        });
        join_all(stops).await;
        Ok(())
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn reconcile(
        &self,
        ctx: &AgentContext,
        state: &OsdState,
        cluster: &Arc<ClusterInfo>,
        admin: &dyn ClusterConnection,
    ) -> Result<()> {
        let slot_error = self.create_desired_osds(ctx, state, cluster, admin).await?;

        let pruned = Pruner {
            state,
            connection: admin,
            supervisor: ctx.supervisor.as_ref(),
            processes: &self.processes,
            metrics: &self.metrics,
        }
        .prune()
        .await;

        match (pruned, slot_error) {
            (Err(e), _) => Err(e),
            (Ok(()), Some(e)) => Err(e),
            (Ok(()), None) => Ok(()),
        }
    }

    /// Provision directories in place and dispatch devices to the
    /// background. The outer error aborts the pass; the inner one is the
    /// last directory slot failure.
    async fn create_desired_osds(
        &self,
        ctx: &AgentContext,
        state: &OsdState,
        cluster: &Arc<ClusterInfo>,
        admin: &dyn ClusterConnection,
    ) -> Result<Option<Error>> {
        let devices = state.load_desired_devices().await?;
        let dirs = state.load_desired_dirs().await?;

        let keyring = write_bootstrap_keyring(admin, &ctx.config_dir, &cluster.name).await?;

        let dir_error = self.configure_dirs(ctx, state, cluster, &keyring, &dirs).await?;
        self.configure_devices(ctx, state, cluster, &keyring, devices).await?;

        Ok(dir_error)
    }

    async fn configure_dirs(
        &self,
        ctx: &AgentContext,
        state: &OsdState,
        cluster: &Arc<ClusterInfo>,
        keyring: &Path,
        dirs: &DesiredSlots,
    ) -> Result<Option<Error>> {
        if dirs.is_empty() {
            return Ok(None);
        }

        let connection = self
            .factory
            .connect_bootstrap(cluster, &ctx.config_dir, keyring)
            .await
            .map_err(|e| {
                Error::Connection(format!("failed to connect to cluster to config filestore osds: {}", e))
            })?;

        let provisioner = self.provisioner(ctx, state, cluster, connection.clone());
        let last_error = provisioner.provision_dirs(dirs).await;
        connection.shutdown().await;

        Ok(last_error)
    }

    async fn configure_devices(
        &self,
        ctx: &AgentContext,
        state: &OsdState,
        cluster: &Arc<ClusterInfo>,
        keyring: &Path,
        devices: DesiredSlots,
    ) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        // fresh completion signal for this dispatch
        let (done_tx, done_rx) = watch::channel(false);
        *self.devices_done.lock() = Some(done_rx);

        let connection = self
            .factory
            .connect_bootstrap(cluster, &ctx.config_dir, keyring)
            .await
            .map_err(|e| {
                Error::Connection(format!("failed to connect to cluster to config bluestore osds: {}", e))
            })?;

        let provisioner = self.provisioner(ctx, state, cluster, connection.clone());
        let config_root = ctx.config_dir.clone();
        let permit = self.guard.hold();

        tokio::spawn(async move {
            provisioner.provision_devices(&devices, &config_root).await;
            connection.shutdown().await;

            drop(permit);
            let _ = done_tx.send(true);
        });

        Ok(())
    }

    fn provisioner(
        &self,
        ctx: &AgentContext,
        state: &OsdState,
        cluster: &Arc<ClusterInfo>,
        connection: ClusterConnectionRef,
    ) -> Provisioner {
        Provisioner {
            state: state.clone(),
            cluster: cluster.clone(),
            connection,
            initializer: self.initializer.clone(),
            formatter: self.formatter.clone(),
            supervisor: ctx.supervisor.clone(),
            processes: self.processes.clone(),
            metrics: self.metrics.clone(),
            settings: self.settings(),
        }
    }
}

/// Fetch the bootstrap-osd keyring and write it where the bootstrap
/// connection expects it
async fn write_bootstrap_keyring(
    admin: &dyn ClusterConnection,
    config_dir: &Path,
    cluster_name: &str,
) -> Result<PathBuf> {
    let keyring = admin.bootstrap_osd_keyring().await?;

    tokio::fs::create_dir_all(bootstrap_osd_dir(config_dir)).await?;
    let path = bootstrap_osd_keyring_path(config_dir, cluster_name);
    tokio::fs::write(&path, keyring).await?;

    debug!(path = %path.display(), "wrote bootstrap-osd keyring");
    Ok(path)
}

#[async_trait]
impl ServiceAgent for OsdAgent {
    fn name(&self) -> &str {
        OSD_AGENT_NAME
    }

    async fn initialize(&self, ctx: &AgentContext) -> Result<()> {
        OsdAgent::initialize(self, ctx).await
    }

    async fn configure_local_service(&self, ctx: &AgentContext) -> Result<()> {
        OsdAgent::configure_local_service(self, ctx).await
    }

    async fn destroy_local_service(&self, ctx: &AgentContext) -> Result<()> {
        OsdAgent::destroy_local_service(self, ctx).await
    }
}

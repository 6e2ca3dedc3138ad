//! Test doubles for the cluster, initializer, formatter and supervisor
//! ports, plus a harness wiring them to an in-memory store.

use crate::adapters::MemoryStore;
use crate::agent::osd::{disk_uuid_path, fsid_path, whoami_path};
use crate::agent::processes::ProcessCache;
use crate::agent::provision::{ProvisionSettings, Provisioner};
use crate::agent::OsdAgent;
use crate::config::AgentConfig;
use crate::domain::model::{ClusterInfo, OsdConfig, RegisteredOsd};
use crate::domain::ports::{
    AgentContext, ClusterConnection, ClusterConnectionRef, ConnectionFactory, DeviceFormatter,
    OsdInitializer, ProcessHandle, ProcessSupervisor, StartPolicy,
};
use crate::error::{Error, Result};
use crate::metrics::AgentMetrics;
use crate::state::{load_cluster_info, save_cluster_info, OsdState, StoreLayout};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

pub const TEST_NODE: &str = "node1";

pub fn test_cluster() -> ClusterInfo {
    ClusterInfo {
        name: "ceph".into(),
        fsid: "4a5e8c2e-1f6b-4a57-9d0e-2b6c3f0e7d11".into(),
        admin_secret: "AQBsecret==".into(),
    }
}

/// Open/closed gate a fake can park on
struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: watch::channel(true).0,
        }
    }

    fn set(&self, open: bool) {
        self.open.send_replace(open);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

// =============================================================================
// Fake Cluster
// =============================================================================

#[derive(Default)]
struct ClusterInner {
    next_id: AtomicU32,
    marked_out: Mutex<Vec<u32>>,
    purged: Mutex<Vec<u32>>,
    fail_register: AtomicBool,
    fail_mark_out: Mutex<Option<u32>>,
    fail_connect: AtomicBool,
    admin_connects: AtomicU32,
    bootstrap_connects: AtomicU32,
    shutdowns: AtomicU32,
}

/// Cluster connection and connection factory in one; every connection it
/// hands out shares the same recorded state
#[derive(Clone, Default)]
pub struct FakeCluster {
    inner: Arc<ClusterInner>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registrations(&self) -> u32 {
        self.inner.next_id.load(Ordering::SeqCst)
    }

    pub fn marked_out(&self) -> Vec<u32> {
        self.inner.marked_out.lock().clone()
    }

    pub fn purged(&self) -> Vec<u32> {
        self.inner.purged.lock().clone()
    }

    pub fn admin_connects(&self) -> u32 {
        self.inner.admin_connects.load(Ordering::SeqCst)
    }

    pub fn bootstrap_connects(&self) -> u32 {
        self.inner.bootstrap_connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u32 {
        self.inner.shutdowns.load(Ordering::SeqCst)
    }

    pub fn fail_register(&self, fail: bool) {
        self.inner.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_out(&self, osd_id: Option<u32>) {
        *self.inner.fail_mark_out.lock() = osd_id;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn connect(&self, counter: &AtomicU32) -> Result<ClusterConnectionRef> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection("cluster unreachable".into()));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl ClusterConnection for FakeCluster {
    async fn register_osd(&self, _config: &OsdConfig) -> Result<RegisteredOsd> {
        if self.inner.fail_register.load(Ordering::SeqCst) {
            return Err(Error::Registration("osd create rejected".into()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredOsd {
            id,
            uuid: Uuid::new_v4(),
            disk_uuid: format!("disk-{}", id),
        })
    }

    async fn mark_out(&self, osd_id: u32) -> Result<()> {
        if *self.inner.fail_mark_out.lock() == Some(osd_id) {
            return Err(Error::MarkOut {
                osd_id,
                reason: "monitor refused".into(),
            });
        }
        self.inner.marked_out.lock().push(osd_id);
        Ok(())
    }

    async fn purge(&self, osd_id: u32) -> Result<()> {
        self.inner.purged.lock().push(osd_id);
        Ok(())
    }

    async fn bootstrap_osd_keyring(&self) -> Result<String> {
        Ok("[client.bootstrap-osd]\n\tkey = AQBbootstrap==\n".into())
    }

    async fn shutdown(&self) {
        self.inner.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for FakeCluster {
    async fn connect_admin(
        &self,
        _cluster: &ClusterInfo,
        _config_dir: &Path,
    ) -> Result<ClusterConnectionRef> {
        self.connect(&self.inner.admin_connects)
    }

    async fn connect_bootstrap(
        &self,
        _cluster: &ClusterInfo,
        _config_dir: &Path,
        _keyring_path: &Path,
    ) -> Result<ClusterConnectionRef> {
        self.connect(&self.inner.bootstrap_connects)
    }
}

// =============================================================================
// Fake Initializer
// =============================================================================

/// Writes the identity files a real initialization would leave behind
pub struct FakeInitializer {
    calls: AtomicU32,
    fail: AtomicBool,
    gate: Gate,
    entered: Notify,
}

impl Default for FakeInitializer {
    fn default() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            gate: Gate::new(),
            entered: Notify::new(),
        }
    }
}

impl FakeInitializer {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Park initializations until `unblock`
    pub fn block(&self) {
        self.gate.set(false);
    }

    pub fn unblock(&self) {
        self.gate.set(true);
    }

    /// Resolves once an initialization has started
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl OsdInitializer for FakeInitializer {
    async fn initialize(
        &self,
        config: &OsdConfig,
        _cluster: &ClusterInfo,
        _location: Option<&str>,
        _connection: &dyn ClusterConnection,
    ) -> Result<()> {
        self.entered.notify_one();
        self.gate.pass().await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Initialization {
                path: config.root_path.display().to_string(),
                reason: "mkfs failed".into(),
            });
        }

        let osd_id = config.osd_id()?;
        tokio::fs::write(whoami_path(&config.root_path), osd_id.to_string()).await?;
        tokio::fs::write(fsid_path(&config.root_path), config.uuid.to_string()).await?;
        tokio::fs::write(disk_uuid_path(&config.root_path), &config.disk_uuid).await?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Fake Formatter
// =============================================================================

pub struct FakeFormatter {
    calls: Mutex<Vec<(String, bool)>>,
    fail: AtomicBool,
    gate: Gate,
}

impl Default for FakeFormatter {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            gate: Gate::new(),
        }
    }
}

impl FakeFormatter {
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Park formatting until `unblock`
    pub fn block(&self) {
        self.gate.set(false);
    }

    pub fn unblock(&self) {
        self.gate.set(true);
    }
}

#[async_trait]
impl DeviceFormatter for FakeFormatter {
    async fn format(&self, device: &str, force: bool) -> Result<()> {
        self.gate.pass().await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Format {
                device: device.to_string(),
                reason: "device busy".into(),
            });
        }
        self.calls.lock().push((device.to_string(), force));
        Ok(())
    }
}

// =============================================================================
// Fake Supervisor
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecord {
    pub name: String,
    pub pattern: String,
    pub policy: StartPolicy,
    pub args: Vec<String>,
}

/// Tracks "running" processes by launch pattern
#[derive(Default)]
pub struct FakeSupervisor {
    next_handle: AtomicU64,
    running: Mutex<HashSet<String>>,
    starts: Mutex<Vec<StartRecord>>,
    stopped: Mutex<Vec<String>>,
    stop_attempts: AtomicU32,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl FakeSupervisor {
    pub fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().clone()
    }

    pub fn stopped_patterns(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    pub fn stop_attempts(&self) -> u32 {
        self.stop_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Simulate every process having exited
    pub fn forget_running(&self) {
        self.running.lock().clear();
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(
        &self,
        name: &str,
        launch_pattern: &str,
        policy: StartPolicy,
        args: &[String],
    ) -> Result<Option<ProcessHandle>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Command {
                command: name.to_string(),
                reason: "exec failed".into(),
            });
        }

        self.starts.lock().push(StartRecord {
            name: name.to_string(),
            pattern: launch_pattern.to_string(),
            policy,
            args: args.to_vec(),
        });

        let mut running = self.running.lock();
        if policy == StartPolicy::ReuseExisting && running.contains(launch_pattern) {
            return Ok(None);
        }
        running.insert(launch_pattern.to_string());

        let handle_id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ProcessHandle {
            handle_id,
            name: name.to_string(),
            pid: Some(4000 + handle_id as u32),
            launch_pattern: launch_pattern.to_string(),
            started_at: Utc::now(),
        }))
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<()> {
        self.stop_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::ProcessStop {
                name: handle.name.clone(),
                reason: "signal refused".into(),
            });
        }
        self.running.lock().remove(&handle.launch_pattern);
        self.stopped.lock().push(handle.launch_pattern.clone());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<MemoryStore>,
    pub state: OsdState,
    pub cluster: Arc<FakeCluster>,
    pub initializer: Arc<FakeInitializer>,
    pub formatter: Arc<FakeFormatter>,
    pub supervisor: Arc<FakeSupervisor>,
    pub processes: Arc<ProcessCache>,
    pub metrics: Arc<AgentMetrics>,
}

impl Harness {
    /// Harness with an initialized cluster record
    pub async fn new() -> Self {
        let h = Self::uninitialized().await;
        save_cluster_info(h.store.as_ref(), h.state.layout(), &test_cluster())
            .await
            .unwrap();
        h
    }

    /// Harness whose store has no cluster record yet
    pub async fn uninitialized() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = OsdState::new(store.clone(), StoreLayout::default(), TEST_NODE);
        Self {
            tmp: TempDir::new().unwrap(),
            store,
            state,
            cluster: Arc::new(FakeCluster::new()),
            initializer: Arc::new(FakeInitializer::default()),
            formatter: Arc::new(FakeFormatter::default()),
            supervisor: Arc::new(FakeSupervisor::default()),
            processes: Arc::new(ProcessCache::new()),
            metrics: Arc::new(AgentMetrics::new()),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.tmp.path().to_path_buf()
    }

    pub fn config_dir_str(&self) -> String {
        self.config_dir().display().to_string()
    }

    pub fn context(&self) -> AgentContext {
        AgentContext {
            node_id: TEST_NODE.to_string(),
            config_dir: self.config_dir(),
            store: self.store.clone(),
            supervisor: self.supervisor.clone(),
        }
    }

    pub async fn provisioner(&self) -> Provisioner {
        self.provisioner_with(false).await
    }

    pub async fn provisioner_with(&self, force_format: bool) -> Provisioner {
        let cluster = load_cluster_info(self.store.as_ref(), self.state.layout())
            .await
            .unwrap()
            .unwrap();
        Provisioner {
            state: self.state.clone(),
            cluster: Arc::new(cluster),
            connection: self.cluster.clone(),
            initializer: self.initializer.clone(),
            formatter: self.formatter.clone(),
            supervisor: self.supervisor.clone(),
            processes: self.processes.clone(),
            metrics: self.metrics.clone(),
            settings: ProvisionSettings {
                force_format,
                location: None,
                format_settle: Duration::from_millis(1),
            },
        }
    }

    /// Agent wired to the fakes, configured with `devices`
    pub fn agent(&self, devices: &[&str]) -> OsdAgent {
        let config = AgentConfig {
            node_id: TEST_NODE.to_string(),
            config_dir: self.config_dir(),
            devices: devices.iter().map(|d| d.to_string()).collect(),
            format_settle_ms: 1,
            ..Default::default()
        };
        OsdAgent::new(
            config,
            self.cluster.clone(),
            self.initializer.clone(),
            self.formatter.clone(),
        )
    }
}

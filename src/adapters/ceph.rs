//! Ceph CLI Adapters
//!
//! Cluster connection, connection factory and OSD initializer backed by the
//! `ceph` and `ceph-osd` command line tools.

use crate::agent::osd::{disk_uuid_path, osd_conf_path, osd_journal_path, osd_keyring_path};
use crate::domain::model::{ClusterInfo, OsdConfig, RegisteredOsd};
use crate::domain::ports::{
    ClusterConnection, ClusterConnectionRef, ConnectionFactory, OsdInitializer,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

pub const CEPH_BINARY: &str = "ceph";
pub const CEPH_OSD_BINARY: &str = "ceph-osd";

const ADMIN_CLIENT: &str = "client.admin";
const BOOTSTRAP_OSD_CLIENT: &str = "client.bootstrap-osd";

/// Run a command and return its stdout, failing on a non-zero exit
pub(crate) async fn run_command(program: &str, args: &[String]) -> Result<Vec<u8>> {
    debug!(program, ?args, "running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Command {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command {
            command: format!("{} {}", program, args.join(" ")),
            reason: stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Keyring file contents for one client identity
pub fn keyring_contents(client: &str, key: &str) -> String {
    format!("[{}]\n\tkey = {}\n", client, key)
}

/// `<configDir>/<cluster>.config`
pub fn cluster_conf_path(config_dir: &Path, cluster_name: &str) -> PathBuf {
    config_dir.join(format!("{}.config", cluster_name))
}

/// `<configDir>/<cluster>.client.admin.keyring`
pub fn admin_keyring_path(config_dir: &Path, cluster_name: &str) -> PathBuf {
    config_dir.join(format!("{}.{}.keyring", cluster_name, ADMIN_CLIENT))
}

#[derive(Debug, Deserialize)]
struct OsdCreateOutput {
    osdid: u32,
}

#[derive(Debug, Deserialize)]
struct AuthKeyOutput {
    key: String,
}

// =============================================================================
// Connection
// =============================================================================

/// Connection authenticated as one client identity
#[derive(Debug, Clone)]
pub struct CephCliConnection {
    binary: String,
    cluster_name: String,
    client: String,
    conf_path: PathBuf,
    keyring_path: PathBuf,
}

impl CephCliConnection {
    fn base_args(&self) -> Vec<String> {
        vec![
            format!("--cluster={}", self.cluster_name),
            format!("--conf={}", self.conf_path.display()),
            format!("--name={}", self.client),
            format!("--keyring={}", self.keyring_path.display()),
            "--format=json".to_string(),
        ]
    }

    async fn ceph(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut full = self.base_args();
        full.extend(args.iter().map(|a| a.to_string()));
        run_command(&self.binary, &full).await
    }
}

#[async_trait]
impl ClusterConnection for CephCliConnection {
    async fn register_osd(&self, config: &OsdConfig) -> Result<RegisteredOsd> {
        let uuid = Uuid::new_v4();
        let output = self
            .ceph(&["osd", "create", &uuid.to_string()])
            .await
            .map_err(|e| Error::Registration(e.to_string()))?;

        let created: OsdCreateOutput = serde_json::from_slice(&output)
            .map_err(|e| Error::Registration(format!("unexpected osd create output: {}", e)))?;

        info!(osd_id = created.osdid, bluestore = config.bluestore, "osd created");
        Ok(RegisteredOsd {
            id: created.osdid,
            uuid,
            disk_uuid: Uuid::new_v4().to_string(),
        })
    }

    async fn mark_out(&self, osd_id: u32) -> Result<()> {
        let id = osd_id.to_string();
        self.ceph(&["osd", "out", &id])
            .await
            .map(|_| ())
            .map_err(|e| Error::MarkOut {
                osd_id,
                reason: e.to_string(),
            })
    }

    async fn purge(&self, osd_id: u32) -> Result<()> {
        let id = osd_id.to_string();
        self.ceph(&["osd", "purge", &id, "--yes-i-really-mean-it"])
            .await
            .map(|_| ())
            .map_err(|e| Error::Purge {
                osd_id,
                reason: e.to_string(),
            })
    }

    async fn bootstrap_osd_keyring(&self) -> Result<String> {
        let output = self
            .ceph(&[
                "auth",
                "get-or-create-key",
                BOOTSTRAP_OSD_CLIENT,
                "mon",
                "allow profile bootstrap-osd",
            ])
            .await?;
        let auth: AuthKeyOutput = serde_json::from_slice(&output)?;
        Ok(keyring_contents(BOOTSTRAP_OSD_CLIENT, &auth.key))
    }

    async fn shutdown(&self) {
        debug!(client = %self.client, "released cluster connection");
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds CLI connections for the admin and bootstrap-osd identities
#[derive(Debug, Clone)]
pub struct CephCliFactory {
    binary: String,
}

impl Default for CephCliFactory {
    fn default() -> Self {
        Self {
            binary: CEPH_BINARY.to_string(),
        }
    }
}

impl CephCliFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn connection(
        &self,
        cluster: &ClusterInfo,
        config_dir: &Path,
        client: &str,
        keyring_path: PathBuf,
    ) -> CephCliConnection {
        CephCliConnection {
            binary: self.binary.clone(),
            cluster_name: cluster.name.clone(),
            client: client.to_string(),
            conf_path: cluster_conf_path(config_dir, &cluster.name),
            keyring_path,
        }
    }
}

#[async_trait]
impl ConnectionFactory for CephCliFactory {
    async fn connect_admin(
        &self,
        cluster: &ClusterInfo,
        config_dir: &Path,
    ) -> Result<ClusterConnectionRef> {
        let keyring_path = admin_keyring_path(config_dir, &cluster.name);
        tokio::fs::create_dir_all(config_dir).await?;
        tokio::fs::write(
            &keyring_path,
            keyring_contents(ADMIN_CLIENT, &cluster.admin_secret),
        )
        .await
        .map_err(|e| {
            Error::Connection(format!(
                "failed to write admin keyring {}: {}",
                keyring_path.display(),
                e
            ))
        })?;

        Ok(Arc::new(self.connection(cluster, config_dir, ADMIN_CLIENT, keyring_path)))
    }

    async fn connect_bootstrap(
        &self,
        cluster: &ClusterInfo,
        config_dir: &Path,
        keyring_path: &Path,
    ) -> Result<ClusterConnectionRef> {
        if !tokio::fs::try_exists(keyring_path).await.unwrap_or(false) {
            return Err(Error::Connection(format!(
                "bootstrap keyring {} not found",
                keyring_path.display()
            )));
        }

        Ok(Arc::new(self.connection(
            cluster,
            config_dir,
            BOOTSTRAP_OSD_CLIENT,
            keyring_path.to_path_buf(),
        )))
    }
}

// =============================================================================
// Initializer
// =============================================================================

/// Initializes an OSD data directory with `ceph-osd --mkfs --mkkey`
#[derive(Debug, Clone)]
pub struct CephOsdInitializer {
    binary: String,
}

impl Default for CephOsdInitializer {
    fn default() -> Self {
        Self {
            binary: CEPH_OSD_BINARY.to_string(),
        }
    }
}

impl CephOsdInitializer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn mkfs_args(config: &OsdConfig, cluster: &ClusterInfo, osd_id: u32) -> Vec<String> {
        let root = &config.root_path;
        let mut args = vec![
            "--mkfs".to_string(),
            "--mkkey".to_string(),
            format!("--id={}", osd_id),
            format!("--cluster={}", cluster.name),
            format!("--osd-data={}", root.display()),
            format!("--osd-uuid={}", config.uuid),
            format!("--conf={}", osd_conf_path(root, &cluster.name).display()),
            format!("--keyring={}", osd_keyring_path(root).display()),
        ];
        if config.bluestore {
            args.push("--osd-objectstore=bluestore".to_string());
        } else {
            args.push("--osd-objectstore=filestore".to_string());
            args.push(format!("--osd-journal={}", osd_journal_path(root).display()));
        }
        args
    }
}

/// Per-OSD config file
pub fn osd_conf_contents(config: &OsdConfig, cluster: &ClusterInfo, location: Option<&str>) -> String {
    let mut conf = format!(
        "[global]\nfsid = {}\n\n[osd]\nosd data = {}\nkeyring = {}\n",
        cluster.fsid,
        config.root_path.display(),
        osd_keyring_path(&config.root_path).display(),
    );
    if let Some(device) = &config.device_name {
        conf.push_str(&format!("bluestore block path = /dev/{}\n", device));
    }
    if let Some(location) = location {
        conf.push_str(&format!("crush location = {}\n", location));
    }
    conf
}

#[async_trait]
impl OsdInitializer for CephOsdInitializer {
    async fn initialize(
        &self,
        config: &OsdConfig,
        cluster: &ClusterInfo,
        location: Option<&str>,
        _connection: &dyn ClusterConnection,
    ) -> Result<()> {
        let osd_id = config.osd_id()?;
        let root = &config.root_path;

        tokio::fs::write(
            osd_conf_path(root, &cluster.name),
            osd_conf_contents(config, cluster, location),
        )
        .await?;

        run_command(&self.binary, &Self::mkfs_args(config, cluster, osd_id))
            .await
            .map_err(|e| Error::Initialization {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;

        tokio::fs::write(disk_uuid_path(root), &config.disk_uuid).await?;

        info!(osd_id, path = %root.display(), "osd data directory initialized");
        Ok(())
    }
}

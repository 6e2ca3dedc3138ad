//! Provisioning Pipeline
//!
//! Turns a desired slot into a running, registered OSD:
//!
//! 1. assign an identity if the slot has none and persist it back;
//! 2. create the data directory, format and initialize on first run, or
//!    read back the on-disk identity when `whoami` already exists;
//! 3. launch the daemon, reusing a process that is already running.

use crate::agent::osd::{
    launch_args, launch_identity_arg, load_osd_info, osd_data_exists, osd_root_path,
    OSD_PROCESS_NAME,
};
use crate::agent::processes::ProcessCache;
use crate::domain::model::{ClusterInfo, OsdConfig, OsdId, SlotKind};
use crate::domain::ports::{
    ClusterConnectionRef, DeviceFormatterRef, OsdInitializerRef, ProcessSupervisorRef,
    StartPolicy,
};
use crate::error::{Error, Result};
use crate::metrics::AgentMetrics;
use crate::state::{DesiredSlots, OsdState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Node-level provisioning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Format devices even if they carry partitions
    pub force_format: bool,
    /// Crush location for new OSDs
    pub location: Option<String>,
    /// Wait after formatting before initializing
    pub format_settle: Duration,
}

/// Collaborators for one provisioning run, sharing a single bootstrap
/// connection
#[derive(Clone)]
pub struct Provisioner {
    pub(crate) state: OsdState,
    pub(crate) cluster: Arc<ClusterInfo>,
    pub(crate) connection: ClusterConnectionRef,
    pub(crate) initializer: OsdInitializerRef,
    pub(crate) formatter: DeviceFormatterRef,
    pub(crate) supervisor: ProcessSupervisorRef,
    pub(crate) processes: Arc<ProcessCache>,
    pub(crate) metrics: Arc<AgentMetrics>,
    pub(crate) settings: ProvisionSettings,
}

impl Provisioner {
    /// Provision every desired directory. Returns the last slot error.
    pub async fn provision_dirs(&self, dirs: &DesiredSlots) -> Option<Error> {
        let mut succeeded = 0;
        let mut last_error = None;

        for (dir, osd_id) in dirs {
            let mut config = OsdConfig::for_dir(*osd_id);
            match self
                .create_or_start_osd(&mut config, Path::new(dir), SlotKind::Dir, dir)
                .await
            {
                Ok(()) => {
                    succeeded += 1;
                    self.metrics.record_slot(true);
                }
                Err(e) => {
                    error!(
                        dir = %dir,
                        slot_local = e.is_slot_local(),
                        "failed to config osd in path: {}",
                        e
                    );
                    self.metrics.record_slot(false);
                    last_error = Some(e);
                }
            }
        }

        info!("{}/{} osds (filestore) succeeded on this node", succeeded, dirs.len());
        last_error
    }

    /// Provision every desired device under `config_root`. Returns how many
    /// succeeded; failures are logged.
    pub async fn provision_devices(&self, devices: &DesiredSlots, config_root: &Path) -> usize {
        let mut succeeded = 0;

        for (device, osd_id) in devices {
            let mut config = OsdConfig::for_device(*osd_id, device.clone());
            match self
                .create_or_start_osd(&mut config, config_root, SlotKind::Device, device)
                .await
            {
                Ok(()) => {
                    succeeded += 1;
                    self.metrics.record_slot(true);
                }
                Err(e) => {
                    error!(
                        device = %device,
                        slot_local = e.is_slot_local(),
                        "failed to config osd on device: {}",
                        e
                    );
                    self.metrics.record_slot(false);
                }
            }
        }

        info!("{}/{} bluestore osds succeeded on this node", succeeded, devices.len());
        succeeded
    }

    /// Run the full pipeline for one slot
    pub async fn create_or_start_osd(
        &self,
        config: &mut OsdConfig,
        config_root: &Path,
        kind: SlotKind,
        slot_path: &str,
    ) -> Result<()> {
        if !config.id.is_assigned() {
            self.assign_identity(config, kind, slot_path).await?;
        }
        let osd_id = config.osd_id()?;

        config.root_path = osd_root_path(config_root, osd_id);
        if osd_data_exists(&config.root_path).await {
            self.resume_osd(config, config_root).await?;
        } else {
            self.create_osd(config, config_root).await?;
        }

        self.run_osd(config).await
    }

    /// Register a new identity and persist it under the slot's key
    async fn assign_identity(
        &self,
        config: &mut OsdConfig,
        kind: SlotKind,
        slot_path: &str,
    ) -> Result<()> {
        let registered = self.connection.register_osd(config).await?;
        info!(osd_id = registered.id, kind = %kind, slot = slot_path, "registered new osd");

        config.id = OsdId::Assigned(registered.id);
        config.uuid = registered.uuid;
        config.disk_uuid = registered.disk_uuid;

        self.state.set_slot_osd_id(kind, slot_path, registered.id).await
    }

    /// First-time path: directory, format, initialize, applied record
    async fn create_osd(&self, config: &mut OsdConfig, config_root: &Path) -> Result<()> {
        let osd_id = config.osd_id()?;
        if config.ensure_identity() {
            info!(osd_id, uuid = %config.uuid, "generated launch identity for retried slot");
        }
        create_osd_dir(&config.root_path).await.map_err(|e| Error::Initialization {
            path: config.root_path.display().to_string(),
            reason: format!("failed to make osd {} dir: {}", osd_id, e),
        })?;

        if config.bluestore {
            let device = config.device_name.as_deref().ok_or_else(|| {
                Error::Internal(format!("bluestore osd {} has no device", osd_id))
            })?;
            self.formatter
                .format(device, self.settings.force_format)
                .await
                .map_err(|e| match e {
                    Error::Format { .. } => e,
                    other => Error::Format {
                        device: device.to_string(),
                        reason: other.to_string(),
                    },
                })?;

            info!(device, "waiting after bluestore partition/format...");
            tokio::time::sleep(self.settings.format_settle).await;
        }

        self.initializer
            .initialize(
                config,
                &self.cluster,
                self.settings.location.as_deref(),
                self.connection.as_ref(),
            )
            .await
            .map_err(|e| match e {
                Error::Initialization { .. } => e,
                other => Error::Initialization {
                    path: config.root_path.display().to_string(),
                    reason: other.to_string(),
                },
            })?;

        self.state
            .mark_applied(osd_id, &config_root.display().to_string(), &config.disk_uuid)
            .await?;
        info!(osd_id, path = %config.root_path.display(), "initialized new osd");
        Ok(())
    }

    /// Resume path: trust the on-disk identity, restore a lost applied record
    async fn resume_osd(&self, config: &mut OsdConfig, config_root: &Path) -> Result<()> {
        let osd_id = config.osd_id()?;
        let info = load_osd_info(&config.root_path).await?;
        if info.id != osd_id {
            return Err(Error::OsdInfo {
                path: config.root_path.display().to_string(),
                reason: format!("whoami is {} but the slot is assigned osd {}", info.id, osd_id),
            });
        }

        config.uuid = info.uuid;
        if let Some(disk_uuid) = info.disk_uuid {
            config.disk_uuid = disk_uuid;
        }

        let applied = self.state.applied_osd_ids().await?;
        if !applied.contains(&osd_id) {
            warn!(osd_id, "applied record missing for existing osd, restoring it");
            self.state
                .mark_applied(osd_id, &config_root.display().to_string(), &config.disk_uuid)
                .await?;
        }

        Ok(())
    }

    /// Launch the daemon, or reuse the instance already running
    async fn run_osd(&self, config: &OsdConfig) -> Result<()> {
        let osd_id = config.osd_id()?;
        info!(osd_id, path = %config.root_path.display(), "starting osd");

        let args = launch_args(config, &self.cluster.name)?;
        let pattern = launch_identity_arg(&config.uuid);

        let process = self
            .supervisor
            .start(OSD_PROCESS_NAME, &pattern, StartPolicy::ReuseExisting, &args)
            .await
            .map_err(|e| Error::Launch {
                osd_id,
                reason: e.to_string(),
            })?;

        // a reused process comes back as None and must not clobber the
        // handle we already track
        if let Some(handle) = process {
            self.processes.insert(osd_id, handle);
        }

        Ok(())
    }
}

async fn create_osd_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o744);
    builder.create(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_new_dir_slot() {
        let h = Harness::new().await;
        let dir = h.config_dir_str();
        h.state.add_desired_dir(&dir).await.unwrap();

        let provisioner = h.provisioner().await;
        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert!(provisioner.provision_dirs(&dirs).await.is_none());

        assert_eq!(h.cluster.registrations(), 1);
        assert_eq!(h.initializer.calls(), 1);
        assert_eq!(h.formatter.calls().len(), 0);
        assert!(h.config_dir().join("osd0").join("whoami").exists());

        // the id is persisted back into desired state
        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert_eq!(dirs.get(&dir), Some(&OsdId::Assigned(0)));

        let applied = h.state.applied_osds().await.unwrap();
        assert_eq!(applied[&0].path.as_deref(), Some(dir.as_str()));
        assert_eq!(applied[&0].disk_uuid.as_deref(), Some("disk-0"));

        let starts = h.supervisor.starts();
        assert_eq!(starts.len(), 1);
        assert!(starts[0].args.iter().any(|a| a.starts_with("--osd-journal=")));
        assert!(h.processes.contains(0));
    }

    #[tokio::test]
    async fn test_pipeline_is_idempotent() {
        let h = Harness::new().await;
        let dir = h.config_dir_str();
        h.state.add_desired_dir(&dir).await.unwrap();
        let provisioner = h.provisioner().await;

        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert!(provisioner.provision_dirs(&dirs).await.is_none());
        let first = h.state.applied_osds().await.unwrap();
        let tracked = h.processes.get(0).unwrap();

        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert!(provisioner.provision_dirs(&dirs).await.is_none());

        assert_eq!(h.cluster.registrations(), 1);
        assert_eq!(h.initializer.calls(), 1);
        assert_eq!(h.state.applied_osds().await.unwrap(), first);

        // the second launch request is recognized as already satisfied
        assert_eq!(h.supervisor.starts().len(), 2);
        assert_eq!(h.processes.get(0).unwrap(), tracked);
    }

    #[tokio::test]
    async fn test_resume_restores_applied_record() {
        let h = Harness::new().await;
        let dir = h.config_dir_str();
        h.state.add_desired_dir(&dir).await.unwrap();
        let provisioner = h.provisioner().await;

        let dirs = h.state.load_desired_dirs().await.unwrap();
        provisioner.provision_dirs(&dirs).await;

        h.state.remove_applied(0).await.unwrap();
        h.processes.drain();
        h.supervisor.forget_running();

        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert!(provisioner.provision_dirs(&dirs).await.is_none());

        assert_eq!(h.initializer.calls(), 1);
        assert_eq!(h.state.applied_osd_ids().await.unwrap().len(), 1);
        // untracked after "restart", so it is launched again and tracked
        assert!(h.processes.contains(0));
    }

    #[tokio::test]
    async fn test_device_slot_formats_before_initializing() {
        let h = Harness::new().await;
        h.state.add_desired_device("sdb").await.unwrap();
        let provisioner = h.provisioner_with(true).await;

        let devices = h.state.load_desired_devices().await.unwrap();
        let succeeded = provisioner
            .provision_devices(&devices, &h.config_dir())
            .await;

        assert_eq!(succeeded, 1);
        assert_eq!(h.formatter.calls(), vec![("sdb".to_string(), true)]);
        assert_eq!(h.initializer.calls(), 1);

        let starts = h.supervisor.starts();
        assert!(!starts[0].args.iter().any(|a| a.starts_with("--osd-journal=")));
    }

    #[tokio::test]
    async fn test_format_failure_leaves_no_applied_record() {
        let h = Harness::new().await;
        h.state.add_desired_device("sdb").await.unwrap();
        h.formatter.fail(true);
        let provisioner = h.provisioner().await;

        let mut config = OsdConfig::for_device(OsdId::Unassigned, "sdb");
        let err = provisioner
            .create_or_start_osd(&mut config, &h.config_dir(), SlotKind::Device, "sdb")
            .await
            .unwrap_err();

        assert_matches!(err, Error::Format { .. });
        assert!(h.state.applied_osds().await.unwrap().is_empty());
        assert_eq!(h.initializer.calls(), 0);
        assert!(h.supervisor.starts().is_empty());
    }

    #[tokio::test]
    async fn test_retried_slots_get_distinct_identities() {
        let h = Harness::new().await;
        h.state.add_desired_device("sdb").await.unwrap();
        h.state.add_desired_device("sdc").await.unwrap();
        h.formatter.fail(true);
        let provisioner = h.provisioner().await;

        let devices = h.state.load_desired_devices().await.unwrap();
        assert_eq!(provisioner.provision_devices(&devices, &h.config_dir()).await, 0);

        // ids were persisted before formatting failed
        h.formatter.fail(false);
        let devices = h.state.load_desired_devices().await.unwrap();
        assert!(devices.values().all(|id| id.is_assigned()));
        assert_eq!(provisioner.provision_devices(&devices, &h.config_dir()).await, 2);

        let patterns: Vec<String> = h.supervisor.starts().into_iter().map(|s| s.pattern).collect();
        assert_eq!(patterns.len(), 2);
        assert_ne!(patterns[0], patterns[1]);
        assert!(!patterns.contains(&launch_identity_arg(&uuid::Uuid::nil())));
        assert_eq!(h.processes.ids(), vec![0, 1]);

        let applied = h.state.applied_osds().await.unwrap();
        assert!(applied
            .values()
            .all(|r| r.disk_uuid.as_deref().is_some_and(|d| !d.is_empty())));
    }

    #[tokio::test]
    async fn test_registration_failure_aborts_slot_only() {
        let h = Harness::new().await;
        h.state.add_desired_dir("/first").await.unwrap();
        h.state.add_desired_dir(&h.config_dir_str()).await.unwrap();
        h.state
            .set_slot_osd_id(SlotKind::Dir, &h.config_dir_str(), 4)
            .await
            .unwrap();
        h.cluster.fail_register(true);
        let provisioner = h.provisioner().await;

        let dirs = h.state.load_desired_dirs().await.unwrap();
        let err = provisioner.provision_dirs(&dirs).await;

        assert_matches!(err, Some(Error::Registration(_)));
        // the already assigned sibling is still provisioned
        assert!(h.processes.contains(4));
        assert_eq!(h.metrics.snapshot().slots_failed, 1);
        assert_eq!(h.metrics.snapshot().slots_succeeded, 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_retried_on_resume() {
        let h = Harness::new().await;
        let dir = h.config_dir_str();
        h.state.add_desired_dir(&dir).await.unwrap();
        h.supervisor.fail_start(true);
        let provisioner = h.provisioner().await;

        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert_matches!(
            provisioner.provision_dirs(&dirs).await,
            Some(Error::Launch { osd_id: 0, .. })
        );
        // initialization completed before the launch failed
        assert_eq!(h.state.applied_osd_ids().await.unwrap().len(), 1);

        h.supervisor.fail_start(false);
        let dirs = h.state.load_desired_dirs().await.unwrap();
        assert!(provisioner.provision_dirs(&dirs).await.is_none());
        assert_eq!(h.initializer.calls(), 1);
        assert!(h.processes.contains(0));
    }

    #[tokio::test]
    async fn test_whoami_mismatch_is_rejected() {
        let h = Harness::new().await;
        let root = h.config_dir().join("osd3");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("whoami"), "9").unwrap();
        std::fs::write(root.join("fsid"), uuid::Uuid::new_v4().to_string()).unwrap();
        let provisioner = h.provisioner().await;

        let mut config = OsdConfig::for_dir(OsdId::Assigned(3));
        let err = provisioner
            .create_or_start_osd(&mut config, &h.config_dir(), SlotKind::Dir, "/x")
            .await
            .unwrap_err();
        assert_matches!(err, Error::OsdInfo { .. });
    }
}

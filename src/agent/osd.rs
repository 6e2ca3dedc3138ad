//! OSD Data Directory Layout
//!
//! File locations inside an OSD data directory, on-disk identity read-back
//! and daemon launch arguments.

use crate::domain::model::{OsdConfig, OsdInfo};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Logical name of the daemon process
pub const OSD_PROCESS_NAME: &str = "osd";

const WHOAMI_FILE: &str = "whoami";
const FSID_FILE: &str = "fsid";
const DISK_UUID_FILE: &str = "disk-uuid";
const KEYRING_FILE: &str = "keyring";
const JOURNAL_FILE: &str = "journal";
const BOOTSTRAP_OSD_DIR: &str = "bootstrap-osd";

/// `<configRoot>/osd<id>`
pub fn osd_root_path(config_root: &Path, osd_id: u32) -> PathBuf {
    config_root.join(format!("osd{}", osd_id))
}

pub fn whoami_path(root: &Path) -> PathBuf {
    root.join(WHOAMI_FILE)
}

pub fn fsid_path(root: &Path) -> PathBuf {
    root.join(FSID_FILE)
}

pub fn disk_uuid_path(root: &Path) -> PathBuf {
    root.join(DISK_UUID_FILE)
}

pub fn osd_keyring_path(root: &Path) -> PathBuf {
    root.join(KEYRING_FILE)
}

pub fn osd_conf_path(root: &Path, cluster_name: &str) -> PathBuf {
    root.join(format!("{}.config", cluster_name))
}

pub fn osd_journal_path(root: &Path) -> PathBuf {
    root.join(JOURNAL_FILE)
}

pub fn bootstrap_osd_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(BOOTSTRAP_OSD_DIR)
}

pub fn bootstrap_osd_keyring_path(config_dir: &Path, cluster_name: &str) -> PathBuf {
    bootstrap_osd_dir(config_dir).join(format!("{}.keyring", cluster_name))
}

/// Whether an OSD data directory has been initialized. Only the presence of
/// the identity file matters, not its contents.
pub async fn osd_data_exists(root: &Path) -> bool {
    fs::try_exists(whoami_path(root)).await.unwrap_or(false)
}

async fn read_trimmed(path: &Path, root: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::OsdInfo {
            path: root.display().to_string(),
            reason: format!("{}: {}", path.display(), e),
        })
}

/// Read back the identity of an already initialized OSD
pub async fn load_osd_info(root: &Path) -> Result<OsdInfo> {
    let whoami = read_trimmed(&whoami_path(root), root).await?;
    let id = whoami.parse::<u32>().map_err(|e| Error::OsdInfo {
        path: root.display().to_string(),
        reason: format!("invalid whoami '{}': {}", whoami, e),
    })?;

    let fsid = read_trimmed(&fsid_path(root), root).await?;
    let uuid = Uuid::parse_str(&fsid).map_err(|e| Error::OsdInfo {
        path: root.display().to_string(),
        reason: format!("invalid fsid '{}': {}", fsid, e),
    })?;

    let disk_uuid = match fs::read_to_string(disk_uuid_path(root)).await {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    Ok(OsdInfo {
        id,
        uuid,
        disk_uuid,
    })
}

/// Unique, stable argument identifying one daemon instance's command line
pub fn launch_identity_arg(uuid: &Uuid) -> String {
    format!("--osd-uuid={}", uuid)
}

/// Command line for running the daemon in the foreground
pub fn launch_args(config: &OsdConfig, cluster_name: &str) -> Result<Vec<String>> {
    let id = config.osd_id()?;
    let root = &config.root_path;

    let mut args = vec![
        "--foreground".to_string(),
        format!("--id={}", id),
        format!("--cluster={}", cluster_name),
        format!("--osd-data={}", root.display()),
        format!("--conf={}", osd_conf_path(root, cluster_name).display()),
        format!("--keyring={}", osd_keyring_path(root).display()),
        launch_identity_arg(&config.uuid),
    ];

    if !config.bluestore {
        args.push(format!("--osd-journal={}", osd_journal_path(root).display()));
    }

    Ok(args)
}

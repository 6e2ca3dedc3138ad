//! Device Formatting
//!
//! Zaps and repartitions a raw device with `sgdisk` for bluestore use.

use crate::adapters::ceph::run_command;
use crate::domain::ports::DeviceFormatter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SGDISK_BINARY: &str = "sgdisk";
const SYS_BLOCK: &str = "/sys/block";

/// `sgdisk` backed formatter
#[derive(Debug, Clone)]
pub struct SgdiskFormatter {
    binary: String,
    sys_block: PathBuf,
}

impl Default for SgdiskFormatter {
    fn default() -> Self {
        Self {
            binary: SGDISK_BINARY.to_string(),
            sys_block: PathBuf::from(SYS_BLOCK),
        }
    }
}

impl SgdiskFormatter {
    pub fn new(binary: impl Into<String>, sys_block: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            sys_block: sys_block.into(),
        }
    }
}

/// `sdb` -> `/dev/sdb`; absolute paths pass through
pub fn device_path(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{}", device)
    }
}

/// Whether sysfs lists partitions for `device` (`<sys_block>/sdb/sdb1`, ...)
pub fn has_partitions(sys_block: &Path, device: &str) -> Result<bool> {
    let name = device.rsplit('/').next().unwrap_or(device);
    let pattern = sys_block.join(name).join(format!("{}*", name));

    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| Error::Format {
        device: device.to_string(),
        reason: format!("invalid device name: {}", e),
    })?;
    Ok(entries.filter_map(|e| e.ok()).any(|p| p.is_dir()))
}

#[async_trait]
impl DeviceFormatter for SgdiskFormatter {
    async fn format(&self, device: &str, force: bool) -> Result<()> {
        if has_partitions(&self.sys_block, device)? {
            if !force {
                return Err(Error::Format {
                    device: device.to_string(),
                    reason: "device already has partitions; force formatting is disabled".into(),
                });
            }
            warn!(device, "force formatting device with existing partitions");
        }

        let path = device_path(device);
        let steps = [
            vec!["--zap-all".to_string(), path.clone()],
            vec![
                "--largest-new=1".to_string(),
                "--change-name=1:osd-block".to_string(),
                path.clone(),
            ],
        ];

        for args in steps {
            run_command(&self.binary, &args)
                .await
                .map_err(|e| Error::Format {
                    device: device.to_string(),
                    reason: e.to_string(),
                })?;
        }

        info!(device, "device formatted for bluestore");
        Ok(())
    }
}

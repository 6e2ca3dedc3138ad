//! OSD Data Model
//!
//! Identity, configuration and cluster types shared by the provisioning
//! pipeline, the pruner and the collaborator ports.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// =============================================================================
// OSD Identity
// =============================================================================

/// Store value for a desired slot that has not been registered yet
pub const UNASSIGNED_OSD_ID: i64 = -1;

/// Identity of a desired OSD slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OsdId {
    /// Not registered with the cluster yet
    Unassigned,
    /// Registered in a prior pass
    Assigned(u32),
}

impl OsdId {
    /// Parse a desired-state value. `-1` means unassigned.
    pub fn parse(value: &str) -> Result<Self> {
        let raw: i64 = value.trim().parse().map_err(|e| {
            Error::Configuration(format!("invalid osd id '{}': {}", value, e))
        })?;
        match raw {
            UNASSIGNED_OSD_ID => Ok(OsdId::Unassigned),
            id if (0..=u32::MAX as i64).contains(&id) => Ok(OsdId::Assigned(id as u32)),
            other => Err(Error::Configuration(format!("osd id out of range: {}", other))),
        }
    }

    /// Value written back to the store
    pub fn to_store_value(&self) -> String {
        match self {
            OsdId::Unassigned => UNASSIGNED_OSD_ID.to_string(),
            OsdId::Assigned(id) => id.to_string(),
        }
    }

    /// The numeric id, if assigned
    pub fn assigned(&self) -> Option<u32> {
        match self {
            OsdId::Assigned(id) => Some(*id),
            OsdId::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, OsdId::Assigned(_))
    }
}

impl std::fmt::Display for OsdId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsdId::Unassigned => write!(f, "unassigned"),
            OsdId::Assigned(id) => write!(f, "{}", id),
        }
    }
}

impl From<u32> for OsdId {
    fn from(id: u32) -> Self {
        OsdId::Assigned(id)
    }
}

// =============================================================================
// Slot Kind
// =============================================================================

/// Whether a desired slot is backed by a raw device or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Device,
    Dir,
}

impl SlotKind {
    /// Key segment under `desired/<node>/`
    pub fn key(&self) -> &'static str {
        match self {
            SlotKind::Device => "device",
            SlotKind::Dir => "dir",
        }
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

// =============================================================================
// Cluster Info
// =============================================================================

/// Cluster identity loaded once per reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster name (e.g. "ceph")
    pub name: String,
    /// Cluster fsid
    pub fsid: String,
    /// Secret of the admin identity
    pub admin_secret: String,
}

// =============================================================================
// OSD Config
// =============================================================================

/// Pipeline-scoped configuration of a single OSD slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdConfig {
    /// Slot identity
    pub id: OsdId,
    /// Raw device backing the OSD (bluestore only)
    pub device_name: Option<String>,
    /// `<configRoot>/osd<id>`, set once the id is assigned
    pub root_path: PathBuf,
    /// OSD uuid, used as the stable launch identity
    pub uuid: Uuid,
    /// Backend disk identifier
    pub disk_uuid: String,
    /// Device-backed OSD that requires formatting
    pub bluestore: bool,
}

impl OsdConfig {
    /// Config for a directory-backed slot
    pub fn for_dir(id: OsdId) -> Self {
        Self {
            id,
            device_name: None,
            root_path: PathBuf::new(),
            uuid: Uuid::nil(),
            disk_uuid: String::new(),
            bluestore: false,
        }
    }

    /// Config for a device-backed slot
    pub fn for_device(id: OsdId, device: impl Into<String>) -> Self {
        Self {
            device_name: Some(device.into()),
            bluestore: true,
            ..Self::for_dir(id)
        }
    }

    /// Give the slot a fresh launch identity if it has none. A slot whose
    /// id was persisted by an earlier, failed run carries no uuid.
    pub fn ensure_identity(&mut self) -> bool {
        if !self.uuid.is_nil() {
            return false;
        }
        self.uuid = Uuid::new_v4();
        if self.disk_uuid.is_empty() {
            self.disk_uuid = Uuid::new_v4().to_string();
        }
        true
    }

    /// The assigned id; an error before registration
    pub fn osd_id(&self) -> Result<u32> {
        self.id
            .assigned()
            .ok_or_else(|| Error::Internal("osd id has not been assigned".into()))
    }
}

/// Identity handed back by the cluster when a new OSD is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredOsd {
    pub id: u32,
    pub uuid: Uuid,
    pub disk_uuid: String,
}

/// Identity read back from an existing OSD data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdInfo {
    pub id: u32,
    pub uuid: Uuid,
    pub disk_uuid: Option<String>,
}

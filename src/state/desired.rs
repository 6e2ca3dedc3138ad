//! Desired State Accessors

use super::keys::unsanitize_path;
use super::OsdState;
use crate::domain::model::{OsdId, SlotKind};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Desired slots of one kind, keyed by device or directory path
pub type DesiredSlots = BTreeMap<String, OsdId>;

impl OsdState {
    /// Whether this node has been marked ready for OSD configuration.
    ///
    /// A missing flag means "not required"; any other read failure is an
    /// error.
    pub async fn is_node_ready(&self) -> Result<bool> {
        let key = self.layout.ready_key(&self.node_id);
        match self.store.get(&key).await {
            Ok(value) => Ok(value == "1"),
            Err(e) if e.is_key_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Set or clear the readiness flag for this node
    pub async fn set_node_ready(&self, ready: bool) -> Result<()> {
        let key = self.layout.ready_key(&self.node_id);
        self.store.set(&key, if ready { "1" } else { "0" }).await
    }

    /// Record a device as desired for this node
    pub async fn add_desired_device(&self, device: &str) -> Result<()> {
        self.add_desired_slot(SlotKind::Device, device).await
    }

    /// Record a directory as desired for this node
    pub async fn add_desired_dir(&self, dir: &str) -> Result<()> {
        self.add_desired_slot(SlotKind::Dir, dir).await
    }

    /// Record a slot as desired. An id already assigned to the slot is kept.
    pub async fn add_desired_slot(&self, kind: SlotKind, path: &str) -> Result<()> {
        let key = self.layout.slot_key(&self.node_id, kind, path);
        match self.store.get(&key).await {
            Ok(existing) => {
                debug!(kind = %kind, path, existing = %existing, "slot already desired");
            }
            Err(e) if e.is_key_not_found() => {
                self.store
                    .set(&key, &OsdId::Unassigned.to_store_value())
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let path_key = self.layout.slot_path_key(&self.node_id, kind, path);
        self.store.set(&path_key, path).await
    }

    /// Persist the id assigned to a slot
    pub async fn set_slot_osd_id(&self, kind: SlotKind, path: &str, osd_id: u32) -> Result<()> {
        let key = self.layout.slot_key(&self.node_id, kind, path);
        self.store
            .set(&key, &OsdId::Assigned(osd_id).to_store_value())
            .await?;

        let path_key = self.layout.slot_path_key(&self.node_id, kind, path);
        self.store.set(&path_key, path).await
    }

    /// Load all desired slots of one kind. Entries with unparseable ids are
    /// skipped.
    pub async fn load_desired_slots(&self, kind: SlotKind) -> Result<DesiredSlots> {
        let mut slots = DesiredSlots::new();

        let tree = match self.store.get_tree(&self.layout.slots_key(&self.node_id, kind)).await {
            Ok(tree) => tree,
            Err(e) if e.is_key_not_found() => return Ok(slots),
            Err(e) => return Err(e),
        };

        let paths = match self
            .store
            .get_tree(&self.layout.slot_paths_key(&self.node_id, kind))
            .await
        {
            Ok(tree) => Some(tree),
            Err(e) if e.is_key_not_found() => None,
            Err(e) => return Err(e),
        };

        for slot in &tree.children {
            let Some(value) = slot.value.as_deref() else {
                continue;
            };
            let id = match OsdId::parse(value) {
                Ok(id) => id,
                Err(e) => {
                    warn!(kind = %kind, key = %slot.key, "skipping desired slot: {}", e);
                    continue;
                }
            };

            let segment = slot.leaf_name();
            let path = paths
                .as_ref()
                .and_then(|p| p.child(segment))
                .and_then(|p| p.value.clone())
                .unwrap_or_else(|| unsanitize_path(segment));

            slots.insert(path, id);
        }

        Ok(slots)
    }

    pub async fn load_desired_devices(&self) -> Result<DesiredSlots> {
        self.load_desired_slots(SlotKind::Device).await
    }

    pub async fn load_desired_dirs(&self) -> Result<DesiredSlots> {
        self.load_desired_slots(SlotKind::Dir).await
    }

    /// All assigned ids desired on this node, devices and directories alike
    pub async fn desired_osd_ids(&self) -> Result<BTreeSet<u32>> {
        let devices = self.load_desired_devices().await?;
        let dirs = self.load_desired_dirs().await?;

        Ok(devices
            .values()
            .chain(dirs.values())
            .filter_map(OsdId::assigned)
            .collect())
    }
}

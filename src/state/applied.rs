//! Applied State Accessors

use super::keys::{APPLIED_DISK_UUID_KEY, APPLIED_PATH_KEY};
use super::OsdState;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Durable record that this node completed first-time provisioning of an OSD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Config root the OSD data directory lives under
    pub path: Option<String>,
    /// Backend disk identifier
    pub disk_uuid: Option<String>,
}

impl OsdState {
    /// All applied OSDs on this node, keyed by id
    pub async fn applied_osds(&self) -> Result<BTreeMap<u32, AppliedRecord>> {
        let mut osds = BTreeMap::new();

        let tree = match self.store.get_tree(&self.layout.applied_node_key(&self.node_id)).await {
            Ok(tree) => tree,
            Err(e) if e.is_key_not_found() => return Ok(osds),
            Err(e) => return Err(e),
        };

        for osd in &tree.children {
            let Ok(id) = osd.leaf_name().parse::<u32>() else {
                debug!(key = %osd.key, "skipping unexpected applied osd key");
                continue;
            };

            let record = AppliedRecord {
                path: osd.child(APPLIED_PATH_KEY).and_then(|n| n.value.clone()),
                disk_uuid: osd.child(APPLIED_DISK_UUID_KEY).and_then(|n| n.value.clone()),
            };
            osds.insert(id, record);
        }

        Ok(osds)
    }

    /// Ids of all applied OSDs on this node
    pub async fn applied_osd_ids(&self) -> Result<BTreeSet<u32>> {
        Ok(self.applied_osds().await?.into_keys().collect())
    }

    /// Write the applied record for `osd_id`. On failure nothing is left
    /// behind for the id.
    pub async fn mark_applied(&self, osd_id: u32, path: &str, disk_uuid: &str) -> Result<()> {
        let key = self.layout.applied_osd_key(&self.node_id, osd_id);

        let result = async {
            self.store
                .set(&format!("{}/{}", key, APPLIED_PATH_KEY), path)
                .await?;
            self.store
                .set(&format!("{}/{}", key, APPLIED_DISK_UUID_KEY), disk_uuid)
                .await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = self.store.delete(&key, true).await {
                if !cleanup.is_key_not_found() {
                    warn!(osd_id, "failed to clean up partial applied record: {}", cleanup);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Delete the applied record for `osd_id`
    pub async fn remove_applied(&self, osd_id: u32) -> Result<()> {
        let key = self.layout.applied_osd_key(&self.node_id, osd_id);
        self.store.delete(&key, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::ports::KeyValueStore;
    use crate::state::StoreLayout;
    use std::sync::Arc;

    fn state() -> (OsdState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            OsdState::new(store.clone(), StoreLayout::default(), "node1"),
            store,
        )
    }

    #[tokio::test]
    async fn test_empty_applied() {
        let (state, _store) = state();
        assert!(state.applied_osds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_and_remove_applied() {
        let (state, store) = state();
        state.mark_applied(0, "/var/lib/rook", "disk-0").await.unwrap();
        state.mark_applied(3, "/var/lib/rook", "disk-3").await.unwrap();

        assert_eq!(
            store.get("/ceph/osd/applied/node1/3/disk-uuid").await.unwrap(),
            "disk-3"
        );

        let applied = state.applied_osds().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[&0].path.as_deref(), Some("/var/lib/rook"));

        state.remove_applied(0).await.unwrap();
        let ids = state.applied_osd_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_applied_skips_non_numeric_ids() {
        let (state, store) = state();
        store
            .set("/ceph/osd/applied/node1/garbage/path", "/x")
            .await
            .unwrap();
        state.mark_applied(1, "/x", "d").await.unwrap();

        let ids = state.applied_osd_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_mark_leaves_no_partial_record() {
        let (state, store) = state();
        store.fail_writes_matching(Some("disk-uuid".into()));

        assert!(state.mark_applied(2, "/var/lib/rook", "disk-2").await.is_err());

        store.fail_writes_matching(None);
        assert!(state.applied_osds().await.unwrap().is_empty());
    }
}

//! Cluster Info Accessors

use super::keys::StoreLayout;
use crate::domain::model::ClusterInfo;
use crate::domain::ports::KeyValueStore;
use crate::error::Result;

const NAME_KEY: &str = "name";
const FSID_KEY: &str = "fsid";
const ADMIN_SECRET_KEY: &str = "_secrets/admin";

/// Load the cluster identity. Returns `None` while the cluster has not been
/// initialized.
pub async fn load_cluster_info(
    store: &dyn KeyValueStore,
    layout: &StoreLayout,
) -> Result<Option<ClusterInfo>> {
    let fsid = match store.get(&layout.cluster_key(FSID_KEY)).await {
        Ok(fsid) => fsid,
        Err(e) if e.is_key_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    let name = store.get(&layout.cluster_key(NAME_KEY)).await?;
    let admin_secret = store.get(&layout.cluster_key(ADMIN_SECRET_KEY)).await?;

    Ok(Some(ClusterInfo {
        name,
        fsid,
        admin_secret,
    }))
}

/// Persist the cluster identity
pub async fn save_cluster_info(
    store: &dyn KeyValueStore,
    layout: &StoreLayout,
    cluster: &ClusterInfo,
) -> Result<()> {
    store.set(&layout.cluster_key(NAME_KEY), &cluster.name).await?;
    store
        .set(&layout.cluster_key(ADMIN_SECRET_KEY), &cluster.admin_secret)
        .await?;
    // fsid last: its presence marks the cluster as initialized
    store.set(&layout.cluster_key(FSID_KEY), &cluster.fsid).await
}

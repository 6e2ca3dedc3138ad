//! Store Key Layout
//!
//! Builds every key path the agent reads or writes:
//!
//! ```text
//! <ns>/cluster/{name,fsid,_secrets/admin}
//! <ns>/osd/desired/<node>/ready
//! <ns>/osd/desired/<node>/device/<slot>       = osd id
//! <ns>/osd/desired/<node>/device-path/<slot>  = original device path
//! <ns>/osd/desired/<node>/dir/<slot>          = osd id
//! <ns>/osd/desired/<node>/dir-path/<slot>     = original directory path
//! <ns>/osd/applied/<node>/<id>/{path,disk-uuid}
//! ```

use crate::domain::model::SlotKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "/ceph";

const OSD_KEY: &str = "osd";
const DESIRED_KEY: &str = "desired";
const APPLIED_KEY: &str = "applied";
const CLUSTER_KEY: &str = "cluster";
const READY_KEY: &str = "ready";

pub const APPLIED_PATH_KEY: &str = "path";
pub const APPLIED_DISK_UUID_KEY: &str = "disk-uuid";

/// Collapse a filesystem path into a single flat key segment.
///
/// Strips one leading separator so the key is not hidden, then replaces the
/// remaining separators with underscores.
pub fn sanitize_path(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.replace('/', "_")
}

/// Best-effort inverse of [`sanitize_path`], used only when the original
/// path was never recorded. Lossy for paths containing underscores.
pub fn unsanitize_path(segment: &str) -> String {
    format!("/{}", segment.replace('_', "/"))
}

/// Key paths rooted at a configurable namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLayout {
    namespace: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl StoreLayout {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = namespace.trim_end_matches('/');
        let namespace = if namespace.starts_with('/') {
            namespace.to_string()
        } else {
            format!("/{}", namespace)
        };
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster_key(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.namespace, CLUSTER_KEY, leaf)
    }

    pub fn desired_node_key(&self, node_id: &str) -> String {
        format!("{}/{}/{}/{}", self.namespace, OSD_KEY, DESIRED_KEY, node_id)
    }

    pub fn ready_key(&self, node_id: &str) -> String {
        format!("{}/{}", self.desired_node_key(node_id), READY_KEY)
    }

    /// Directory holding all slots of one kind
    pub fn slots_key(&self, node_id: &str, kind: SlotKind) -> String {
        format!("{}/{}", self.desired_node_key(node_id), kind.key())
    }

    /// Directory holding the original paths of one kind of slot
    pub fn slot_paths_key(&self, node_id: &str, kind: SlotKind) -> String {
        format!("{}/{}-path", self.desired_node_key(node_id), kind.key())
    }

    pub fn slot_key(&self, node_id: &str, kind: SlotKind, path: &str) -> String {
        format!("{}/{}", self.slots_key(node_id, kind), sanitize_path(path))
    }

    pub fn slot_path_key(&self, node_id: &str, kind: SlotKind, path: &str) -> String {
        format!("{}/{}", self.slot_paths_key(node_id, kind), sanitize_path(path))
    }

    pub fn applied_node_key(&self, node_id: &str) -> String {
        format!("{}/{}/{}/{}", self.namespace, OSD_KEY, APPLIED_KEY, node_id)
    }

    pub fn applied_osd_key(&self, node_id: &str, osd_id: u32) -> String {
        format!("{}/{}", self.applied_node_key(node_id), osd_id)
    }
}

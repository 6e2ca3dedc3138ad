//! Desired and Applied State
//!
//! Typed accessors over the desired-state store. Desired slots are written
//! by placement logic and read by the agent; applied records are written by
//! the agent after first-time provisioning and removed only by the pruner.

pub mod applied;
pub mod cluster;
pub mod desired;
pub mod keys;

pub use applied::*;
pub use cluster::*;
pub use desired::*;
pub use keys::*;

use crate::domain::ports::KeyValueStoreRef;

/// Node-scoped view of the OSD state in the store
#[derive(Clone)]
pub struct OsdState {
    store: KeyValueStoreRef,
    layout: StoreLayout,
    node_id: String,
}

impl OsdState {
    pub fn new(store: KeyValueStoreRef, layout: StoreLayout, node_id: impl Into<String>) -> Self {
        Self {
            store,
            layout,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn store(&self) -> &KeyValueStoreRef {
        &self.store
    }
}

impl std::fmt::Debug for OsdState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsdState")
            .field("layout", &self.layout)
            .field("node_id", &self.node_id)
            .finish()
    }
}

//! Adapters
//!
//! Concrete implementations of the domain ports:
//! - [`memory_store`]: in-memory hierarchical store
//! - [`ceph`]: cluster connections and OSD initialization via the ceph CLI
//! - [`format`]: device formatting via `sgdisk`
//! - [`process`]: child process supervision

pub mod ceph;
pub mod format;
pub mod memory_store;
pub mod process;

pub use ceph::{CephCliConnection, CephCliFactory, CephOsdInitializer};
pub use format::SgdiskFormatter;
pub use memory_store::MemoryStore;
pub use process::ProcessManager;

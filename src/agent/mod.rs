//! OSD Agent
//!
//! Reconciles the OSDs running on this node with the desired state in the
//! store.
//!
//! - [`guard`]: single-flight guard for reconciliation passes
//! - [`osd`]: data directory layout and launch arguments
//! - [`processes`]: cache of locally launched OSD processes
//! - [`provision`]: slot provisioning pipeline
//! - [`prune`]: removal of OSDs that are no longer desired
//! - [`orchestrator`]: lifecycle hooks tying it all together

pub mod guard;
pub mod orchestrator;
pub mod osd;
pub mod processes;
pub mod provision;
pub mod prune;

pub use guard::{ConfigGuard, ConfigPermit};
pub use orchestrator::{OsdAgent, OSD_AGENT_NAME};
pub use processes::ProcessCache;
pub use provision::{ProvisionSettings, Provisioner};
pub use prune::Pruner;

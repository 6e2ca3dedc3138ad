//! Pruner
//!
//! Retires OSDs that are applied on this node but no longer desired. The
//! desired set is read fresh from the store on every run; it is the
//! tie-breaker against anything the provisioning side may still be doing.

use crate::agent::processes::ProcessCache;
use crate::domain::ports::{ClusterConnection, ProcessSupervisor};
use crate::error::{Error, Result};
use crate::metrics::AgentMetrics;
use crate::state::OsdState;
use tracing::{error, info};

pub struct Pruner<'a> {
    pub(crate) state: &'a OsdState,
    pub(crate) connection: &'a dyn ClusterConnection,
    pub(crate) supervisor: &'a dyn ProcessSupervisor,
    pub(crate) processes: &'a ProcessCache,
    pub(crate) metrics: &'a AgentMetrics,
}

impl<'a> Pruner<'a> {
    /// Remove every applied-but-undesired OSD. Each removal is independent;
    /// the last failure is returned after all have been attempted.
    pub async fn prune(&self) -> Result<()> {
        let desired = self.state.desired_osd_ids().await?;
        let applied = self.state.applied_osd_ids().await?;

        info!(?applied, ?desired, "stopping undesired osds");

        let mut last_error = None;
        for osd_id in applied.difference(&desired).copied() {
            info!(osd_id, "removing osd");
            match self.remove_osd(osd_id).await {
                Ok(()) => self.metrics.record_removal(true),
                Err(e) => {
                    error!(osd_id, "failed to remove osd: {}", e);
                    self.metrics.record_removal(false);
                    last_error = Some(e);
                }
            }
        }

        last_error.map_or(Ok(()), Err)
    }

    async fn remove_osd(&self, osd_id: u32) -> Result<()> {
        // data migration starts here; it is not awaited
        self.connection
            .mark_out(osd_id)
            .await
            .map_err(|e| match e {
                Error::MarkOut { .. } => e,
                other => Error::MarkOut {
                    osd_id,
                    reason: other.to_string(),
                },
            })?;

        if let Some(handle) = self.processes.remove(osd_id) {
            if let Err(e) = self.supervisor.stop(&handle).await {
                self.processes.insert(osd_id, handle);
                return Err(e);
            }
        }

        self.connection.purge(osd_id).await.map_err(|e| match e {
            Error::Purge { .. } => e,
            other => Error::Purge {
                osd_id,
                reason: other.to_string(),
            },
        })?;

        self.state.remove_applied(osd_id).await?;

        info!(osd_id, "stopped and removed osd");
        Ok(())
    }
}

use std::sync::Arc;

use atjob_core::{JobPhase, Resource, ScheduledJob};
use atjob_store::ObjectStore;
use tracing::info;

use crate::error::{ControllerError, Result};

/// Persists phase and outcome fields of a job with a single conditional write.
pub struct StatusWriter {
    jobs: Arc<dyn ObjectStore<ScheduledJob>>,
}

impl StatusWriter {
    pub fn new(jobs: Arc<dyn ObjectStore<ScheduledJob>>) -> Self {
        Self { jobs }
    }

    /// Write `phase`, `reason` and `message` onto `job`.
    ///
    /// The write is conditional on the `resource_version` of `job` as it was
    /// read; a concurrent modification surfaces as a store `Conflict`
    /// (see [`ControllerError::is_conflict`]) and nothing is written. The
    /// phase may only move forward along `Pending → Running → Done`.
    pub async fn persist(
        &self,
        job: &ScheduledJob,
        phase: JobPhase,
        reason: Option<String>,
        message: Option<String>,
    ) -> Result<ScheduledJob> {
        let from = job.status.phase.clone().normalize();
        let forward = matches!((from.rank(), phase.rank()), (Some(a), Some(b)) if b > a);
        if !forward {
            return Err(ControllerError::InvalidTransition {
                key: job.key(),
                from,
                to: phase,
            });
        }

        let mut next = job.clone();
        next.status.phase = phase;
        next.status.reason = reason;
        next.status.message = message;

        let written = self.jobs.update(next).await?;
        info!(
            job = %written.key(),
            from = %from,
            to = %written.status.phase,
            version = written.meta.resource_version,
            "job phase persisted"
        );
        Ok(written)
    }
}

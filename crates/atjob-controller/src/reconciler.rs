use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atjob_core::{ExecutionUnit, JobPhase, ObjectKey, ScheduledJob};
use atjob_store::ObjectStore;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    clock::Clock,
    error::Result,
    schedule::time_until,
    status::StatusWriter,
    unit::{observe_outcome, Outcome, UnitManager},
};

/// Wake-up directive returned to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Do not re-invoke on a timer; a watch event or resync will.
    None,
    /// Re-invoke as soon as possible.
    Immediate,
    /// Re-invoke after exactly this long.
    After(Duration),
}

/// The control interface the dispatcher drives.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;
}

/// Phase state machine for [`ScheduledJob`]s.
pub struct Reconciler {
    jobs: Arc<dyn ObjectStore<ScheduledJob>>,
    units: UnitManager,
    status: StatusWriter,
    clock: Arc<dyn Clock>,
    max_conflict_retries: u32,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn ObjectStore<ScheduledJob>>,
        units: Arc<dyn ObjectStore<ExecutionUnit>>,
        clock: Arc<dyn Clock>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            status: StatusWriter::new(jobs.clone()),
            units: UnitManager::new(units),
            jobs,
            clock,
            max_conflict_retries,
        }
    }

    /// One decision pass from a fresh read. Every decision uses the phase
    /// as read here; a rejected write aborts the pass.
    async fn reconcile_once(&self, key: &ObjectKey) -> Result<Action> {
        let job = match self.jobs.get(key).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                // Deleted after the trigger; nothing left to do.
                debug!("job not found, skipping");
                return Ok(Action::None);
            }
            Err(e) => return Err(e.into()),
        };

        match &job.status.phase {
            JobPhase::Unset | JobPhase::Pending => self.on_pending(&job).await,
            JobPhase::Running => self.on_running(&job).await,
            JobPhase::Done => {
                debug!("job done");
                Ok(Action::None)
            }
            JobPhase::Unknown(phase) => {
                warn!(%phase, "unrecognised phase, ignoring");
                Ok(Action::None)
            }
        }
    }

    async fn on_pending(&self, job: &ScheduledJob) -> Result<Action> {
        let wait = time_until(&job.spec.schedule, self.clock.now()).map_err(|e| {
            error!(schedule = %job.spec.schedule, error = %e, "schedule parsing failed");
            e
        })?;

        // `to_std` fails for negative durations, i.e. already due.
        if let Ok(wait) = wait.to_std() {
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "not due yet");
                return Ok(Action::After(wait));
            }
        }

        info!(command = %job.spec.command, "job is due");
        self.status
            .persist(job, JobPhase::Running, None, None)
            .await?;
        Ok(Action::None)
    }

    async fn on_running(&self, job: &ScheduledJob) -> Result<Action> {
        let (unit, created) = self.units.ensure_unit(job).await?;
        if created {
            // Progress now comes from watch events on the unit.
            return Ok(Action::None);
        }

        match observe_outcome(&unit) {
            Outcome::Running => {
                debug!(unit_phase = %unit.status.phase, "execution unit still running");
                Ok(Action::None)
            }
            Outcome::Succeeded { reason, message } | Outcome::Failed { reason, message } => {
                info!(
                    unit_phase = %unit.status.phase,
                    reason = reason.as_deref().unwrap_or(""),
                    message = message.as_deref().unwrap_or(""),
                    "execution unit terminated"
                );
                self.status
                    .persist(job, JobPhase::Done, reason, message)
                    .await?;
                Ok(Action::None)
            }
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    /// Reconcile one job, restarting from a fresh read on write conflicts.
    ///
    /// After `max_conflict_retries` consecutive conflicts the conflict is
    /// returned and the dispatcher retries with backoff.
    #[instrument(skip(self), fields(job = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let mut conflicts = 0;
        loop {
            match self.reconcile_once(key).await {
                Err(e) if e.is_conflict() && conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    debug!(attempt = conflicts, "status write conflicted, re-reading");
                }
                result => return result,
            }
        }
    }
}

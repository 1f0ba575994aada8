use std::sync::Arc;
use std::time::Duration;

use atjob_core::{ExecutionUnit, Resource, ScheduledJob};
use atjob_store::{ObjectStore, WatchEvent};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{error, info, warn};

use crate::error::Result;

/// Cascading delete of execution units whose owning job is gone.
///
/// A unit is orphaned when its controller owner reference names a job that
/// no longer exists, or that exists under a different uid (deleted and
/// re-created with the same name).
pub struct GarbageCollector {
    jobs: Arc<dyn ObjectStore<ScheduledJob>>,
    units: Arc<dyn ObjectStore<ExecutionUnit>>,
}

impl GarbageCollector {
    pub fn new(
        jobs: Arc<dyn ObjectStore<ScheduledJob>>,
        units: Arc<dyn ObjectStore<ExecutionUnit>>,
    ) -> Self {
        Self { jobs, units }
    }

    /// Delete every orphaned unit. Returns how many were removed.
    pub async fn sweep(&self) -> Result<usize> {
        let mut removed = 0;
        for unit in self.units.list().await? {
            let Some(owner) = unit.meta.controller_ref() else {
                continue;
            };
            if owner.kind != ScheduledJob::KIND {
                continue;
            }
            let orphaned = match self.jobs.get(&owner.key()).await {
                Ok(job) => job.meta.uid != owner.uid,
                Err(e) if e.is_not_found() => true,
                Err(e) => return Err(e.into()),
            };
            if !orphaned {
                continue;
            }
            match self.units.delete(&unit.key()).await {
                Ok(()) => {
                    info!(unit = %unit.key(), owner_uid = %owner.uid, "orphaned execution unit deleted");
                    removed += 1;
                }
                // Someone else got there first.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Sweep on every job deletion and every `interval`, until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut job_events = self.jobs.watch();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        info!(interval_secs = interval.as_secs(), "garbage collector started");

        loop {
            let sweep = tokio::select! {
                _ = ticker.tick() => true,
                event = job_events.recv() => match event {
                    Ok(WatchEvent::Deleted(_)) => true,
                    Ok(_) => false,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "job watch lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    false
                }
            };
            if sweep {
                if let Err(e) = self.sweep().await {
                    error!(code = e.code(), error = %e, "garbage collection sweep failed");
                }
            }
        }
        info!("garbage collector stopped");
    }
}

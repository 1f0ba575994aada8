use std::collections::BTreeMap;
use std::sync::Arc;

use atjob_core::{
    ExecutionUnit, ObjectMeta, OwnerReference, Resource, RestartPolicy, ScheduledJob, UnitPhase,
    UnitSpec, UnitStatus,
};
use atjob_store::ObjectStore;
use tracing::{debug, info};

use crate::error::{ControllerError, Result};

/// Terminal or non-terminal result of an execution unit, as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Succeeded {
        reason: Option<String>,
        message: Option<String>,
    },
    Failed {
        reason: Option<String>,
        message: Option<String>,
    },
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Running)
    }
}

/// Build the unit for `job`: same key, whitespace-split argv, restart on
/// failure, and a controller owner reference back to the job.
pub fn build_unit(job: &ScheduledJob) -> ExecutionUnit {
    let mut meta = ObjectMeta::new(&job.meta.namespace, &job.meta.name);
    meta.owner_references.push(OwnerReference {
        kind: ScheduledJob::KIND.to_string(),
        namespace: job.meta.namespace.clone(),
        name: job.meta.name.clone(),
        uid: job.meta.uid.clone(),
        controller: true,
    });
    meta.labels = BTreeMap::from([("app".to_string(), job.meta.name.clone())]);

    ExecutionUnit {
        meta,
        spec: UnitSpec {
            argv: job
                .spec
                .command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            restart_policy: RestartPolicy::OnFailure,
        },
        status: UnitStatus::default(),
    }
}

/// Read the unit's outcome. `Pending` and `Running` both count as running.
pub fn observe_outcome(unit: &ExecutionUnit) -> Outcome {
    let UnitStatus {
        phase,
        reason,
        message,
        ..
    } = &unit.status;
    match phase {
        UnitPhase::Pending | UnitPhase::Running => Outcome::Running,
        UnitPhase::Succeeded => Outcome::Succeeded {
            reason: reason.clone(),
            message: message.clone(),
        },
        UnitPhase::Failed => Outcome::Failed {
            reason: reason.clone(),
            message: message.clone(),
        },
    }
}

/// Idempotent lookup-or-create of the execution unit backing a job.
pub struct UnitManager {
    units: Arc<dyn ObjectStore<ExecutionUnit>>,
}

impl UnitManager {
    pub fn new(units: Arc<dyn ObjectStore<ExecutionUnit>>) -> Self {
        Self { units }
    }

    /// Return the job's unit, creating it if absent.
    ///
    /// The flag is `true` only for the call whose create actually landed.
    /// Losing a create race to another reconcile is not an error: the
    /// winner's unit is read back and returned with `false`.
    pub async fn ensure_unit(&self, job: &ScheduledJob) -> Result<(ExecutionUnit, bool)> {
        let key = job.key();
        match self.units.get(&key).await {
            Ok(existing) => return Ok((check_owner(job, existing)?, false)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        match self.units.create(build_unit(job)).await {
            Ok(created) => {
                info!(unit = %key, argv = ?created.spec.argv, "execution unit created");
                Ok((created, true))
            }
            Err(e) if e.is_already_exists() => {
                debug!(unit = %key, "execution unit created concurrently, reusing it");
                let existing = self.units.get(&key).await?;
                Ok((check_owner(job, existing)?, false))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn check_owner(job: &ScheduledJob, unit: ExecutionUnit) -> Result<ExecutionUnit> {
    let owner_uid = unit.meta.controller_ref().map(|r| r.uid.clone());
    if owner_uid.as_deref() == Some(job.meta.uid.as_str()) {
        Ok(unit)
    } else {
        Err(ControllerError::ForeignUnit {
            key: unit.key(),
            owner_uid,
            job_uid: job.meta.uid.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(command: &str) -> ScheduledJob {
        let mut job = ScheduledJob::new("ns", "hello", command, "2030-01-01T00:00:00Z");
        job.meta.uid = "uid-1".into();
        job
    }

    #[test]
    fn argv_is_whitespace_split() {
        let unit = build_unit(&job("echo   hi\tthere "));
        assert_eq!(unit.spec.argv, ["echo", "hi", "there"]);
    }

    #[test]
    fn quotes_are_not_interpreted() {
        let unit = build_unit(&job(r#"sh -c "echo hi""#));
        assert_eq!(unit.spec.argv, ["sh", "-c", "\"echo", "hi\""]);
    }

    #[test]
    fn unit_is_addressed_and_owned_by_its_job() {
        let job = job("true");
        let unit = build_unit(&job);
        assert_eq!(unit.key(), job.key());
        assert_eq!(unit.spec.restart_policy, RestartPolicy::OnFailure);
        assert_eq!(unit.meta.labels.get("app").map(String::as_str), Some("hello"));

        let owner = unit.meta.controller_ref().expect("controller ref");
        assert_eq!(owner.kind, "ScheduledJob");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.key(), job.key());
    }

    #[test]
    fn outcome_follows_unit_phase() {
        let mut unit = build_unit(&job("true"));
        assert_eq!(observe_outcome(&unit), Outcome::Running);

        unit.status.phase = UnitPhase::Running;
        assert!(!observe_outcome(&unit).is_terminal());

        unit.status = UnitStatus {
            phase: UnitPhase::Failed,
            reason: Some("Error".into()),
            message: Some("exit code 2".into()),
            restarts: 3,
        };
        assert_eq!(
            observe_outcome(&unit),
            Outcome::Failed {
                reason: Some("Error".into()),
                message: Some("exit code 2".into()),
            }
        );
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Lifecycle phase of a [`ScheduledJob`].
///
/// Persisted as a plain string. An absent or empty value deserializes to
/// `Unset`; any value this build does not recognise is kept verbatim in
/// `Unknown` so it is never silently rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobPhase {
    #[default]
    Unset,
    /// Waiting for the scheduled time.
    Pending,
    /// Due; the execution unit is being created or is running.
    Running,
    /// The execution unit reached a terminal outcome. Never left.
    Done,
    Unknown(String),
}

impl JobPhase {
    /// Map `Unset` to `Pending`; every other phase is returned unchanged.
    pub fn normalize(self) -> Self {
        match self {
            JobPhase::Unset => JobPhase::Pending,
            other => other,
        }
    }

    /// Position in the lifecycle order `Pending < Running < Done`.
    ///
    /// `None` for `Unset` and `Unknown`, which are outside the order.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobPhase::Pending => Some(0),
            JobPhase::Running => Some(1),
            JobPhase::Done => Some(2),
            JobPhase::Unset | JobPhase::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobPhase::Unset => "",
            JobPhase::Pending => "Pending",
            JobPhase::Running => "Running",
            JobPhase::Done => "Done",
            JobPhase::Unknown(s) => s,
        }
    }
}

impl From<String> for JobPhase {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" => JobPhase::Unset,
            "Pending" => JobPhase::Pending,
            "Running" => JobPhase::Running,
            "Done" => JobPhase::Done,
            _ => JobPhase::Unknown(s),
        }
    }
}

impl From<JobPhase> for String {
    fn from(phase: JobPhase) -> Self {
        match phase {
            JobPhase::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Unset => f.write_str("<unset>"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Desired state, written by users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Split on whitespace at execution time. No quoting or escaping.
    pub command: String,
    /// Absolute UTC instant, `YYYY-MM-DDTHH:MM:SSZ`.
    pub schedule: String,
}

/// Observed state, written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// "Run `command` once, at or after `schedule`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub meta: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl ScheduledJob {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: JobSpec {
                command: command.into(),
                schedule: schedule.into(),
            },
            status: JobStatus::default(),
        }
    }
}

impl Resource for ScheduledJob {
    const KIND: &'static str = "ScheduledJob";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_status_deserializes_as_unset() {
        let json = r#"{"meta":{"namespace":"default","name":"a"},
                       "spec":{"command":"echo hi","schedule":"2030-01-01T00:00:00Z"}}"#;
        let job: ScheduledJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.status.phase, JobPhase::Unset);
        assert_eq!(job.status.phase.clone().normalize(), JobPhase::Pending);
    }

    #[test]
    fn unrecognised_phase_is_preserved() {
        let phase: JobPhase = serde_json::from_str(r#""Paused""#).unwrap();
        assert_eq!(phase, JobPhase::Unknown("Paused".into()));
        assert_eq!(serde_json::to_string(&phase).unwrap(), r#""Paused""#);
        assert_eq!(phase.rank(), None);
    }

    #[test]
    fn known_phases_serialize_verbatim() {
        for (phase, wire) in [
            (JobPhase::Pending, r#""Pending""#),
            (JobPhase::Running, r#""Running""#),
            (JobPhase::Done, r#""Done""#),
            (JobPhase::Unset, r#""""#),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), wire);
        }
    }

    #[test]
    fn rank_orders_lifecycle() {
        assert!(JobPhase::Pending.rank() < JobPhase::Running.rank());
        assert!(JobPhase::Running.rank() < JobPhase::Done.rank());
    }

    #[test]
    fn normalize_keeps_known_phases() {
        assert_eq!(JobPhase::Done.normalize(), JobPhase::Done);
        assert_eq!(
            JobPhase::Unknown("x".into()).normalize(),
            JobPhase::Unknown("x".into())
        );
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// What the runner does when the process exits non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart on a non-zero exit, never after success.
    #[default]
    OnFailure,
    Never,
}

/// Observed phase of an [`ExecutionUnit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    /// Created, not yet picked up by a runner.
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl UnitPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitPhase::Succeeded | UnitPhase::Failed)
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitPhase::Pending => "pending",
            UnitPhase::Running => "running",
            UnitPhase::Succeeded => "succeeded",
            UnitPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    #[serde(default)]
    pub phase: UnitPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Number of times the process was restarted after a failure.
    #[serde(default)]
    pub restarts: u32,
}

/// The process that runs one [`ScheduledJob`](crate::job::ScheduledJob).
///
/// Shares its key with the owning job and carries a controller owner
/// reference back to it. `spec` is immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub meta: ObjectMeta,
    pub spec: UnitSpec,
    #[serde(default)]
    pub status: UnitStatus,
}

impl Resource for ExecutionUnit {
    const KIND: &'static str = "ExecutionUnit";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

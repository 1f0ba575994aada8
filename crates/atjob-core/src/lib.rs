//! `atjob-core`: resource types, configuration and shared errors.
//!
//! Every other crate in the workspace speaks in terms of the two resource
//! kinds defined here:
//!
//! | Kind            | Written by                          | Purpose                               |
//! |-----------------|-------------------------------------|---------------------------------------|
//! | `ScheduledJob`  | users (spec), controller (status)   | run this command once at this time    |
//! | `ExecutionUnit` | controller (spec), runner (status)  | the process that actually runs it     |

pub mod config;
pub mod error;
pub mod job;
pub mod manifest;
pub mod meta;
pub mod unit;

pub use config::AtjobConfig;
pub use error::{AtjobError, Result};
pub use job::{JobPhase, JobSpec, JobStatus, ScheduledJob};
pub use manifest::Manifest;
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource};
pub use unit::{ExecutionUnit, RestartPolicy, UnitPhase, UnitSpec, UnitStatus};

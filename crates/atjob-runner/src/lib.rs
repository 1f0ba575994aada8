//! Local execution of [`ExecutionUnit`](atjob_core::ExecutionUnit)s as child
//! processes.
//!
//! The runner is the only writer of unit status. It claims `Pending` units
//! with a conditional write, runs `argv` directly (no shell), restarts
//! failed attempts under the on-failure policy, and records the terminal
//! phase for the controller to copy onto the owning job.

pub mod error;
pub mod runner;
pub mod truncate;

pub use error::{Result, RunnerError};
pub use runner::UnitRunner;
pub use truncate::truncate_middle;

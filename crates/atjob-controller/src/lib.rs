//! `atjob-controller`: the reconcile loop for one-shot scheduled jobs.
//!
//! # Overview
//!
//! A [`ScheduledJob`](atjob_core::ScheduledJob) moves strictly forward
//! through `Pending → Running → Done`. Each call to
//! [`Reconciler::reconcile`] reads the job, decides the next step for its
//! current phase and returns a wake-up [`Action`]; it never sleeps.
//!
//! | Phase     | Reconcile does                                                     |
//! |-----------|--------------------------------------------------------------------|
//! | `Pending` | not due: `After(wait)`; due: persist `Running`                     |
//! | `Running` | create the execution unit once; copy its terminal outcome, persist `Done` |
//! | `Done`    | nothing                                                            |
//!
//! [`Controller`] is the dispatcher around it: a keyed work queue with at
//! most one in-flight reconcile per job, requeue timers, per-key error
//! backoff, watch-driven triggers and a periodic resync.
//! [`GarbageCollector`] removes execution units whose owning job is gone.

pub mod clock;
pub mod controller;
pub mod error;
pub mod gc;
pub mod queue;
pub mod reconciler;
pub mod schedule;
pub mod status;
pub mod unit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::Controller;
pub use error::{ControllerError, Result};
pub use gc::GarbageCollector;
pub use queue::{WorkQueue, MAX_REQUEUE_DELAY};
pub use reconciler::{Action, Reconcile, Reconciler};
pub use schedule::{parse_schedule, time_until, SCHEDULE_FORMAT};
pub use status::StatusWriter;
pub use unit::{build_unit, observe_outcome, Outcome, UnitManager};

//! Periodic jobs driven by the host's tick.
//!
//! The scheduler owns no thread of its own. The host calls
//! [`Scheduler::update_jobs`] once per frame; due jobs run inline on that
//! thread, or are handed off to a worker when registered as detached.

pub mod clock;
pub mod error;
pub mod scheduler;
pub mod types;

pub use {
    clock::{Clock, ManualClock, SystemClock},
    error::{Error, Result},
    scheduler::{Scheduler, SchedulerConfig},
    types::{ExecutionMode, JobCreate, JobInfo, JobTask, ScanReport, SchedulerStatus},
};

//! Trigger engine: pollers, rule filtering, job dispatch and the dispatcher loop.
//!
//! This crate provides:
//! - [`Dispatcher`]: periodic selection of due triggers over a bounded pool
//! - [`PollerRegistry`] with database, mailbox and cron pollers
//! - [`JobDispatcher`]: fire-and-forget invocation of linked jobs
//! - [`ExecutionTracker`]: the per-cycle audit log
//! - [`TriggerService`]: lifecycle transitions and trigger/rule/job management
//! - [`TriggerManifest`]: YAML bulk definitions

pub mod cycle;
pub mod dispatcher;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod manifest;
pub mod pollers;
pub mod tracker;

pub use cycle::{CycleReport, CycleRunner};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, InFlightSet};
pub use error::{EngineError, Result};
pub use jobs::{HttpJobExecutor, JobDispatcher, JobError, JobExecutor};
pub use lifecycle::{RuleTestResult, TriggerService};
pub use manifest::TriggerManifest;
pub use pollers::{PollContext, PollOutcome, Poller, PollerRegistry};
pub use tracker::ExecutionTracker;

//! Domain model shared by every sluice crate.
//!
//! This crate provides:
//! - Trigger, rule, job-link and execution types (the persisted data model)
//! - The one-of [`TriggerConfig`] sum type with its JSON record layout
//! - Create/update validation for triggers and rules
//! - Cron schedule math used to decide when a trigger is due
//! - Environment-driven [`Config`]

pub mod config;
pub mod error;
pub mod execution;
pub mod rule;
pub mod schedule;
pub mod trigger;
pub mod validation;

pub use config::Config;
pub use error::*;
pub use execution::*;
pub use rule::*;
pub use trigger::*;

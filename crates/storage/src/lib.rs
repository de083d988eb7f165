//! Persistence collaborators for the trigger engine.
//!
//! This crate provides:
//! - [`TriggerStore`]: triggers, rules, job links and the execution audit log
//! - [`PgStore`] (PostgreSQL + JSONB) and [`MemoryStore`] implementations
//! - [`CredentialResolver`] for saved database/IMAP connections
//! - Pool setup with embedded migrations

pub mod credentials;
pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
mod rows;
pub mod store;

pub use credentials::{CredentialResolver, MemoryCredentials, PgCredentials};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{clamp_page, TriggerStore, MAX_EXECUTION_PAGE};

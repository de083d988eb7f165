//! Source connectors: the SQL executor and mail client the pollers read from.
//!
//! This crate provides:
//! - [`SqlExecutor`] with a pooled PostgreSQL implementation and the
//!   watermark query builder
//! - [`MailClient`] with an IMAP implementation (`async-imap` over rustls)
//! - [`MailMessage`], the parsed envelope/body/attachment view of a message

pub mod error;
pub mod imap;
pub mod mail;
pub mod postgres;
pub mod sql;

pub use error::SourceError;
pub use imap::ImapMailClient;
pub use mail::{Attachment, MailBatch, MailClient, MailMessage};
pub use postgres::PgSqlExecutor;
pub use sql::{SqlExecutor, SqlQuery};

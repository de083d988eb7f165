use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("imap error: {0}")]
    Imap(#[from] async_imap::error::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("source timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, SourceError>;

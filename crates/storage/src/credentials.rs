//! Resolution of saved connections referenced by trigger configs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sluice_core::{ConnectionSource, DatabaseConnection, ImapConnection};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::rows::SavedConnectionRow;

/// Looks up saved connection descriptors by id.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_database(&self, id: Uuid) -> Result<DatabaseConnection>;

    async fn resolve_mailbox(&self, id: Uuid) -> Result<ImapConnection>;

    /// Inline connections bypass the lookup.
    async fn database(&self, source: &ConnectionSource<DatabaseConnection>) -> Result<DatabaseConnection> {
        match source {
            ConnectionSource::Inline(conn) => Ok(conn.clone()),
            ConnectionSource::Saved { connection_id } => self.resolve_database(*connection_id).await,
        }
    }

    /// Inline connections bypass the lookup.
    async fn mailbox(&self, source: &ConnectionSource<ImapConnection>) -> Result<ImapConnection> {
        match source {
            ConnectionSource::Inline(conn) => Ok(conn.clone()),
            ConnectionSource::Saved { connection_id } => self.resolve_mailbox(*connection_id).await,
        }
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────────

/// Reads the `saved_connections` table.
#[derive(Clone)]
pub struct PgCredentials {
    pool: PgPool,
}

impl PgCredentials {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch<T: DeserializeOwned>(&self, id: Uuid, expected: &'static str) -> Result<T> {
        let row = sqlx::query_as::<_, SavedConnectionRow>(
            "SELECT id, kind, config FROM saved_connections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("saved connection", id))?;

        if row.kind != expected {
            return Err(StoreError::ConnectionKind {
                id: row.id,
                expected,
                actual: row.kind,
            });
        }
        Ok(serde_json::from_value(row.config)?)
    }
}

#[async_trait]
impl CredentialResolver for PgCredentials {
    async fn resolve_database(&self, id: Uuid) -> Result<DatabaseConnection> {
        self.fetch(id, "database").await
    }

    async fn resolve_mailbox(&self, id: Uuid) -> Result<ImapConnection> {
        self.fetch(id, "imap").await
    }
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum SavedConnection {
    Database(DatabaseConnection),
    Imap(ImapConnection),
}

impl SavedConnection {
    fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Imap(_) => "imap",
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentials {
    saved: RwLock<HashMap<Uuid, SavedConnection>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_database(&self, id: Uuid, conn: DatabaseConnection) -> Result<()> {
        self.insert(id, SavedConnection::Database(conn))
    }

    pub fn insert_mailbox(&self, id: Uuid, conn: ImapConnection) -> Result<()> {
        self.insert(id, SavedConnection::Imap(conn))
    }

    fn insert(&self, id: Uuid, conn: SavedConnection) -> Result<()> {
        self.saved
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(id, conn);
        Ok(())
    }

    fn lookup(&self, id: Uuid) -> Result<SavedConnection> {
        self.saved
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saved connection", id))
    }
}

#[async_trait]
impl CredentialResolver for MemoryCredentials {
    async fn resolve_database(&self, id: Uuid) -> Result<DatabaseConnection> {
        match self.lookup(id)? {
            SavedConnection::Database(conn) => Ok(conn),
            other => Err(StoreError::ConnectionKind {
                id,
                expected: "database",
                actual: other.kind().to_string(),
            }),
        }
    }

    async fn resolve_mailbox(&self, id: Uuid) -> Result<ImapConnection> {
        match self.lookup(id)? {
            SavedConnection::Imap(conn) => Ok(conn),
            other => Err(StoreError::ConnectionKind {
                id,
                expected: "imap",
                actual: other.kind().to_string(),
            }),
        }
    }
}

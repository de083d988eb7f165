//! Pooled PostgreSQL [`SqlExecutor`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sluice_core::{DatabaseConnection, DatabaseTriggerConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::sql::{build_max_query, SqlExecutor, SqlQuery};

const POOL_MAX_CONNECTIONS: u32 = 2;

/// Keeps one lazily-connected pool per distinct connection string.
pub struct PgSqlExecutor {
    pools: Mutex<HashMap<String, PgPool>>,
    acquire_timeout: Duration,
}

impl PgSqlExecutor {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    fn pool_for(&self, conn: &DatabaseConnection) -> Result<PgPool> {
        let url = conn.connection_string();
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| SourceError::InvalidQuery("connection pool cache poisoned".into()))?;

        if let Some(pool) = pools.get(&url) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy(&url)?;
        debug!(host = %conn.host, database = %conn.database, "created source pool");
        pools.insert(url, pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl SqlExecutor for PgSqlExecutor {
    async fn query(&self, conn: &DatabaseConnection, query: &SqlQuery) -> Result<Vec<Value>> {
        let pool = self.pool_for(conn)?;

        let mut q = sqlx::query(&query.sql);
        for param in &query.params {
            q = q.bind(param.as_str());
        }
        let rows = q.fetch_all(&pool).await?;

        rows.iter()
            .map(|row| row.try_get::<Value, _>(0).map_err(SourceError::from))
            .collect()
    }

    async fn max_watermark(
        &self,
        conn: &DatabaseConnection,
        config: &DatabaseTriggerConfig,
    ) -> Result<Option<String>> {
        let pool = self.pool_for(conn)?;
        let query = build_max_query(config)?;

        let mark: Option<Option<String>> = sqlx::query_scalar(&query.sql)
            .fetch_optional(&pool)
            .await?;

        Ok(mark.flatten())
    }
}

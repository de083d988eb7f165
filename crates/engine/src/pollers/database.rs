use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sluice_connector::sql::{build_poll_query, watermark_of};
use sluice_connector::SqlExecutor;
use sluice_core::{Progress, Trigger, TriggerConfig};
use sluice_storage::CredentialResolver;
use tracing::debug;

use super::{bounded, config_mismatch, PollContext, PollOutcome, Poller};
use crate::error::Result;

/// Watermark polling of a relational table.
pub struct DatabasePoller {
    credentials: Arc<dyn CredentialResolver>,
    executor: Arc<dyn SqlExecutor>,
}

impl DatabasePoller {
    pub fn new(credentials: Arc<dyn CredentialResolver>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            credentials,
            executor,
        }
    }
}

#[async_trait]
impl Poller for DatabasePoller {
    async fn poll(&self, trigger: &Trigger, ctx: &PollContext) -> Result<PollOutcome> {
        let TriggerConfig::Database(config) = &trigger.config else {
            return Err(config_mismatch("database", trigger));
        };

        let conn = self.credentials.database(&config.connection).await?;
        let query = build_poll_query(config)?;
        let rows = bounded(ctx.timeout, self.executor.query(&conn, &query)).await?;

        // Rows are ascending, so the last one carries the highest watermark.
        let progress = rows
            .last()
            .and_then(|row| watermark_of(row, config.watermark_column.trim()))
            .filter(|candidate| {
                config
                    .watermark_type
                    .advances(config.last_watermark.as_deref(), candidate)
            })
            .map(Progress::Watermark);

        debug!(
            trigger_id = %trigger.id,
            table = %config.table_name,
            rows = rows.len(),
            from = ?config.last_watermark,
            to = ?progress,
            "database poll"
        );

        Ok(PollOutcome {
            fetched: rows.len(),
            events: rows,
            progress,
        })
    }

    async fn baseline(&self, trigger: &Trigger, timeout: Duration) -> Result<Option<Progress>> {
        let TriggerConfig::Database(config) = &trigger.config else {
            return Err(config_mismatch("database", trigger));
        };

        let conn = self.credentials.database(&config.connection).await?;
        let head = bounded(timeout, self.executor.max_watermark(&conn, config)).await?;
        Ok(head.map(Progress::Watermark))
    }
}

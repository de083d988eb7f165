//! PostgreSQL-backed [`TriggerStore`].
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate builds
//! without a live database. Progress markers are written with `jsonb_set`
//! so only the marker path inside `config` changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::{Trigger, TriggerExecution, TriggerJob, TriggerRule, TriggerStatus};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::rows::{ExecutionRow, JobLinkRow, RuleRow, TriggerRow, EXECUTION_COLUMNS, TRIGGER_COLUMNS};
use crate::store::{clamp_page, TriggerStore};

/// [`TriggerStore`] over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn expect_affected(result: sqlx::postgres::PgQueryResult, kind: &'static str, id: Uuid) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found(kind, id));
    }
    Ok(())
}

/// Map a PostgreSQL unique violation (23505) to `Duplicate`.
fn map_unique_violation(e: sqlx::Error, kind: &'static str, id: Uuid) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate { kind, id };
        }
    }
    error!("trigger store database error: {}", e);
    StoreError::Database(e)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl TriggerStore for PgStore {
    // ── Triggers ────────────────────────────────────────────────

    async fn find_all_active(&self) -> Result<Vec<Trigger>> {
        let rows = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE status = 'active' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trigger::try_from).collect()
    }

    async fn list(&self) -> Result<Vec<Trigger>> {
        let rows = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trigger::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Trigger>> {
        let row = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trigger::try_from).transpose()
    }

    async fn create(&self, trigger: &Trigger) -> Result<()> {
        let config = serde_json::to_value(&trigger.config)?;
        sqlx::query(
            "INSERT INTO triggers (id, name, description, owner_id, trigger_type, status,
                                   polling_interval, last_polled_at, last_error, config,
                                   created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(trigger.id)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(&trigger.owner_id)
        .bind(trigger.trigger_type.as_str())
        .bind(trigger.status.as_str())
        .bind(to_i32(trigger.polling_interval))
        .bind(trigger.last_polled_at)
        .bind(&trigger.last_error)
        .bind(&config)
        .bind(trigger.created_at)
        .bind(trigger.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "trigger", trigger.id))?;

        Ok(())
    }

    async fn update(&self, trigger: &Trigger) -> Result<()> {
        let config = serde_json::to_value(&trigger.config)?;
        let result = sqlx::query(
            "UPDATE triggers SET
                name = $2,
                description = $3,
                polling_interval = $4,
                config = CASE
                    WHEN jsonb_typeof($5::jsonb -> 'database') = 'object' THEN jsonb_set(
                        $5::jsonb, '{database,last_watermark}',
                        COALESCE(config #> '{database,last_watermark}', 'null'::jsonb))
                    WHEN jsonb_typeof($5::jsonb -> 'email') = 'object' THEN jsonb_set(
                        $5::jsonb, '{email,last_uid}',
                        COALESCE(config #> '{email,last_uid}', 'null'::jsonb))
                    ELSE $5::jsonb
                END,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(trigger.id)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(to_i32(trigger.polling_interval))
        .bind(&config)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "trigger", trigger.id)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        expect_affected(result, "trigger", id)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TriggerStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE triggers SET status = $2, last_error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "trigger", id)
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE triggers SET
                status = CASE WHEN status = 'active' THEN 'error' ELSE status END,
                last_error = $2,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "trigger", id)
    }

    async fn clear_error(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE triggers SET last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        expect_affected(result, "trigger", id)
    }

    async fn update_last_polled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE triggers SET last_polled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        expect_affected(result, "trigger", id)
    }

    async fn update_watermark(&self, id: Uuid, value: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE triggers
             SET config = jsonb_set(config, '{database,last_watermark}', to_jsonb($2::text))
             WHERE id = $1 AND jsonb_typeof(config -> 'database') = 'object'",
        )
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "database trigger", id)
    }

    async fn update_email_uid(&self, id: Uuid, uid: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE triggers
             SET config = jsonb_set(config, '{email,last_uid}', to_jsonb($2::bigint))
             WHERE id = $1 AND jsonb_typeof(config -> 'email') = 'object'",
        )
        .bind(id)
        .bind(i64::from(uid))
        .execute(&self.pool)
        .await?;

        expect_affected(result, "email trigger", id)
    }

    // ── Rules ───────────────────────────────────────────────────

    async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<TriggerRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, trigger_id, name, conditions, created_at, updated_at
             FROM trigger_rules
             WHERE trigger_id = $1
             ORDER BY created_at",
        )
        .bind(trigger_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TriggerRule::try_from).collect()
    }

    async fn create_rule(&self, rule: &TriggerRule) -> Result<()> {
        let conditions = serde_json::to_value(&rule.conditions)?;
        sqlx::query(
            "INSERT INTO trigger_rules (id, trigger_id, name, conditions, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(rule.id)
        .bind(rule.trigger_id)
        .bind(&rule.name)
        .bind(&conditions)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "rule", rule.id))?;

        Ok(())
    }

    async fn update_rule(&self, rule: &TriggerRule) -> Result<()> {
        let conditions = serde_json::to_value(&rule.conditions)?;
        let result = sqlx::query(
            "UPDATE trigger_rules SET name = $3, conditions = $4, updated_at = now()
             WHERE id = $1 AND trigger_id = $2",
        )
        .bind(rule.id)
        .bind(rule.trigger_id)
        .bind(&rule.name)
        .bind(&conditions)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "rule", rule.id)
    }

    async fn delete_rule(&self, trigger_id: Uuid, rule_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM trigger_rules WHERE id = $1 AND trigger_id = $2")
            .bind(rule_id)
            .bind(trigger_id)
            .execute(&self.pool)
            .await?;

        expect_affected(result, "rule", rule_id)
    }

    // ── Job links ───────────────────────────────────────────────

    async fn list_job_links(&self, trigger_id: Uuid) -> Result<Vec<TriggerJob>> {
        let rows = sqlx::query_as::<_, JobLinkRow>(
            "SELECT trigger_id, job_id, priority, active, pass_event_data, created_at
             FROM trigger_jobs
             WHERE trigger_id = $1
             ORDER BY priority ASC, created_at ASC",
        )
        .bind(trigger_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TriggerJob::from).collect())
    }

    async fn link_job(&self, link: &TriggerJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO trigger_jobs (trigger_id, job_id, priority, active, pass_event_data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (trigger_id, job_id) DO UPDATE SET
                priority = EXCLUDED.priority,
                active = EXCLUDED.active,
                pass_event_data = EXCLUDED.pass_event_data",
        )
        .bind(link.trigger_id)
        .bind(link.job_id)
        .bind(link.priority)
        .bind(link.active)
        .bind(link.pass_event_data)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unlink_job(&self, trigger_id: Uuid, job_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM trigger_jobs WHERE trigger_id = $1 AND job_id = $2")
            .bind(trigger_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        expect_affected(result, "job link", job_id)
    }

    // ── Executions ──────────────────────────────────────────────

    async fn create_execution(&self, execution: &TriggerExecution) -> Result<()> {
        sqlx::query(
            "INSERT INTO trigger_executions (id, trigger_id, started_at, finished_at, status,
                                             event_count, jobs_triggered, error, event_sample)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(execution.id)
        .bind(execution.trigger_id)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(execution.status.as_str())
        .bind(to_i32(execution.event_count))
        .bind(to_i32(execution.jobs_triggered))
        .bind(&execution.error)
        .bind(&execution.event_sample)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "execution", execution.id))?;

        Ok(())
    }

    async fn update_execution(&self, execution: &TriggerExecution) -> Result<()> {
        // Finished rows are immutable.
        let result = sqlx::query(
            "UPDATE trigger_executions SET
                finished_at = $2,
                status = $3,
                event_count = $4,
                jobs_triggered = $5,
                error = $6,
                event_sample = $7
             WHERE id = $1 AND status = 'running'",
        )
        .bind(execution.id)
        .bind(execution.finished_at)
        .bind(execution.status.as_str())
        .bind(to_i32(execution.event_count))
        .bind(to_i32(execution.jobs_triggered))
        .bind(&execution.error)
        .bind(&execution.event_sample)
        .execute(&self.pool)
        .await?;

        expect_affected(result, "running execution", execution.id)
    }

    async fn recent_executions(
        &self,
        trigger_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TriggerExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS}
             FROM trigger_executions
             WHERE trigger_id = $1
             ORDER BY started_at DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(trigger_id)
        .bind(i64::from(clamp_page(limit)))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TriggerExecution::try_from).collect()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::{Trigger, TriggerExecution, TriggerJob, TriggerRule, TriggerStatus};
use uuid::Uuid;

use crate::error::Result;

/// Largest page `recent_executions` will return.
pub const MAX_EXECUTION_PAGE: u32 = 100;

/// Clamp a requested execution page size into `1..=MAX_EXECUTION_PAGE`.
pub fn clamp_page(limit: u32) -> u32 {
    limit.clamp(1, MAX_EXECUTION_PAGE)
}

/// Persistence for triggers, rules, job links and executions.
///
/// The dispatcher only ever writes through the narrow partial updates
/// (`update_status`, `clear_error`, `update_last_polled`, `update_watermark`,
/// `update_email_uid`), so concurrent control-plane edits to the same row
/// are not clobbered.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    // ── Triggers ────────────────────────────────────────────────

    /// Every trigger with `status = active`.
    async fn find_all_active(&self) -> Result<Vec<Trigger>>;

    async fn list(&self) -> Result<Vec<Trigger>>;

    async fn get(&self, id: Uuid) -> Result<Option<Trigger>>;

    async fn create(&self, trigger: &Trigger) -> Result<()>;

    /// Replace name, description, polling interval and config.
    /// Status and bookkeeping columns are left alone, and the stored progress
    /// marker wins over the one in `trigger.config`.
    async fn update(&self, trigger: &Trigger) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn update_status(
        &self,
        id: Uuid,
        status: TriggerStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Record a failed cycle: `last_error` is always set, and `status` moves
    /// to `error` only if it is still `active`.
    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()>;

    /// Clear `last_error` without touching `status`.
    async fn clear_error(&self, id: Uuid) -> Result<()>;

    async fn update_last_polled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Set only `config.database.last_watermark`.
    async fn update_watermark(&self, id: Uuid, value: &str) -> Result<()>;

    /// Set only `config.email.last_uid`.
    async fn update_email_uid(&self, id: Uuid, uid: u32) -> Result<()>;

    // ── Rules ───────────────────────────────────────────────────

    async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<TriggerRule>>;

    async fn create_rule(&self, rule: &TriggerRule) -> Result<()>;

    async fn update_rule(&self, rule: &TriggerRule) -> Result<()>;

    async fn delete_rule(&self, trigger_id: Uuid, rule_id: Uuid) -> Result<()>;

    // ── Job links ───────────────────────────────────────────────

    /// All links for a trigger, ascending by priority.
    async fn list_job_links(&self, trigger_id: Uuid) -> Result<Vec<TriggerJob>>;

    /// Insert or replace the link for `(trigger_id, job_id)`.
    async fn link_job(&self, link: &TriggerJob) -> Result<()>;

    async fn unlink_job(&self, trigger_id: Uuid, job_id: Uuid) -> Result<()>;

    // ── Executions ──────────────────────────────────────────────

    async fn create_execution(&self, execution: &TriggerExecution) -> Result<()>;

    async fn update_execution(&self, execution: &TriggerExecution) -> Result<()>;

    /// Newest first. `limit` is clamped to `1..=MAX_EXECUTION_PAGE`.
    async fn recent_executions(
        &self,
        trigger_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TriggerExecution>>;
}

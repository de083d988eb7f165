//! Control surface: trigger CRUD, lifecycle transitions, rules and job links.
//!
//! ```text
//! create ──> paused ──activate──> active ──cycle fails──> error
//!              ^                    │                       │
//!              └──────pause─────────┘<──────activate────────┘
//! any state ──disable──> disabled (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sluice_core::validation::{validate_rule, validate_trigger, ValidationResult};
use sluice_core::{
    Progress, RuleConditions, SluiceError, Trigger, TriggerExecution, TriggerJob,
    TriggerRule, TriggerStatus,
};
use sluice_rules::RuleEvaluator;
use sluice_storage::{StoreError, TriggerStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::pollers::PollerRegistry;
use crate::tracker::ExecutionTracker;

/// Outcome of a dry-run rule evaluation against a sample event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleTestResult {
    /// Whether the event would be kept (vacuously true with no rules).
    pub matched: bool,
    pub rule_count: usize,
    pub matching_rules: Vec<String>,
}

pub struct TriggerService {
    store: Arc<dyn TriggerStore>,
    pollers: Arc<PollerRegistry>,
    tracker: ExecutionTracker,
    source_timeout: Duration,
}

impl TriggerService {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        pollers: Arc<PollerRegistry>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            tracker: ExecutionTracker::new(Arc::clone(&store)),
            store,
            pollers,
            source_timeout,
        }
    }

    // ── Triggers ────────────────────────────────────────────────

    pub async fn get(&self, id: Uuid) -> Result<Trigger> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::TriggerNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Trigger>> {
        Ok(self.store.list().await?)
    }

    /// Persist a new trigger in `paused` state.
    pub async fn create(&self, mut trigger: Trigger) -> Result<Trigger> {
        trigger.trigger_type = trigger.config.trigger_type();
        check(validate_trigger(&trigger), "create")?;

        let now = Utc::now();
        trigger.status = TriggerStatus::Paused;
        trigger.last_error = None;
        trigger.last_polled_at = None;
        trigger.created_at = now;
        trigger.updated_at = now;

        self.store.create(&trigger).await?;
        info!(trigger_id = %trigger.id, name = %trigger.name, kind = %trigger.trigger_type, "trigger created");
        Ok(trigger)
    }

    /// Replace name, description, interval and config. The type cannot
    /// change, and the committed progress marker is kept.
    pub async fn update(&self, mut trigger: Trigger) -> Result<Trigger> {
        let existing = self.get(trigger.id).await?;
        let incoming = trigger.config.trigger_type();
        if incoming != existing.trigger_type {
            return Err(SluiceError::TypeChanged {
                from: existing.trigger_type.to_string(),
                to: incoming.to_string(),
            }
            .into());
        }
        trigger.trigger_type = existing.trigger_type;
        check(validate_trigger(&trigger), "update")?;

        // The store keeps its own marker; a cycle may commit concurrently.
        self.store
            .update(&trigger)
            .await
            .map_err(|e| not_found(e, trigger.id))?;
        self.get(trigger.id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await.map_err(|e| not_found(e, id))?;
        info!(trigger_id = %id, "trigger deleted");
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Move to `active`.
    ///
    /// Database and email triggers without a committed marker are baselined
    /// to the current head of their source, so only data arriving after
    /// activation fires. A trigger recovering from `error` keeps its marker
    /// and resumes where it stopped.
    pub async fn activate(&self, id: Uuid) -> Result<Trigger> {
        let trigger = self.get(id).await?;
        match trigger.status {
            TriggerStatus::Disabled => {
                return Err(SluiceError::InvalidTransition {
                    from: TriggerStatus::Disabled,
                    to: TriggerStatus::Active,
                }
                .into());
            }
            TriggerStatus::Active => return Ok(trigger),
            TriggerStatus::Paused | TriggerStatus::Error => {}
        }
        check(validate_trigger(&trigger), "activate")?;

        if trigger.progress().is_none() && self.pollers.supports(trigger.trigger_type) {
            let poller = self.pollers.get(trigger.trigger_type)?;
            match poller.baseline(&trigger, self.source_timeout).await? {
                Some(Progress::Watermark(mark)) => self.store.update_watermark(id, &mark).await?,
                Some(Progress::EmailUid(uid)) => self.store.update_email_uid(id, uid).await?,
                None => {}
            }
        }

        // last_error stays until a cycle succeeds.
        self.store
            .update_status(id, TriggerStatus::Active, trigger.last_error.as_deref())
            .await?;
        let trigger = self.get(id).await?;
        info!(trigger_id = %id, progress = ?trigger.progress(), "trigger activated");
        Ok(trigger)
    }

    /// Stop future dispatch. A cycle already in flight runs to completion.
    pub async fn pause(&self, id: Uuid) -> Result<Trigger> {
        let trigger = self.get(id).await?;
        if trigger.status == TriggerStatus::Disabled {
            return Err(SluiceError::InvalidTransition {
                from: TriggerStatus::Disabled,
                to: TriggerStatus::Paused,
            }
            .into());
        }
        self.store
            .update_status(id, TriggerStatus::Paused, trigger.last_error.as_deref())
            .await?;
        info!(trigger_id = %id, "trigger paused");
        self.get(id).await
    }

    pub async fn disable(&self, id: Uuid) -> Result<Trigger> {
        let trigger = self.get(id).await?;
        self.store
            .update_status(id, TriggerStatus::Disabled, trigger.last_error.as_deref())
            .await?;
        info!(trigger_id = %id, "trigger disabled");
        self.get(id).await
    }

    // ── Rules ───────────────────────────────────────────────────

    pub async fn add_rule(
        &self,
        trigger_id: Uuid,
        name: &str,
        conditions: RuleConditions,
    ) -> Result<TriggerRule> {
        check(validate_rule(name, &conditions), "add rule")?;
        self.get(trigger_id).await?;

        let rule = TriggerRule::new(trigger_id, name, conditions);
        self.store.create_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        trigger_id: Uuid,
        rule_id: Uuid,
        name: &str,
        conditions: RuleConditions,
    ) -> Result<TriggerRule> {
        check(validate_rule(name, &conditions), "update rule")?;
        let mut rule = self
            .store
            .list_rules(trigger_id)
            .await?
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| StoreError::not_found("rule", rule_id))?;

        rule.name = name.to_string();
        rule.conditions = conditions;
        rule.updated_at = Utc::now();
        self.store.update_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn delete_rule(&self, trigger_id: Uuid, rule_id: Uuid) -> Result<()> {
        Ok(self.store.delete_rule(trigger_id, rule_id).await?)
    }

    pub async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<TriggerRule>> {
        Ok(self.store.list_rules(trigger_id).await?)
    }

    /// Evaluate the trigger's current rules against `event` without polling
    /// or dispatching anything.
    pub async fn test_rules(&self, trigger_id: Uuid, event: &Value) -> Result<RuleTestResult> {
        let rules = self.store.list_rules(trigger_id).await?;
        Ok(RuleTestResult {
            matched: RuleEvaluator::match_any_rule(&rules, event),
            rule_count: rules.len(),
            matching_rules: RuleEvaluator::matching_rules(&rules, event)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    // ── Job links ───────────────────────────────────────────────

    pub async fn link_job(
        &self,
        trigger_id: Uuid,
        job_id: Uuid,
        priority: i32,
        pass_event_data: bool,
    ) -> Result<TriggerJob> {
        self.get(trigger_id).await?;
        let link = TriggerJob::new(trigger_id, job_id, priority, pass_event_data);
        self.store.link_job(&link).await?;
        Ok(link)
    }

    pub async fn unlink_job(&self, trigger_id: Uuid, job_id: Uuid) -> Result<()> {
        Ok(self.store.unlink_job(trigger_id, job_id).await?)
    }

    pub async fn list_jobs(&self, trigger_id: Uuid) -> Result<Vec<TriggerJob>> {
        Ok(self.store.list_job_links(trigger_id).await?)
    }

    // ── Executions ──────────────────────────────────────────────

    /// Newest first, at most 100 per page.
    pub async fn recent_executions(
        &self,
        trigger_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TriggerExecution>> {
        self.tracker.recent(trigger_id, limit, offset).await
    }
}

fn check(result: ValidationResult, action: &str) -> Result<()> {
    for warning in &result.warnings {
        warn!(action, path = %warning.path, "{}", warning.message);
    }
    result.into_result()?;
    Ok(())
}

fn not_found(e: StoreError, id: Uuid) -> EngineError {
    if e.is_not_found() {
        EngineError::TriggerNotFound(id)
    } else {
        e.into()
    }
}

//! In-process [`TriggerStore`] for tests and local runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::{
    Trigger, TriggerConfig, TriggerExecution, TriggerJob, TriggerRule, TriggerStatus,
};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{clamp_page, TriggerStore};

#[derive(Default)]
struct State {
    triggers: HashMap<Uuid, Trigger>,
    rules: HashMap<Uuid, TriggerRule>,
    links: HashMap<(Uuid, Uuid), TriggerJob>,
    executions: Vec<TriggerExecution>,
}

/// `RwLock`-guarded maps mirroring the PostgreSQL tables.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        let guard = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }

    fn with_trigger(&self, id: Uuid, f: impl FnOnce(&mut Trigger) -> Result<()>) -> Result<()> {
        self.write(|s| {
            let trigger = s
                .triggers
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("trigger", id))?;
            f(trigger)
        })
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    // ── Triggers ────────────────────────────────────────────────

    async fn find_all_active(&self) -> Result<Vec<Trigger>> {
        self.read(|s| {
            let mut active: Vec<Trigger> = s
                .triggers
                .values()
                .filter(|t| t.status == TriggerStatus::Active)
                .cloned()
                .collect();
            active.sort_by_key(|t| t.created_at);
            active
        })
    }

    async fn list(&self) -> Result<Vec<Trigger>> {
        self.read(|s| {
            let mut all: Vec<Trigger> = s.triggers.values().cloned().collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            all
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Trigger>> {
        self.read(|s| s.triggers.get(&id).cloned())
    }

    async fn create(&self, trigger: &Trigger) -> Result<()> {
        self.write(|s| {
            if s.triggers.contains_key(&trigger.id) {
                return Err(StoreError::Duplicate {
                    kind: "trigger",
                    id: trigger.id,
                });
            }
            s.triggers.insert(trigger.id, trigger.clone());
            Ok(())
        })
    }

    async fn update(&self, trigger: &Trigger) -> Result<()> {
        self.with_trigger(trigger.id, |stored| {
            stored.name = trigger.name.clone();
            stored.description = trigger.description.clone();
            stored.polling_interval = trigger.polling_interval;
            let mut config = trigger.config.clone();
            config.keep_progress_from(&stored.config);
            stored.config = config;
            stored.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.write(|s| {
            s.triggers
                .remove(&id)
                .ok_or_else(|| StoreError::not_found("trigger", id))?;
            s.rules.retain(|_, r| r.trigger_id != id);
            s.links.retain(|(trigger_id, _), _| *trigger_id != id);
            s.executions.retain(|e| e.trigger_id != id);
            Ok(())
        })
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TriggerStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.with_trigger(id, |t| {
            t.status = status;
            t.last_error = last_error.map(str::to_string);
            t.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()> {
        self.with_trigger(id, |t| {
            if t.status == TriggerStatus::Active {
                t.status = TriggerStatus::Error;
            }
            t.last_error = Some(message.to_string());
            t.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn clear_error(&self, id: Uuid) -> Result<()> {
        self.with_trigger(id, |t| {
            t.last_error = None;
            Ok(())
        })
    }

    async fn update_last_polled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_trigger(id, |t| {
            t.last_polled_at = Some(at);
            Ok(())
        })
    }

    async fn update_watermark(&self, id: Uuid, value: &str) -> Result<()> {
        self.with_trigger(id, |t| match &mut t.config {
            TriggerConfig::Database(db) => {
                db.last_watermark = Some(value.to_string());
                Ok(())
            }
            _ => Err(StoreError::not_found("database trigger", id)),
        })
    }

    async fn update_email_uid(&self, id: Uuid, uid: u32) -> Result<()> {
        self.with_trigger(id, |t| match &mut t.config {
            TriggerConfig::Email(email) => {
                email.last_uid = Some(uid);
                Ok(())
            }
            _ => Err(StoreError::not_found("email trigger", id)),
        })
    }

    // ── Rules ───────────────────────────────────────────────────

    async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<TriggerRule>> {
        self.read(|s| {
            let mut rules: Vec<TriggerRule> = s
                .rules
                .values()
                .filter(|r| r.trigger_id == trigger_id)
                .cloned()
                .collect();
            rules.sort_by_key(|r| r.created_at);
            rules
        })
    }

    async fn create_rule(&self, rule: &TriggerRule) -> Result<()> {
        self.write(|s| {
            if !s.triggers.contains_key(&rule.trigger_id) {
                return Err(StoreError::not_found("trigger", rule.trigger_id));
            }
            if s.rules.contains_key(&rule.id) {
                return Err(StoreError::Duplicate {
                    kind: "rule",
                    id: rule.id,
                });
            }
            s.rules.insert(rule.id, rule.clone());
            Ok(())
        })
    }

    async fn update_rule(&self, rule: &TriggerRule) -> Result<()> {
        self.write(|s| match s.rules.get_mut(&rule.id) {
            Some(stored) if stored.trigger_id == rule.trigger_id => {
                stored.name = rule.name.clone();
                stored.conditions = rule.conditions.clone();
                stored.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::not_found("rule", rule.id)),
        })
    }

    async fn delete_rule(&self, trigger_id: Uuid, rule_id: Uuid) -> Result<()> {
        self.write(|s| {
            let owned = s
                .rules
                .get(&rule_id)
                .is_some_and(|r| r.trigger_id == trigger_id);
            if !owned {
                return Err(StoreError::not_found("rule", rule_id));
            }
            s.rules.remove(&rule_id);
            Ok(())
        })
    }

    // ── Job links ───────────────────────────────────────────────

    async fn list_job_links(&self, trigger_id: Uuid) -> Result<Vec<TriggerJob>> {
        self.read(|s| {
            let mut links: Vec<TriggerJob> = s
                .links
                .values()
                .filter(|l| l.trigger_id == trigger_id)
                .cloned()
                .collect();
            links.sort_by_key(|l| (l.priority, l.created_at));
            links
        })
    }

    async fn link_job(&self, link: &TriggerJob) -> Result<()> {
        self.write(|s| {
            if !s.triggers.contains_key(&link.trigger_id) {
                return Err(StoreError::not_found("trigger", link.trigger_id));
            }
            s.links
                .insert((link.trigger_id, link.job_id), link.clone());
            Ok(())
        })
    }

    async fn unlink_job(&self, trigger_id: Uuid, job_id: Uuid) -> Result<()> {
        self.write(|s| {
            s.links
                .remove(&(trigger_id, job_id))
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found("job link", job_id))
        })
    }

    // ── Executions ──────────────────────────────────────────────

    async fn create_execution(&self, execution: &TriggerExecution) -> Result<()> {
        self.write(|s| {
            if s.executions.iter().any(|e| e.id == execution.id) {
                return Err(StoreError::Duplicate {
                    kind: "execution",
                    id: execution.id,
                });
            }
            s.executions.push(execution.clone());
            Ok(())
        })
    }

    async fn update_execution(&self, execution: &TriggerExecution) -> Result<()> {
        self.write(|s| {
            match s
                .executions
                .iter_mut()
                .find(|e| e.id == execution.id && !e.status.is_finished())
            {
                Some(stored) => {
                    *stored = execution.clone();
                    Ok(())
                }
                None => Err(StoreError::not_found("running execution", execution.id)),
            }
        })
    }

    async fn recent_executions(
        &self,
        trigger_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TriggerExecution>> {
        self.read(|s| {
            let mut matching: Vec<&TriggerExecution> = s
                .executions
                .iter()
                .filter(|e| e.trigger_id == trigger_id)
                .collect();
            // Stable sort keeps insertion order for equal timestamps; reverse
            // it so the newest insert comes first.
            matching.reverse();
            matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            matching
                .into_iter()
                .skip(offset as usize)
                .take(clamp_page(limit) as usize)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{
        ConnectionSource, DatabaseTriggerConfig, ExecutionStatus, RuleConditions, WatermarkType,
        WebhookTriggerConfig,
    };

    fn db_trigger() -> Trigger {
        Trigger::new(
            "orders",
            30,
            TriggerConfig::Database(DatabaseTriggerConfig {
                connection: ConnectionSource::Saved {
                    connection_id: Uuid::new_v4(),
                },
                table_name: "orders".into(),
                watermark_column: "id".into(),
                watermark_type: WatermarkType::Int,
                last_watermark: Some("10".into()),
                columns: vec![],
                where_clause: None,
                batch_size: 100,
            }),
        )
    }

    #[tokio::test]
    async fn partial_updates_touch_only_their_field() {
        let store = MemoryStore::new();
        let trigger = db_trigger();
        store.create(&trigger).await.unwrap();

        store
            .update_status(trigger.id, TriggerStatus::Error, Some("boom"))
            .await
            .unwrap();
        store.update_watermark(trigger.id, "42").await.unwrap();
        store.clear_error(trigger.id).await.unwrap();

        let stored = store.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TriggerStatus::Error);
        assert_eq!(stored.last_error, None);
        assert_eq!(
            stored.progress(),
            Some(sluice_core::Progress::Watermark("42".into()))
        );
        assert_eq!(stored.name, "orders");
    }

    #[tokio::test]
    async fn stale_config_edit_keeps_newer_watermark() {
        let store = MemoryStore::new();
        let trigger = db_trigger();
        store.create(&trigger).await.unwrap();

        let mut edit = store.get(trigger.id).await.unwrap().unwrap();
        // A cycle commits while the edit is in progress.
        store.update_watermark(trigger.id, "200").await.unwrap();

        edit.name = "renamed".into();
        store.update(&edit).await.unwrap();

        let stored = store.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(
            stored.progress(),
            Some(sluice_core::Progress::Watermark("200".into()))
        );
    }

    #[tokio::test]
    async fn failure_only_moves_active_triggers_to_error() {
        let store = MemoryStore::new();
        let active = db_trigger();
        let paused = db_trigger();
        store.create(&active).await.unwrap();
        store.create(&paused).await.unwrap();
        store.update_status(active.id, TriggerStatus::Active, None).await.unwrap();

        store.mark_failed(active.id, "timeout").await.unwrap();
        store.mark_failed(paused.id, "timeout").await.unwrap();

        let active = store.get(active.id).await.unwrap().unwrap();
        assert_eq!(active.status, TriggerStatus::Error);
        let paused = store.get(paused.id).await.unwrap().unwrap();
        assert_eq!(paused.status, TriggerStatus::Paused);
        assert_eq!(paused.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn marker_update_on_wrong_type_fails() {
        let store = MemoryStore::new();
        let hook = Trigger::new("hook", 5, TriggerConfig::Webhook(WebhookTriggerConfig::default()));
        store.create(&hook).await.unwrap();
        assert!(store.update_email_uid(hook.id, 7).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn find_all_active_filters_status() {
        let store = MemoryStore::new();
        let a = db_trigger();
        let b = db_trigger();
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();
        store.update_status(b.id, TriggerStatus::Active, None).await.unwrap();

        let active = store.find_all_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn job_links_sorted_by_priority_and_upserted() {
        let store = MemoryStore::new();
        let t = db_trigger();
        store.create(&t).await.unwrap();

        let (j1, j2) = (Uuid::new_v4(), Uuid::new_v4());
        store.link_job(&TriggerJob::new(t.id, j1, 5, false)).await.unwrap();
        store.link_job(&TriggerJob::new(t.id, j2, 1, true)).await.unwrap();
        let links = store.list_job_links(t.id).await.unwrap();
        assert_eq!(links.iter().map(|l| l.job_id).collect::<Vec<_>>(), vec![j2, j1]);

        store.link_job(&TriggerJob::new(t.id, j1, 0, false)).await.unwrap();
        let links = store.list_job_links(t.id).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].job_id, j1);

        store.unlink_job(t.id, j2).await.unwrap();
        assert!(store.unlink_job(t.id, j2).await.is_err());
    }

    #[tokio::test]
    async fn executions_are_paginated_newest_first() {
        let store = MemoryStore::new();
        let t = db_trigger();
        store.create(&t).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let mut exec = TriggerExecution::start(t.id);
            exec.started_at = Utc::now() + chrono::Duration::seconds(i);
            ids.push(exec.id);
            store.create_execution(&exec).await.unwrap();
        }

        let page = store.recent_executions(t.id, 2, 0).await.unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);
        let page = store.recent_executions(t.id, 2, 4).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, ids[0]);
        // Zero is clamped up to one row.
        assert_eq!(store.recent_executions(t.id, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_executions_are_immutable() {
        let store = MemoryStore::new();
        let t = db_trigger();
        store.create(&t).await.unwrap();

        let mut exec = TriggerExecution::start(t.id);
        store.create_execution(&exec).await.unwrap();
        exec.complete(&[], 0);
        store.update_execution(&exec).await.unwrap();

        exec.fail("late");
        assert!(store.update_execution(&exec).await.is_err());
        let stored = store.recent_executions(t.id, 10, 0).await.unwrap();
        assert_eq!(stored[0].status, ExecutionStatus::NoEvents);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = MemoryStore::new();
        let t = db_trigger();
        store.create(&t).await.unwrap();
        store
            .create_rule(&TriggerRule::new(t.id, "r", RuleConditions::default()))
            .await
            .unwrap();
        store.delete(t.id).await.unwrap();
        assert!(store.list_rules(t.id).await.unwrap().is_empty());
        assert!(store.get(t.id).await.unwrap().is_none());
    }
}

//! Row structs for the PostgreSQL tables and their conversion to domain types.

use chrono::{DateTime, Utc};
use sluice_core::{
    ExecutionStatus, RuleConditions, Trigger, TriggerConfig, TriggerExecution, TriggerJob,
    TriggerRule,
};
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub(crate) const TRIGGER_COLUMNS: &str = "id, name, description, owner_id, trigger_type, status, \
     polling_interval, last_polled_at, last_error, config, created_at, updated_at";

pub(crate) const EXECUTION_COLUMNS: &str = "id, trigger_id, started_at, finished_at, status, \
     event_count, jobs_triggered, error, event_sample";

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TriggerRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub trigger_type: String,
    pub status: String,
    pub polling_interval: i32,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = StoreError;

    fn try_from(row: TriggerRow) -> Result<Self> {
        let config: TriggerConfig = serde_json::from_value(row.config)
            .map_err(|e| StoreError::Corrupt(format!("trigger {} config: {e}", row.id)))?;
        let polling_interval = u32::try_from(row.polling_interval).map_err(|_| {
            StoreError::Corrupt(format!(
                "trigger {} polling_interval {}",
                row.id, row.polling_interval
            ))
        })?;
        Ok(Trigger {
            id: row.id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            trigger_type: row.trigger_type.parse()?,
            status: row.status.parse()?,
            polling_interval,
            last_polled_at: row.last_polled_at,
            last_error: row.last_error,
            config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RuleRow {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub name: String,
    pub conditions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for TriggerRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> Result<Self> {
        let conditions: RuleConditions = serde_json::from_value(row.conditions)?;
        Ok(TriggerRule {
            id: row.id,
            trigger_id: row.trigger_id,
            name: row.name,
            conditions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct JobLinkRow {
    pub trigger_id: Uuid,
    pub job_id: Uuid,
    pub priority: i32,
    pub active: bool,
    pub pass_event_data: bool,
    pub created_at: DateTime<Utc>,
}

impl From<JobLinkRow> for TriggerJob {
    fn from(row: JobLinkRow) -> Self {
        TriggerJob {
            trigger_id: row.trigger_id,
            job_id: row.job_id,
            priority: row.priority,
            active: row.active,
            pass_event_data: row.pass_event_data,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ExecutionRow {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub event_count: i32,
    pub jobs_triggered: i32,
    pub error: Option<String>,
    pub event_sample: Option<serde_json::Value>,
}

impl TryFrom<ExecutionRow> for TriggerExecution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let status: ExecutionStatus = row.status.parse()?;
        Ok(TriggerExecution {
            id: row.id,
            trigger_id: row.trigger_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status,
            event_count: u32::try_from(row.event_count).unwrap_or(0),
            jobs_triggered: u32::try_from(row.jobs_triggered).unwrap_or(0),
            error: row.error,
            event_sample: row.event_sample,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SavedConnectionRow {
    pub id: Uuid,
    pub kind: String,
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::{TriggerStatus, TriggerType};

    fn row(config: serde_json::Value) -> TriggerRow {
        TriggerRow {
            id: Uuid::new_v4(),
            name: "t".into(),
            description: None,
            owner_id: Some("user-1".into()),
            trigger_type: "cron".into(),
            status: "active".into(),
            polling_interval: 60,
            last_polled_at: None,
            last_error: None,
            config,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn trigger_row_converts() {
        let trigger: Trigger = row(json!({
            "database": null, "email": null, "webhook": null,
            "cron": {"mode": "interval", "value": 5, "unit": "minutes"}
        }))
        .try_into()
        .unwrap();
        assert_eq!(trigger.trigger_type, TriggerType::Cron);
        assert_eq!(trigger.status, TriggerStatus::Active);
        assert_eq!(trigger.owner_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn corrupt_config_is_reported() {
        let err = Trigger::try_from(row(json!({"cron": null}))).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn unknown_status_is_reported() {
        let mut r = row(json!({"webhook": {}}));
        r.status = "sleeping".into();
        assert!(matches!(Trigger::try_from(r), Err(StoreError::Corrupt(_))));
    }
}

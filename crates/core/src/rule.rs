use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named AND/OR condition group attached to one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub name: String,
    pub conditions: RuleConditions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerRule {
    pub fn new(trigger_id: Uuid, name: impl Into<String>, conditions: RuleConditions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            name: name.into(),
            conditions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `all` conditions are AND'd, `any` conditions are OR'd; an empty group passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub all: Vec<RuleCondition>,
    #[serde(default)]
    pub any: Vec<RuleCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dot-separated path into the event record.
    pub field: String,
    pub operator: Operator,
    /// Comparison operand. Unused by `exists` / `notExists`.
    #[serde(default)]
    pub value: serde_json::Value,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, operator: Operator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Neq,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Lt,
    Regex,
    In,
    NotIn,
    Exists,
    NotExists,
}

/// Link from a trigger to a downstream job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerJob {
    pub trigger_id: Uuid,
    pub job_id: Uuid,
    /// Dispatch order, ascending.
    pub priority: i32,
    /// Inactive links are kept but skipped.
    pub active: bool,
    /// Attach the surviving events to the job invocation.
    pub pass_event_data: bool,
    pub created_at: DateTime<Utc>,
}

impl TriggerJob {
    pub fn new(trigger_id: Uuid, job_id: Uuid, priority: i32, pass_event_data: bool) -> Self {
        Self {
            trigger_id,
            job_id,
            priority,
            active: true,
            pass_event_data,
            created_at: Utc::now(),
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    NoEvents,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoEvents => "no_events",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = crate::SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "no_events" => Ok(Self::NoEvents),
            other => Err(crate::SluiceError::Unknown {
                kind: "execution status",
                value: other.to_string(),
            }),
        }
    }
}

/// Audit record of one poll cycle. Immutable once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Events that survived rule filtering.
    pub event_count: u32,
    /// Job invocations issued (not completed).
    pub jobs_triggered: u32,
    pub error: Option<String>,
    /// First surviving event, for diagnostics.
    pub event_sample: Option<serde_json::Value>,
}

impl TriggerExecution {
    pub fn start(trigger_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            event_count: 0,
            jobs_triggered: 0,
            error: None,
            event_sample: None,
        }
    }

    /// Finish successfully; status follows the surviving event count.
    pub fn complete(&mut self, events: &[serde_json::Value], jobs_triggered: u32) {
        self.finished_at = Some(Utc::now());
        self.event_count = events.len() as u32;
        self.jobs_triggered = jobs_triggered;
        self.event_sample = events.first().cloned();
        self.status = if events.is_empty() {
            ExecutionStatus::NoEvents
        } else {
            ExecutionStatus::Completed
        };
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finished_at = Some(Utc::now());
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
    }
}

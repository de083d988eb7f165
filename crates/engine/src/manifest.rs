//! YAML trigger manifests for `sluice-worker apply`.
//!
//! ```yaml
//! triggers:
//!   - name: new-orders
//!     polling_interval: 60
//!     activate: true
//!     config:
//!       database:
//!         connection: { saved: { connection_id: 2f1c... } }
//!         table_name: orders
//!         watermark_column: id
//!         watermark_type: int
//!     rules:
//!       - name: big
//!         conditions:
//!           all: [{ field: amount, operator: gt, value: 1000 }]
//!     jobs:
//!       - { job_id: 7a0e..., priority: 1, pass_event_data: true }
//! ```

use serde::Deserialize;
use sluice_core::{RuleConditions, Trigger, TriggerConfig};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::TriggerService;

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerManifest {
    pub triggers: Vec<TriggerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub polling_interval: u32,
    pub config: TriggerConfig,
    #[serde(default)]
    pub activate: bool,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    #[serde(default)]
    pub conditions: RuleConditions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobEntry {
    pub job_id: Uuid,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub pass_event_data: bool,
}

impl TriggerManifest {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Create every trigger with its rules and job links, activating the
    /// ones marked `activate`. Stops at the first failure.
    pub async fn apply(self, service: &TriggerService) -> Result<Vec<Trigger>> {
        let mut applied = Vec::with_capacity(self.triggers.len());

        for entry in self.triggers {
            let mut trigger = Trigger::new(entry.name, entry.polling_interval, entry.config);
            trigger.description = entry.description;
            trigger.owner_id = entry.owner_id;
            let trigger = service.create(trigger).await?;

            for rule in entry.rules {
                service.add_rule(trigger.id, &rule.name, rule.conditions).await?;
            }
            for job in entry.jobs {
                service
                    .link_job(trigger.id, job.job_id, job.priority, job.pass_event_data)
                    .await?;
            }

            let trigger = if entry.activate {
                service.activate(trigger.id).await?
            } else {
                trigger
            };
            info!(trigger_id = %trigger.id, name = %trigger.name, status = %trigger.status, "applied");
            applied.push(trigger);
        }

        Ok(applied)
    }
}

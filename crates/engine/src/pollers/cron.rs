use async_trait::async_trait;
use serde_json::json;
use sluice_core::schedule::next_tick;
use sluice_core::{CronTriggerConfig, Trigger, TriggerConfig};

use super::{config_mismatch, PollContext, PollOutcome, Poller};
use crate::error::Result;

/// Emits one synthetic event per due firing. Reads nothing external.
#[derive(Debug, Default, Clone, Copy)]
pub struct CronPoller;

#[async_trait]
impl Poller for CronPoller {
    async fn poll(&self, trigger: &Trigger, ctx: &PollContext) -> Result<PollOutcome> {
        let TriggerConfig::Cron(config) = &trigger.config else {
            return Err(config_mismatch("cron", trigger));
        };

        let scheduled_for = match config {
            CronTriggerConfig::Schedule { .. } => config
                .schedule()?
                .and_then(|s| next_tick(&s, ctx.now, trigger.last_polled_at))
                .map(|t| t.to_rfc3339()),
            CronTriggerConfig::Interval { .. } => None,
        };

        let event = json!({
            "trigger_id": trigger.id,
            "trigger_name": trigger.name,
            "fired_at": ctx.now.to_rfc3339(),
            "scheduled_for": scheduled_for,
        });

        Ok(PollOutcome {
            events: vec![event],
            fetched: 1,
            progress: None,
        })
    }
}

//! Source pollers, one strategy per trigger type.
//!
//! A poll reads new data from the source and reports the progress marker it
//! reached, but never persists it. The cycle commits the marker only after
//! the job dispatch step succeeds.

mod cron;
mod database;
mod mailbox;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_connector::{MailClient, SourceError, SqlExecutor};
use sluice_core::{Progress, Trigger, TriggerType};
use sluice_storage::CredentialResolver;

use crate::error::{EngineError, Result};

pub use cron::CronPoller;
pub use database::DatabasePoller;
pub use mailbox::{EmailFilter, MailboxPoller};

/// What one poll produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Events that passed the source's static filters, in source order.
    pub events: Vec<Value>,
    /// Raw items read from the source before static filtering.
    pub fetched: usize,
    /// Marker to commit once dispatch succeeds. `None` leaves it unchanged.
    pub progress: Option<Progress>,
}

/// Per-cycle inputs shared by every poller.
#[derive(Debug, Clone, Copy)]
pub struct PollContext {
    pub now: DateTime<Utc>,
    /// Bound on each source round-trip.
    pub timeout: Duration,
}

#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, trigger: &Trigger, ctx: &PollContext) -> Result<PollOutcome>;

    /// Current head of the source, used to start a newly activated trigger
    /// from "now" instead of from the beginning.
    async fn baseline(&self, _trigger: &Trigger, _timeout: Duration) -> Result<Option<Progress>> {
        Ok(None)
    }
}

/// Run one source round-trip under `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(SourceError::Timeout(limit).into()),
    }
}

pub(crate) fn config_mismatch(poller: &str, trigger: &Trigger) -> EngineError {
    sluice_core::SluiceError::InvalidConfig(format!(
        "{poller} poller cannot poll {} trigger {}",
        trigger.trigger_type, trigger.id
    ))
    .into()
}

// ── Registry ────────────────────────────────────────────────────────

/// `TriggerType -> Poller` table, built once at startup.
#[derive(Default, Clone)]
pub struct PollerRegistry {
    pollers: HashMap<TriggerType, Arc<dyn Poller>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database, email and cron pollers backed by the given collaborators.
    /// Webhook triggers are push-based and get no poller.
    pub fn standard(
        credentials: Arc<dyn CredentialResolver>,
        sql: Arc<dyn SqlExecutor>,
        mail: Arc<dyn MailClient>,
    ) -> Self {
        Self::new()
            .with(
                TriggerType::Database,
                Arc::new(DatabasePoller::new(Arc::clone(&credentials), sql)),
            )
            .with(TriggerType::Email, Arc::new(MailboxPoller::new(credentials, mail)))
            .with(TriggerType::Cron, Arc::new(CronPoller))
    }

    pub fn with(mut self, trigger_type: TriggerType, poller: Arc<dyn Poller>) -> Self {
        self.pollers.insert(trigger_type, poller);
        self
    }

    pub fn supports(&self, trigger_type: TriggerType) -> bool {
        self.pollers.contains_key(&trigger_type)
    }

    pub fn get(&self, trigger_type: TriggerType) -> Result<Arc<dyn Poller>> {
        self.pollers
            .get(&trigger_type)
            .cloned()
            .ok_or(EngineError::NoPoller(trigger_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, SourceError>(1)
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, EngineError::Source(SourceError::Timeout(_))));

        let fast = async { Ok::<_, SourceError>(7) };
        assert_eq!(bounded(Duration::from_secs(1), fast).await.unwrap(), 7);
    }

    #[test]
    fn registry_without_webhook_poller() {
        let registry = PollerRegistry::new().with(TriggerType::Cron, Arc::new(CronPoller));
        assert!(registry.supports(TriggerType::Cron));
        assert!(!registry.supports(TriggerType::Webhook));
        assert!(matches!(
            registry.get(TriggerType::Webhook),
            Err(EngineError::NoPoller(TriggerType::Webhook))
        ));
    }
}

//! Execution audit log writes.

use std::sync::Arc;

use serde_json::Value;
use sluice_core::TriggerExecution;
use sluice_storage::{clamp_page, TriggerStore};
use tracing::error;
use uuid::Uuid;

use crate::error::Result;

/// Opens a `running` execution per cycle and finalizes it exactly once.
#[derive(Clone)]
pub struct ExecutionTracker {
    store: Arc<dyn TriggerStore>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    pub async fn begin(&self, trigger_id: Uuid) -> Result<TriggerExecution> {
        let execution = TriggerExecution::start(trigger_id);
        self.store.create_execution(&execution).await?;
        Ok(execution)
    }

    pub async fn complete(
        &self,
        execution: &mut TriggerExecution,
        events: &[Value],
        jobs_triggered: u32,
    ) {
        execution.complete(events, jobs_triggered);
        self.finish(execution).await;
    }

    pub async fn fail(&self, execution: &mut TriggerExecution, message: &str) {
        execution.fail(message);
        self.finish(execution).await;
    }

    async fn finish(&self, execution: &TriggerExecution) {
        if let Err(e) = self.store.update_execution(execution).await {
            error!(
                trigger_id = %execution.trigger_id,
                execution_id = %execution.id,
                status = %execution.status,
                error = %e,
                "failed to record execution result"
            );
        }
    }

    pub async fn recent(
        &self,
        trigger_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TriggerExecution>> {
        Ok(self
            .store
            .recent_executions(trigger_id, clamp_page(limit), offset)
            .await?)
    }
}

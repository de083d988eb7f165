//! One poll cycle for one trigger: poll, filter, dispatch, commit, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_core::{ExecutionStatus, Progress, Trigger, TriggerExecution};
use sluice_rules::RuleEvaluator;
use sluice_storage::TriggerStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::JobDispatcher;
use crate::pollers::{PollContext, PollerRegistry};
use crate::tracker::ExecutionTracker;

/// Summary of a finished cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub trigger_id: Uuid,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub fetched: usize,
    pub event_count: usize,
    pub jobs_triggered: u32,
    /// Marker committed by this cycle, if it moved.
    pub committed: Option<Progress>,
    pub error: Option<String>,
}

struct Processed {
    fetched: usize,
    events: Vec<Value>,
    jobs_triggered: u32,
    committed: Option<Progress>,
}

pub struct CycleRunner {
    store: Arc<dyn TriggerStore>,
    pollers: Arc<PollerRegistry>,
    jobs: JobDispatcher,
    tracker: ExecutionTracker,
    source_timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        pollers: Arc<PollerRegistry>,
        jobs: JobDispatcher,
        source_timeout: Duration,
    ) -> Self {
        Self {
            tracker: ExecutionTracker::new(Arc::clone(&store)),
            store,
            pollers,
            jobs,
            source_timeout,
        }
    }

    pub fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    /// Source round-trip bound: the configured timeout, capped at half the
    /// polling interval, never below one second.
    pub fn timeout_for(&self, trigger: &Trigger) -> Duration {
        self.source_timeout
            .min(trigger.effective_interval() / 2)
            .max(Duration::from_secs(1))
    }

    /// Open the `running` execution for a cycle about to start.
    pub async fn begin(&self, trigger_id: Uuid) -> Result<TriggerExecution> {
        self.tracker.begin(trigger_id).await
    }

    /// Run the cycle against an already-opened execution. Failures are
    /// recorded on the execution and the trigger, then reported.
    pub async fn run(&self, trigger: Trigger, mut execution: TriggerExecution) -> CycleReport {
        let started = Instant::now();
        let now = Utc::now();

        match self.process(&trigger, now).await {
            Ok(done) => {
                self.tracker
                    .complete(&mut execution, &done.events, done.jobs_triggered)
                    .await;
                self.mark_polled(&trigger, now).await;

                if done.events.is_empty() {
                    debug!(
                        trigger_id = %trigger.id,
                        fetched = done.fetched,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "cycle finished without events"
                    );
                } else {
                    info!(
                        trigger_id = %trigger.id,
                        trigger = %trigger.name,
                        events = done.events.len(),
                        jobs = done.jobs_triggered,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "cycle completed"
                    );
                }

                CycleReport {
                    trigger_id: trigger.id,
                    execution_id: execution.id,
                    status: execution.status,
                    fetched: done.fetched,
                    event_count: done.events.len(),
                    jobs_triggered: done.jobs_triggered,
                    committed: done.committed,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    trigger_id = %trigger.id,
                    trigger = %trigger.name,
                    error = %message,
                    "cycle failed"
                );
                self.record_failure(&trigger, &mut execution, &message).await;
                CycleReport {
                    trigger_id: trigger.id,
                    execution_id: execution.id,
                    status: execution.status,
                    fetched: 0,
                    event_count: 0,
                    jobs_triggered: 0,
                    committed: None,
                    error: Some(message),
                }
            }
        }
    }

    /// Mark the execution failed and move the trigger to `error`, unless it
    /// was paused or disabled while the cycle ran.
    pub async fn record_failure(
        &self,
        trigger: &Trigger,
        execution: &mut TriggerExecution,
        message: &str,
    ) {
        self.tracker.fail(execution, message).await;
        if let Err(e) = self.store.mark_failed(trigger.id, message).await {
            error!(trigger_id = %trigger.id, error = %e, "failed to record trigger error");
        }
        if let Err(e) = self.store.update_last_polled(trigger.id, Utc::now()).await {
            error!(trigger_id = %trigger.id, error = %e, "failed to record poll time");
        }
    }

    async fn process(&self, trigger: &Trigger, now: DateTime<Utc>) -> Result<Processed> {
        let poller = self.pollers.get(trigger.trigger_type)?;
        let ctx = PollContext {
            now,
            timeout: self.timeout_for(trigger),
        };

        let outcome = poller.poll(trigger, &ctx).await?;

        let rules = self.store.list_rules(trigger.id).await?;
        let events = RuleEvaluator::filter_events(&rules, outcome.events);

        let jobs_triggered = if events.is_empty() {
            0
        } else {
            let links = self.store.list_job_links(trigger.id).await?;
            self.jobs.dispatch(trigger, &links, &events)
        };

        // Dispatch succeeded; the source range is now consumed.
        if let Some(progress) = &outcome.progress {
            match progress {
                Progress::Watermark(mark) => self.store.update_watermark(trigger.id, mark).await?,
                Progress::EmailUid(uid) => self.store.update_email_uid(trigger.id, *uid).await?,
            }
        }

        Ok(Processed {
            fetched: outcome.fetched,
            events,
            jobs_triggered,
            committed: outcome.progress,
        })
    }

    async fn mark_polled(&self, trigger: &Trigger, now: DateTime<Utc>) {
        if let Err(e) = self.store.update_last_polled(trigger.id, now).await {
            error!(trigger_id = %trigger.id, error = %e, "failed to record poll time");
        }
        if let Err(e) = self.store.clear_error(trigger.id).await {
            error!(trigger_id = %trigger.id, error = %e, "failed to clear last error");
        }
    }
}

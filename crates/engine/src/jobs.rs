//! Fire-and-forget invocation of linked jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sluice_core::config::JobServiceConfig;
use sluice_core::{Trigger, TriggerJob};
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors raised by a job invocation. They are logged, never propagated
/// into the poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("job service returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// External job execution service.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Start `job_id`. Returns once the service accepted the request, not
    /// when the job finishes.
    async fn execute(&self, job_id: Uuid, payload: Option<Value>) -> Result<(), JobError>;
}

// ── HTTP ────────────────────────────────────────────────────────────

/// `POST {base_url}/api/jobs/{job_id}/execute` with an optional bearer token.
#[derive(Debug, Clone)]
pub struct HttpJobExecutor {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpJobExecutor {
    pub fn new(config: &JobServiceConfig) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, job_id: Uuid) -> String {
        format!("{}/api/jobs/{job_id}/execute", self.base_url)
    }
}

#[async_trait]
impl JobExecutor for HttpJobExecutor {
    async fn execute(&self, job_id: Uuid, payload: Option<Value>) -> Result<(), JobError> {
        let body = json!({ "event_data": payload });

        let mut request = self.client.post(self.url(job_id)).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Fans surviving events out to a trigger's active job links.
#[derive(Clone)]
pub struct JobDispatcher {
    executor: Arc<dyn JobExecutor>,
}

impl JobDispatcher {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self { executor }
    }

    /// Spawn one invocation per active link, lowest priority value first.
    /// Returns the number of invocations issued.
    pub fn dispatch(&self, trigger: &Trigger, links: &[TriggerJob], events: &[Value]) -> u32 {
        let mut active: Vec<&TriggerJob> = links.iter().filter(|l| l.active).collect();
        active.sort_by_key(|l| l.priority);

        let mut issued = 0;
        for link in active {
            let payload = link.pass_event_data.then(|| event_payload(trigger, events));
            let executor = Arc::clone(&self.executor);
            let job_id = link.job_id;
            let trigger_id = trigger.id;

            tokio::spawn(async move {
                match executor.execute(job_id, payload).await {
                    Ok(()) => debug!(%trigger_id, %job_id, "job invoked"),
                    Err(e) => warn!(%trigger_id, %job_id, error = %e, "job invocation failed"),
                }
            });
            issued += 1;
        }
        issued
    }
}

fn event_payload(trigger: &Trigger, events: &[Value]) -> Value {
    json!({
        "trigger_id": trigger.id,
        "trigger_name": trigger.name,
        "event_count": events.len(),
        "events": events,
    })
}

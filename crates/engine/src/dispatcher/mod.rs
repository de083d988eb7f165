//! Periodic trigger dispatch over a bounded worker pool.
//!
//! Each tick loads the active triggers, picks the due ones, and spawns one
//! task per trigger. A task claims the trigger in the [`InFlightSet`], waits
//! for a worker permit, then runs the cycle on its own inner task so that a
//! panic in the cycle is contained and recorded against that trigger only.

mod inflight;
mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sluice_core::config::DispatcherSettings;
use sluice_core::schedule::is_due;
use sluice_core::{Trigger, TriggerStatus};
use sluice_storage::TriggerStore;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cycle::{CycleReport, CycleRunner};
use crate::error::{EngineError, Result};
use crate::jobs::JobDispatcher;
use crate::pollers::PollerRegistry;

pub use inflight::{InFlightGuard, InFlightSet};
pub use stats::DispatcherStats;
use stats::StatsRecorder;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick: Duration,
    pub max_workers: usize,
    pub source_timeout: Duration,
    /// Permit waits longer than this are logged as starvation.
    pub permit_wait_warn: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&DispatcherSettings::default())
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(s: &DispatcherSettings) -> Self {
        Self {
            tick: s.tick(),
            max_workers: s.max_workers.max(1),
            source_timeout: s.source_timeout(),
            permit_wait_warn: s.permit_wait_warn(),
        }
    }
}

/// Whether a spawned task re-reads the trigger after getting its permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Scheduled by a tick: skip if the trigger left `active` while waiting.
    Scheduled,
    /// Manual fire: run regardless of status.
    Manual,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn TriggerStore>,
    cycles: Arc<CycleRunner>,
    permits: Arc<Semaphore>,
    in_flight: InFlightSet,
    stats: Arc<StatsRecorder>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn TriggerStore>,
        pollers: Arc<PollerRegistry>,
        jobs: JobDispatcher,
    ) -> Self {
        let cycles = CycleRunner::new(Arc::clone(&store), pollers, jobs, config.source_timeout);
        Self {
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            store,
            cycles: Arc::new(cycles),
            in_flight: InFlightSet::new(),
            stats: Arc::new(StatsRecorder::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.snapshot()
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Tick until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        info!(
            tick_secs = self.config.tick.as_secs(),
            max_workers = self.config.max_workers,
            "dispatcher started"
        );

        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.tick(Utc::now()).await {
                Ok(spawned) if !spawned.is_empty() => {
                    debug!(spawned = spawned.len(), "dispatch tick");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "dispatch tick failed"),
            }
        }

        info!("dispatcher stopped");
    }

    /// Stop the loop after the current tick. In-flight cycles keep running.
    pub fn shutdown(&self) {
        info!("dispatcher shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Wait up to `within` for every worker permit to be free again.
    pub async fn drain(&self, within: Duration) -> bool {
        let all = u32::try_from(self.config.max_workers.max(1)).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(within, self.permits.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }

    /// One selection pass: spawn a cycle for every active, due trigger that
    /// has no cycle in flight.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let triggers = self.store.find_all_active().await?;
        let mut spawned = Vec::new();

        for trigger in triggers {
            if !self.cycles.pollers().supports(trigger.trigger_type) {
                continue;
            }
            if !is_due(&trigger, now) {
                continue;
            }
            let Some(claim) = self.in_flight.try_claim(trigger.id) else {
                self.stats.skipped();
                debug!(trigger_id = %trigger.id, "previous cycle still in flight, skipping");
                continue;
            };
            spawned.push(self.spawn(trigger, claim, Admission::Scheduled));
        }

        Ok(spawned)
    }

    /// Run one cycle for `id` now, through the same pool and exclusivity guard.
    pub async fn run_now(&self, id: Uuid) -> Result<JoinHandle<()>> {
        let trigger = self
            .store
            .get(id)
            .await?
            .ok_or(EngineError::TriggerNotFound(id))?;
        if trigger.status == TriggerStatus::Disabled {
            return Err(sluice_core::SluiceError::InvalidTransition {
                from: TriggerStatus::Disabled,
                to: TriggerStatus::Active,
            }
            .into());
        }
        self.cycles.pollers().get(trigger.trigger_type)?;

        let claim = self
            .in_flight
            .try_claim(id)
            .ok_or(EngineError::AlreadyRunning(id))?;
        Ok(self.spawn(trigger, claim, Admission::Manual))
    }

    fn spawn(&self, trigger: Trigger, claim: InFlightGuard, admission: Admission) -> JoinHandle<()> {
        let task = WorkerTask {
            store: Arc::clone(&self.store),
            cycles: Arc::clone(&self.cycles),
            permits: Arc::clone(&self.permits),
            stats: Arc::clone(&self.stats),
            permit_wait_warn: self.config.permit_wait_warn,
        };
        tokio::spawn(task.run(trigger, claim, admission))
    }
}

// ── Worker task ─────────────────────────────────────────────────────

struct WorkerTask {
    store: Arc<dyn TriggerStore>,
    cycles: Arc<CycleRunner>,
    permits: Arc<Semaphore>,
    stats: Arc<StatsRecorder>,
    permit_wait_warn: Duration,
}

impl WorkerTask {
    async fn run(self, trigger: Trigger, claim: InFlightGuard, admission: Admission) {
        let _claim = claim;
        let id = trigger.id;

        let waiting = Instant::now();
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let waited = waiting.elapsed();
        self.stats.permit_wait(waited);
        if waited >= self.permit_wait_warn {
            warn!(
                trigger_id = %id,
                waited_ms = waited.as_millis() as u64,
                "worker pool saturated; trigger waited for a permit"
            );
        }

        let trigger = match admission {
            Admission::Manual => trigger,
            Admission::Scheduled => match self.store.get(id).await {
                Ok(Some(current)) if current.status == TriggerStatus::Active => current,
                Ok(_) => {
                    debug!(trigger_id = %id, "trigger no longer active, skipping cycle");
                    return;
                }
                Err(e) => {
                    warn!(trigger_id = %id, error = %e, "failed to reload trigger");
                    return;
                }
            },
        };

        let execution = match self.cycles.begin(id).await {
            Ok(execution) => execution,
            Err(e) => {
                error!(trigger_id = %id, error = %e, "failed to open execution");
                self.stats.failed();
                return;
            }
        };

        self.stats.worker_started();
        let inner = {
            let cycles = Arc::clone(&self.cycles);
            let trigger = trigger.clone();
            let execution = execution.clone();
            tokio::spawn(async move { cycles.run(trigger, execution).await })
        };

        match inner.await {
            Ok(report) => self.record(&report),
            Err(join) => {
                let message = panic_message(join);
                error!(trigger_id = %id, error = %message, "poll cycle aborted");
                self.stats.panicked();
                let mut execution = execution;
                self.cycles
                    .record_failure(&trigger, &mut execution, &message)
                    .await;
            }
        }
        self.stats.worker_finished();
    }

    fn record(&self, report: &CycleReport) {
        if report.error.is_some() {
            self.stats.failed();
        } else {
            self.stats.completed();
        }
    }
}

fn panic_message(join: JoinError) -> String {
    if !join.is_panic() {
        return EngineError::Panic("cycle task cancelled".into()).to_string();
    }
    let payload = join.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".into());
    EngineError::Panic(detail).to_string()
}

//! coordinator.rs — the worker pool over the queue.
//!
//! Each worker loops: claim the oldest eligible item under an exclusive
//! lease, run the pipeline, release with the verdict. Pause is a shared
//! flag checked before every claim; a paused coordinator finishes the
//! items already in flight and stops picking up new ones. Stage failures
//! are translated into requeues or terminal failures, never crashes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, PipelineVerdict};
use crate::queue::{ErrorKind, ItemError};
use crate::store::{JobStore, Release};

/// Shared pause switch. Injected into the coordinator and the admin
/// surface so tests can construct their own instead of fighting over a
/// process-wide singleton.
#[derive(Clone, Default)]
pub struct ProcessingControl {
    paused: Arc<AtomicBool>,
}

impl ProcessingControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        gauge!("jobscout_processing_enabled").set(0.0);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        gauge!("jobscout_processing_enabled").set(1.0);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorCfg {
    pub workers: usize,
    /// Idle sleep between empty claim attempts.
    pub poll_interval: Duration,
    /// Exclusive lease length per claim; crashed workers free their items
    /// when it expires.
    pub claim_lease: Duration,
    /// Requeue ceiling for recoverable failures.
    pub max_attempts: u32,
    /// Base for the bounded exponential backoff.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for CoordinatorCfg {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(500),
            claim_lease: Duration::from_secs(120),
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// backoff = base * 2^attempts, capped.
fn backoff_for(cfg: &CoordinatorCfg, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.min(16));
    cfg.backoff_base
        .saturating_mul(factor)
        .min(cfg.backoff_cap)
}

pub struct Coordinator<S: JobStore> {
    store: Arc<S>,
    pipeline: Arc<Pipeline<S>>,
    control: ProcessingControl,
    cfg: CoordinatorCfg,
}

impl<S: JobStore> Coordinator<S> {
    pub fn new(
        store: Arc<S>,
        pipeline: Arc<Pipeline<S>>,
        control: ProcessingControl,
        cfg: CoordinatorCfg,
    ) -> Self {
        gauge!("jobscout_processing_enabled").set(if control.is_paused() { 0.0 } else { 1.0 });
        Self {
            store,
            pipeline,
            control,
            cfg,
        }
    }

    /// Spawn the worker tasks. Handles are returned so callers can await
    /// or abort them; the tasks themselves run until aborted.
    pub fn spawn_workers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.cfg.workers.max(1))
            .map(|i| {
                let me = Arc::clone(&self);
                let name = format!("worker-{i}");
                tokio::spawn(async move { me.worker_loop(&name).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: &str) {
        info!(target: "queue", %worker, "worker started");
        loop {
            if self.control.is_paused() {
                tokio::time::sleep(self.cfg.poll_interval).await;
                continue;
            }
            match self.tick(worker).await {
                Ok(true) => {} // processed one, go straight for the next
                Ok(false) => tokio::time::sleep(self.cfg.poll_interval).await,
                Err(e) => {
                    // Store trouble; log and back off rather than spin.
                    error!(target: "queue", %worker, error = %e, "claim loop error");
                    tokio::time::sleep(self.cfg.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one item. Returns whether work was found.
    pub async fn tick(&self, worker: &str) -> anyhow::Result<bool> {
        let Some(item) = self
            .store
            .claim_next(worker, Utc::now(), self.cfg.claim_lease)
            .await?
        else {
            return Ok(false);
        };

        let id = item.id;
        let attempts = item.attempts;
        counter!("jobscout_claims_total").increment(1);
        info!(target: "queue", %worker, item = %id, attempts, "claimed");

        let verdict = self.pipeline.run(item).await;
        let release = match verdict {
            PipelineVerdict::Completed { status, message } => {
                counter!("jobscout_items_completed_total").increment(1);
                info!(target: "queue", item = %id, ?status, %message, "completed");
                Release::Terminal { status, message }
            }
            PipelineVerdict::Recoverable { message } => {
                if attempts + 1 >= self.cfg.max_attempts {
                    warn!(target: "queue", item = %id, attempts, %message, "retry ceiling hit");
                    counter!("jobscout_items_failed_total").increment(1);
                    Release::Failed {
                        error: ItemError {
                            kind: ErrorKind::Recoverable,
                            message: message.clone(),
                        },
                        message: format!(
                            "failed after {} attempts: {message}",
                            attempts + 1
                        ),
                    }
                } else {
                    let backoff = backoff_for(&self.cfg, attempts);
                    warn!(
                        target: "queue",
                        item = %id,
                        attempts,
                        backoff_secs = backoff.as_secs(),
                        %message,
                        "requeued"
                    );
                    counter!("jobscout_items_requeued_total").increment(1);
                    Release::Requeue {
                        backoff,
                        error: ItemError {
                            kind: ErrorKind::Recoverable,
                            message,
                        },
                    }
                }
            }
            PipelineVerdict::Fatal { message } => {
                error!(target: "queue", item = %id, %message, "fatal");
                counter!("jobscout_items_failed_total").increment(1);
                Release::Failed {
                    error: ItemError {
                        kind: ErrorKind::Fatal,
                        message: message.clone(),
                    },
                    message,
                }
            }
        };

        // A skip observed by the pipeline lands here as a terminal skip.
        self.store.release(id, release, Utc::now()).await?;
        if let Ok(stats) = self.store.stats().await {
            gauge!("jobscout_queue_depth").set(stats.depth as f64);
        }
        Ok(true)
    }
}

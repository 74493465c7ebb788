//! store.rs — the narrow persistence contract the core depends on, plus an
//! in-process implementation.
//!
//! The pipeline needs exactly three guarantees from a backing store:
//! (a) atomic conditional insert for identity reservation, (b) atomic
//! compare-and-set for item claim/release, (c) durable row storage for
//! items and postings. `MemoryStore` provides all three behind one mutex;
//! a database-backed implementation can swap in behind the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{CompanyMeta, Posting};
use crate::queue::{Claim, ItemError, ItemStatus, QueueItem, StageCommit, StagePayload};

/// Result of an identity reservation. A duplicate hands back the canonical
/// record instead of creating new work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReserveOutcome {
    Created { item_id: Uuid },
    Existing { item_id: Uuid, status: ItemStatus },
}

/// How a worker hands a claimed item back.
#[derive(Debug, Clone)]
pub enum Release {
    /// Stage run finished in a terminal state (success/filtered/skipped).
    Terminal {
        status: ItemStatus,
        message: String,
    },
    /// Recoverable failure: requeue with backoff, attempts incremented.
    Requeue {
        backoff: Duration,
        error: ItemError,
    },
    /// Retry ceiling exceeded or unrecoverable: terminal failed.
    Failed {
        error: ItemError,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueStats {
    pub counts: HashMap<ItemStatus, usize>,
    /// Pending + retrying, i.e. claimable backlog.
    pub depth: usize,
    /// Mean seconds between consecutive stage commits, across all items.
    pub avg_stage_secs: Option<f64>,
    /// Mean seconds from creation to a terminal state.
    pub avg_terminal_secs: Option<f64>,
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Atomic check-and-insert keyed by canonical identity. Never
    /// check-then-insert: concurrent submitters of the same identity must
    /// all resolve to one record.
    async fn reserve_identity(&self, canonical_id: &str, item: QueueItem)
        -> Result<ReserveOutcome>;

    /// Claim the oldest eligible pending item (FIFO by created_at, ties by
    /// id) under an exclusive lease. Expired leases are claimable again.
    async fn claim_next(
        &self,
        worker: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<QueueItem>>;

    /// Persist a stage transition atomically with its payload, returning
    /// the updated item. Extends the claim lease.
    async fn commit_stage(
        &self,
        id: Uuid,
        status: ItemStatus,
        payload: Option<StagePayload>,
        audit: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueItem>;

    /// Finish a claim: terminal transition or requeue with backoff.
    async fn release(&self, id: Uuid, disposition: Release, now: DateTime<Utc>) -> Result<QueueItem>;

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>>;
    async fn get_by_canonical(&self, canonical_id: &str) -> Result<Option<QueueItem>>;

    /// Operator retry: terminal-failed → pending. Stage payloads collapse
    /// into the audit trail; the audit itself is preserved.
    async fn retry(&self, id: Uuid, now: DateTime<Utc>) -> Result<QueueItem>;

    /// Operator skip, honored at the item's next stage-transition check.
    async fn request_skip(&self, id: Uuid) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn save_posting(&self, posting: Posting) -> Result<()>;
    async fn posting(&self, canonical_url: &str) -> Result<Option<Posting>>;

    async fn company_meta(&self, name: &str) -> Result<Option<CompanyMeta>>;
    async fn put_company_meta(&self, meta: CompanyMeta) -> Result<()>;
}

/* ----------------------------
In-memory implementation
---------------------------- */

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, QueueItem>,
    identity: HashMap<String, Uuid>,
    postings: HashMap<String, Posting>,
    companies: HashMap<String, CompanyMeta>,
}

/// Single-mutex store. Every trait operation takes the lock once, which is
/// exactly what makes reserve and claim atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn claim_expired(claim: &Option<Claim>, now: DateTime<Utc>) -> bool {
    match claim {
        None => true,
        Some(c) => c.lease_until <= now,
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn reserve_identity(
        &self,
        canonical_id: &str,
        item: QueueItem,
    ) -> Result<ReserveOutcome> {
        let mut g = self.lock();
        if let Some(existing_id) = g.identity.get(canonical_id) {
            let status = g
                .items
                .get(existing_id)
                .map(|it| it.status)
                .unwrap_or(ItemStatus::Pending);
            return Ok(ReserveOutcome::Existing {
                item_id: *existing_id,
                status,
            });
        }
        let id = item.id;
        g.identity.insert(canonical_id.to_string(), id);
        g.items.insert(id, item);
        Ok(ReserveOutcome::Created { item_id: id })
    }

    async fn claim_next(
        &self,
        worker: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<QueueItem>> {
        let mut g = self.lock();

        let mut best: Option<Uuid> = None;
        let mut best_key: Option<(DateTime<Utc>, Uuid)> = None;
        for it in g.items.values() {
            if it.status.is_terminal() {
                continue;
            }
            if !claim_expired(&it.claim, now) {
                continue;
            }
            // Fresh items must be pending/retrying; anything else with an
            // expired lease is a crashed worker's item and is reclaimable.
            let eligible = matches!(it.status, ItemStatus::Pending | ItemStatus::Retrying)
                || it.claim.is_some();
            if !eligible {
                continue;
            }
            if let Some(nb) = it.not_before {
                if nb > now {
                    continue;
                }
            }
            let key = (it.created_at, it.id);
            if best_key.map(|bk| key < bk).unwrap_or(true) {
                best_key = Some(key);
                best = Some(it.id);
            }
        }

        Ok(best.and_then(|id| {
            let it = g.items.get_mut(&id)?;
            it.claim = Some(Claim {
                worker: worker.to_string(),
                lease_until: now + chrono::Duration::from_std(lease).unwrap_or_default(),
            });
            it.updated_at = now;
            Some(it.clone())
        }))
    }

    async fn commit_stage(
        &self,
        id: Uuid,
        status: ItemStatus,
        payload: Option<StagePayload>,
        audit: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueItem> {
        let mut g = self.lock();
        let it = g
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("commit_stage: unknown item {id}"))?;
        it.status = status;
        if let Some(p) = payload {
            it.stages.push(StageCommit { at: now, payload: p });
        }
        if let Some(line) = audit {
            it.push_audit(line);
        }
        if let Some(c) = &mut it.claim {
            // keep the lease alive while stages commit
            c.lease_until = c.lease_until.max(now + chrono::Duration::seconds(60));
        }
        it.updated_at = now;
        Ok(it.clone())
    }

    async fn release(
        &self,
        id: Uuid,
        disposition: Release,
        now: DateTime<Utc>,
    ) -> Result<QueueItem> {
        let mut g = self.lock();
        let it = g
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("release: unknown item {id}"))?;
        it.claim = None;
        match disposition {
            Release::Terminal { status, message } => {
                it.status = status;
                it.result_message = Some(message);
                it.not_before = None;
            }
            Release::Requeue { backoff, error } => {
                it.attempts += 1;
                it.status = ItemStatus::Retrying;
                it.not_before =
                    Some(now + chrono::Duration::from_std(backoff).unwrap_or_default());
                it.push_audit(format!(
                    "requeued (attempt {}): {}",
                    it.attempts, error.message
                ));
                it.error = Some(error);
            }
            Release::Failed { error, message } => {
                it.status = ItemStatus::Failed;
                it.result_message = Some(message);
                it.error = Some(error);
            }
        }
        it.updated_at = now;
        Ok(it.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.lock().items.get(&id).cloned())
    }

    async fn get_by_canonical(&self, canonical_id: &str) -> Result<Option<QueueItem>> {
        let g = self.lock();
        Ok(g.identity
            .get(canonical_id)
            .and_then(|id| g.items.get(id))
            .cloned())
    }

    async fn retry(&self, id: Uuid, now: DateTime<Utc>) -> Result<QueueItem> {
        let mut g = self.lock();
        let it = g
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("retry: unknown item {id}"))?;
        if it.status != ItemStatus::Failed {
            anyhow::bail!("retry only applies to failed items (status {:?})", it.status);
        }
        let discarded = it.stages.len();
        it.push_audit(format!(
            "operator retry: cleared {discarded} stage payloads, attempts reset"
        ));
        it.stages.clear();
        it.attempts = 0;
        it.not_before = None;
        it.error = None;
        it.result_message = None;
        it.skip_requested = false;
        it.status = ItemStatus::Pending;
        it.updated_at = now;
        Ok(it.clone())
    }

    async fn request_skip(&self, id: Uuid) -> Result<()> {
        let mut g = self.lock();
        let it = g
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("skip: unknown item {id}"))?;
        if it.status.is_terminal() {
            anyhow::bail!("skip: item already terminal ({:?})", it.status);
        }
        it.skip_requested = true;
        it.push_audit("operator skip requested".to_string());
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let g = self.lock();
        let mut counts: HashMap<ItemStatus, usize> = HashMap::new();
        let mut stage_gaps = Vec::new();
        let mut terminal_secs = Vec::new();
        for it in g.items.values() {
            *counts.entry(it.status).or_insert(0) += 1;
            let mut prev = it.created_at;
            for c in &it.stages {
                stage_gaps.push((c.at - prev).num_milliseconds() as f64 / 1000.0);
                prev = c.at;
            }
            if it.status.is_terminal() {
                terminal_secs.push((it.updated_at - it.created_at).num_milliseconds() as f64 / 1000.0);
            }
        }
        let depth = counts.get(&ItemStatus::Pending).copied().unwrap_or(0)
            + counts.get(&ItemStatus::Retrying).copied().unwrap_or(0);
        let avg = |v: &[f64]| {
            if v.is_empty() {
                None
            } else {
                Some(v.iter().sum::<f64>() / v.len() as f64)
            }
        };
        Ok(QueueStats {
            counts,
            depth,
            avg_stage_secs: avg(&stage_gaps),
            avg_terminal_secs: avg(&terminal_secs),
        })
    }

    async fn save_posting(&self, posting: Posting) -> Result<()> {
        self.lock()
            .postings
            .insert(posting.canonical_url.clone(), posting);
        Ok(())
    }

    async fn posting(&self, canonical_url: &str) -> Result<Option<Posting>> {
        Ok(self.lock().postings.get(canonical_url).cloned())
    }

    async fn company_meta(&self, name: &str) -> Result<Option<CompanyMeta>> {
        let g = self.lock();
        Ok(g.companies.get(&name.to_ascii_lowercase()).cloned())
    }

    async fn put_company_meta(&self, meta: CompanyMeta) -> Result<()> {
        self.lock()
            .companies
            .insert(meta.name.to_ascii_lowercase(), meta);
        Ok(())
    }
}

//! dedup.rs — canonical identity for postings: URL normalization and the
//! atomic admission gate.
//!
//! Two raw URLs that normalize identically must resolve to the same
//! record even when submitted concurrently, so the reservation is a
//! single conditional insert in the store, never check-then-insert.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use url::Url;

use crate::model::Submission;
use crate::queue::{ItemType, QueueItem, StagePayload};
use crate::store::{JobStore, ReserveOutcome};

/// Query parameters that carry tracking state, not identity.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src", "refid",
    "src", "trk", "trackingid", "cmpid",
];

/// Hosts that wrap the real URL in a query parameter.
const REDIRECTOR_HOSTS: &[(&str, &str)] = &[
    ("www.google.com", "q"),
    ("google.com", "q"),
    ("l.facebook.com", "u"),
    ("lm.facebook.com", "u"),
    ("lnkd.in", "url"),
    ("out.reddit.com", "url"),
    ("r.search.yahoo.com", "ru"),
];

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_") || TRACKING_PARAMS.contains(&k.as_str())
}

/// Normalize a raw URL to its canonical identity form:
/// case-fold scheme/host, strip default ports, drop the fragment, strip
/// tracking parameters, sort the surviving query, strip the trailing
/// slash, and unwrap known redirectors. Returns None for non-http(s) or
/// malformed input (including out-of-range ports).
pub fn normalize_url(raw: &str) -> Option<String> {
    normalize_inner(raw, 0)
}

fn normalize_inner(raw: &str, depth: u8) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();

    // Unwrap redirectors (bounded, a wrapper can wrap a wrapper).
    // `query_pairs` hands back percent-decoded values.
    if depth < 3 {
        if let Some((_, param)) = REDIRECTOR_HOSTS.iter().find(|(h, _)| *h == host) {
            if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == param) {
                if let Some(out) = normalize_inner(&target, depth + 1) {
                    return Some(out);
                }
            }
        }
    }

    let mut out = format!("{}://{host}", url.scheme());
    // `Url::port` is already None for the scheme's default port.
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path().trim_end_matches('/'));

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        kept.sort();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        out.push('?');
        out.push_str(&query.finish());
    }

    Some(out)
}

/// Stable identity key: hex prefix of the sha256 of the normalized URL.
pub fn canonical_id(normalized: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(24);
    for b in digest.iter().take(12) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Admission failure: the submission never becomes a queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSubmission(pub String);

impl std::fmt::Display for InvalidSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid submission: {}", self.0)
    }
}

impl std::error::Error for InvalidSubmission {}

/// Result of admitting a submission through the duplicate index.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub outcome: ReserveOutcome,
    pub canonical_url: String,
    pub canonical_id: String,
}

impl Admission {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, ReserveOutcome::Existing { .. })
    }
}

/// The admission gate for all new work.
pub struct DuplicateIndex<S: JobStore> {
    store: Arc<S>,
}

impl<S: JobStore> DuplicateIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Normalize, then atomically check-and-insert. A duplicate returns the
    /// existing record's id and status; it is not an error.
    pub async fn check_and_reserve(
        &self,
        submission: Submission,
    ) -> anyhow::Result<Result<Admission, InvalidSubmission>> {
        let Some(canonical_url) = normalize_url(&submission.url) else {
            return Ok(Err(InvalidSubmission(format!(
                "not a valid http(s) URL: {}",
                submission.url
            ))));
        };
        let id = canonical_id(&canonical_url);

        if submission.bypass_filter {
            // The one explicit escape hatch; keep it loud in the logs.
            warn!(
                target: "dedup",
                canonical = %id,
                "bypass_filter submission admitted; pre-filter will be skipped"
            );
        }

        let now = Utc::now();
        let mut item = QueueItem::new(ItemType::Job, submission, now);
        item.stages.push(crate::queue::StageCommit {
            at: now,
            payload: StagePayload::Admitted {
                canonical_url: canonical_url.clone(),
                canonical_id: id.clone(),
                bypass_filter: item.submission.bypass_filter,
            },
        });
        item.push_audit(format!("admitted as {id}"));

        let outcome = self.store.reserve_identity(&id, item).await?;
        match &outcome {
            ReserveOutcome::Created { item_id } => {
                info!(target: "dedup", canonical = %id, item = %item_id, "new item admitted");
                metrics::counter!("jobscout_admitted_total").increment(1);
            }
            ReserveOutcome::Existing { item_id, .. } => {
                info!(target: "dedup", canonical = %id, item = %item_id, "duplicate submission");
                metrics::counter!("jobscout_duplicates_total").increment(1);
            }
        }

        Ok(Ok(Admission {
            outcome,
            canonical_url,
            canonical_id: id,
        }))
    }
}

//! queue.rs — the unit of work and its state machine vocabulary.
//!
//! A `QueueItem` advances through ordered stages; each stage commits a
//! tagged `StagePayload` before the item moves on. The item's history is
//! the ordered list of commits, which is what makes a restart resumable:
//! the next stage is derived from the last committed payload, never from
//! scratch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer::AnalysisReport;
use crate::model::{Posting, Submission};
use crate::prefilter::PrefilterOutcome;
use crate::scoring::ScoreBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Job,
    Company,
    SourceDiscovery,
    ScrapeSweep,
}

/// Item status. Strictly forward except operator retry, which resets a
/// terminal-failed item to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Retrying,
    Admitted,
    Prefiltering,
    Analyzing,
    Analyzed,
    Scoring,
    Matched,
    Success,
    Failed,
    Skipped,
    Filtered,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Filtered
        )
    }
}

/// Error taxonomy recorded on terminal-failed items. Policy rejects are
/// outcomes, not errors, and never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Recoverable,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Admission,
    Scrape,
    Prefilter,
    Analyze,
    Score,
    Persist,
}

/// Stage-specific structured output, committed atomically with the status
/// transition that produced it. Tagged by stage name — no reflection
/// needed to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    Admitted {
        canonical_url: String,
        canonical_id: String,
        bypass_filter: bool,
    },
    Scraped {
        posting: Posting,
    },
    Prefiltered {
        outcome: PrefilterOutcome,
        bypassed: bool,
    },
    Analyzed {
        report: AnalysisReport,
    },
    Scored {
        breakdown: ScoreBreakdown,
        policy_version: String,
    },
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Admitted { .. } => Stage::Admission,
            Self::Scraped { .. } => Stage::Scrape,
            Self::Prefiltered { .. } => Stage::Prefilter,
            Self::Analyzed { .. } => Stage::Analyze,
            Self::Scored { .. } => Stage::Score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommit {
    pub at: DateTime<Utc>,
    pub payload: StagePayload,
}

/// Exclusive ownership marker while a worker processes the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub worker: String,
    pub lease_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub submission: Submission,
    /// Ordered stage history; the resume point is the last entry.
    #[serde(default)]
    pub stages: Vec<StageCommit>,
    /// Operator-facing audit trail, preserved across retries.
    #[serde(default)]
    pub audit: Vec<String>,
    pub attempts: u32,
    /// Earliest time the item may be claimed again (backoff).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
    /// Operator skip request, honored at the next stage-transition check.
    #[serde(default)]
    pub skip_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl QueueItem {
    pub fn new(item_type: ItemType, submission: Submission, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_type,
            status: ItemStatus::Pending,
            submission,
            stages: Vec::new(),
            audit: Vec::new(),
            attempts: 0,
            not_before: None,
            claim: None,
            skip_requested: false,
            created_at: now,
            updated_at: now,
            result_message: None,
            error: None,
        }
    }

    pub fn last_payload(&self) -> Option<&StagePayload> {
        self.stages.last().map(|c| &c.payload)
    }

    /// The next stage to execute, derived from the last committed payload.
    /// Returns None once the item has nothing left to do.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.status.is_terminal() {
            return None;
        }
        match self.last_payload() {
            None => Some(Stage::Admission),
            Some(StagePayload::Admitted { .. }) => Some(Stage::Scrape),
            Some(StagePayload::Scraped { .. }) => {
                if self.submission.bypass_filter {
                    Some(Stage::Analyze)
                } else {
                    Some(Stage::Prefilter)
                }
            }
            Some(StagePayload::Prefiltered { outcome, .. }) => {
                if outcome.passed() {
                    Some(Stage::Analyze)
                } else {
                    None
                }
            }
            Some(StagePayload::Analyzed { .. }) => Some(Stage::Score),
            Some(StagePayload::Scored { .. }) => Some(Stage::Persist),
        }
    }

    /// Latest scraped posting, if the scrape stage has committed.
    pub fn posting(&self) -> Option<&Posting> {
        self.stages.iter().rev().find_map(|c| match &c.payload {
            StagePayload::Scraped { posting } => Some(posting),
            _ => None,
        })
    }

    pub fn analysis(&self) -> Option<&AnalysisReport> {
        self.stages.iter().rev().find_map(|c| match &c.payload {
            StagePayload::Analyzed { report } => Some(report),
            _ => None,
        })
    }

    pub fn breakdown(&self) -> Option<(&ScoreBreakdown, &str)> {
        self.stages.iter().rev().find_map(|c| match &c.payload {
            StagePayload::Scored {
                breakdown,
                policy_version,
            } => Some((breakdown, policy_version.as_str())),
            _ => None,
        })
    }

    pub fn push_audit(&mut self, line: impl Into<String>) {
        self.audit.push(line.into());
        // Keep the trail bounded; oldest lines fall off first.
        if self.audit.len() > 200 {
            let excess = self.audit.len() - 200;
            self.audit.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(url: &str) -> Submission {
        Submission {
            url: url.into(),
            company: None,
            title: Some("Senior Rust Engineer".into()),
            description: None,
            location: None,
            salary_range: None,
            posted_date: None,
            tech_stack: vec![],
            bypass_filter: false,
        }
    }

    fn item() -> QueueItem {
        QueueItem::new(ItemType::Job, submission("https://x.test/a"), Utc::now())
    }

    fn admit(it: &mut QueueItem) {
        it.stages.push(StageCommit {
            at: Utc::now(),
            payload: StagePayload::Admitted {
                canonical_url: "https://x.test/a".into(),
                canonical_id: "abc".into(),
                bypass_filter: it.submission.bypass_filter,
            },
        });
    }

    #[test]
    fn fresh_item_starts_at_admission() {
        assert_eq!(item().next_stage(), Some(Stage::Admission));
    }

    #[test]
    fn admitted_item_resumes_at_scrape() {
        let mut it = item();
        admit(&mut it);
        assert_eq!(it.next_stage(), Some(Stage::Scrape));
    }

    #[test]
    fn bypass_filter_skips_straight_to_analyze() {
        let mut it = item();
        it.submission.bypass_filter = true;
        admit(&mut it);
        it.stages.push(StageCommit {
            at: Utc::now(),
            payload: StagePayload::Scraped {
                posting: crate::model::Posting {
                    url: "https://x.test/a".into(),
                    canonical_url: "https://x.test/a".into(),
                    title: "Senior Rust Engineer".into(),
                    company: "Acme".into(),
                    location: None,
                    salary_range: None,
                    description: None,
                    posted_date: None,
                    tech_stack: vec![],
                    work_arrangement: None,
                    employment_type: None,
                    seniority: None,
                    status: crate::model::PostingStatus::Pending,
                },
            },
        });
        assert_eq!(it.next_stage(), Some(Stage::Analyze));
    }

    #[test]
    fn terminal_item_has_no_next_stage() {
        let mut it = item();
        it.status = ItemStatus::Filtered;
        assert_eq!(it.next_stage(), None);
    }

    #[test]
    fn stage_payload_roundtrips_with_stage_tag() {
        let p = StagePayload::Admitted {
            canonical_url: "https://x.test/a".into(),
            canonical_id: "abc".into(),
            bypass_filter: false,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["stage"], serde_json::json!("admitted"));
        let back: StagePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.stage(), Stage::Admission);
    }
}

//! # Pipeline State Machine
//! Drives one claimed item through its stages: admission → scrape →
//! prefilter → analyze → score → persist. Each stage commits its payload
//! atomically with the status transition, so a restart resumes from the
//! last committed stage instead of re-running completed work.
//!
//! Stage-local failures are translated into verdicts for the coordinator
//! (terminal, recoverable, fatal) — they never escape as panics or crash
//! the claim loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::analyzer::DynAnalyzer;
use crate::model::{
    normalize_text, EmploymentType, Posting, PostingStatus, Profile, Seniority, WorkArrangement,
};
use crate::policy::{timezone_diff_hours, PolicyHandle, PolicySet};
use crate::prefilter;
use crate::queue::{ItemStatus, QueueItem, Stage, StagePayload};
use crate::store::JobStore;

/// How a single pipeline run ended, from the coordinator's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineVerdict {
    /// The item reached a terminal state (success/filtered/skipped).
    Completed { status: ItemStatus, message: String },
    /// Transient trouble: requeue with backoff.
    Recoverable { message: String },
    /// Unrecoverable for this item: terminal failed.
    Fatal { message: String },
}

#[derive(Debug, Clone)]
pub struct PipelineCfg {
    pub analyzer_timeout: Duration,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            analyzer_timeout: Duration::from_secs(45),
        }
    }
}

pub struct Pipeline<S: JobStore> {
    store: Arc<S>,
    analyzer: DynAnalyzer,
    policies: PolicyHandle,
    profile: Arc<Profile>,
    cfg: PipelineCfg,
}

impl<S: JobStore> Pipeline<S> {
    pub fn new(
        store: Arc<S>,
        analyzer: DynAnalyzer,
        policies: PolicyHandle,
        profile: Arc<Profile>,
        cfg: PipelineCfg,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            store,
            analyzer,
            policies,
            profile,
            cfg,
        }
    }

    /// Run a claimed item forward until it is done, needs a requeue, or is
    /// terminally failed. The policy set is snapshotted once here so a
    /// single item's journey stays internally consistent.
    pub async fn run(&self, mut item: QueueItem) -> PipelineVerdict {
        let policies = self.policies.snapshot();

        loop {
            // Operator skip is honored at the transition check, never by
            // interrupting a running stage.
            if item.skip_requested {
                return PipelineVerdict::Completed {
                    status: ItemStatus::Skipped,
                    message: "skipped by operator".into(),
                };
            }

            let Some(stage) = item.next_stage() else {
                // Nothing left to do. A filtered outcome was already
                // released terminally; anything else lands on success.
                return PipelineVerdict::Completed {
                    status: ItemStatus::Success,
                    message: item
                        .result_message
                        .clone()
                        .unwrap_or_else(|| "pipeline complete".into()),
                };
            };

            let started = Instant::now();
            let step = match stage {
                Stage::Admission => self.stage_admission(&item).await,
                Stage::Scrape => self.stage_scrape(&item).await,
                Stage::Prefilter => self.stage_prefilter(&item, &policies).await,
                Stage::Analyze => self.stage_analyze(&item).await,
                Stage::Score => self.stage_score(&item, &policies).await,
                Stage::Persist => self.stage_persist(&item).await,
            };
            histogram!("jobscout_stage_ms").record(started.elapsed().as_millis() as f64);

            match step {
                Ok(StepOutcome::Advance(updated)) => item = updated,
                Ok(StepOutcome::Done { status, message }) => {
                    return PipelineVerdict::Completed { status, message }
                }
                Err(StageError::Recoverable(msg)) => {
                    return PipelineVerdict::Recoverable { message: msg }
                }
                Err(StageError::Fatal(msg)) => return PipelineVerdict::Fatal { message: msg },
            }
        }
    }

    async fn stage_admission(&self, item: &QueueItem) -> Result<StepOutcome, StageError> {
        // Normally committed at submission time; reached again only after
        // an operator retry cleared the stage history.
        let Some(canonical_url) = crate::dedup::normalize_url(&item.submission.url) else {
            return Err(StageError::Fatal(format!(
                "submission URL no longer parses: {}",
                item.submission.url
            )));
        };
        let canonical_id = crate::dedup::canonical_id(&canonical_url);
        let updated = self
            .store
            .commit_stage(
                item.id,
                ItemStatus::Admitted,
                Some(StagePayload::Admitted {
                    canonical_url,
                    canonical_id: canonical_id.clone(),
                    bypass_filter: item.submission.bypass_filter,
                }),
                Some(format!("re-admitted as {canonical_id}")),
                Utc::now(),
            )
            .await
            .map_err(store_err)?;
        Ok(StepOutcome::Advance(updated))
    }

    async fn stage_scrape(&self, item: &QueueItem) -> Result<StepOutcome, StageError> {
        let Some(StagePayload::Admitted {
            canonical_url,
            bypass_filter,
            ..
        }) = item.last_payload()
        else {
            return Err(StageError::Fatal("scrape without admission payload".into()));
        };

        let posting = materialize_posting(&item.submission, canonical_url);
        self.store
            .save_posting(posting.clone())
            .await
            .map_err(store_err)?;

        let next_status = if *bypass_filter {
            ItemStatus::Analyzing
        } else {
            ItemStatus::Prefiltering
        };
        let updated = self
            .store
            .commit_stage(
                item.id,
                next_status,
                Some(StagePayload::Scraped { posting }),
                Some("posting materialized from submission".into()),
                Utc::now(),
            )
            .await
            .map_err(store_err)?;
        Ok(StepOutcome::Advance(updated))
    }

    async fn stage_prefilter(
        &self,
        item: &QueueItem,
        policies: &PolicySet,
    ) -> Result<StepOutcome, StageError> {
        let posting = item
            .posting()
            .ok_or_else(|| StageError::Fatal("prefilter without scraped posting".into()))?
            .clone();

        let outcome = prefilter::evaluate(&posting, &policies.prefilter, Utc::now());
        let summary = outcome.summary();

        if outcome.passed() {
            let updated = self
                .store
                .commit_stage(
                    item.id,
                    ItemStatus::Analyzing,
                    Some(StagePayload::Prefiltered {
                        outcome,
                        bypassed: false,
                    }),
                    Some(summary),
                    Utc::now(),
                )
                .await
                .map_err(store_err)?;
            return Ok(StepOutcome::Advance(updated));
        }

        // Hard or accumulated reject: commit the verdict, then stop. The
        // analyzer must never run for this item.
        counter!("jobscout_filtered_total").increment(1);
        info!(target: "pipeline", item = %item.id, %summary, "pre-filter reject");

        let mut filtered = posting;
        filtered.status = PostingStatus::Filtered;
        self.store
            .save_posting(filtered)
            .await
            .map_err(store_err)?;
        self.store
            .commit_stage(
                item.id,
                ItemStatus::Filtered,
                Some(StagePayload::Prefiltered {
                    outcome,
                    bypassed: false,
                }),
                Some(summary.clone()),
                Utc::now(),
            )
            .await
            .map_err(store_err)?;
        Ok(StepOutcome::Done {
            status: ItemStatus::Filtered,
            message: summary,
        })
    }

    async fn stage_analyze(&self, item: &QueueItem) -> Result<StepOutcome, StageError> {
        let posting = item
            .posting()
            .ok_or_else(|| StageError::Fatal("analyze without scraped posting".into()))?
            .clone();

        if item.submission.bypass_filter && !matches!(item.last_payload(), Some(StagePayload::Prefiltered { .. })) {
            counter!("jobscout_bypass_total").increment(1);
            warn!(
                target: "pipeline",
                item = %item.id,
                "pre-filter bypassed by submission flag"
            );
        }

        let mut analyzing = posting.clone();
        analyzing.status = PostingStatus::Analyzing;
        self.store
            .save_posting(analyzing)
            .await
            .map_err(store_err)?;

        let report = match tokio::time::timeout(
            self.cfg.analyzer_timeout,
            self.analyzer.analyze(&posting, &self.profile),
        )
        .await
        {
            Err(_elapsed) => {
                return Err(StageError::Recoverable(format!(
                    "analyzer timeout after {:?}",
                    self.cfg.analyzer_timeout
                )))
            }
            Ok(Err(e)) => {
                return Err(StageError::Recoverable(format!("analyzer error: {e}")))
            }
            Ok(Ok(r)) => r,
        };

        counter!("jobscout_analyzed_total").increment(1);
        let mut analyzed = posting;
        analyzed.status = PostingStatus::Analyzed;
        self.store
            .save_posting(analyzed)
            .await
            .map_err(store_err)?;

        let updated = self
            .store
            .commit_stage(
                item.id,
                ItemStatus::Analyzed,
                Some(StagePayload::Analyzed { report }),
                Some("analyzer report committed".into()),
                Utc::now(),
            )
            .await
            .map_err(store_err)?;
        Ok(StepOutcome::Advance(updated))
    }

    async fn stage_score(
        &self,
        item: &QueueItem,
        policies: &PolicySet,
    ) -> Result<StepOutcome, StageError> {
        let version = policies.version_tag();

        // At most one breakdown per (item, policy-version): an existing
        // breakdown under the current version means there is nothing to do.
        if let Some((_, existing)) = item.breakdown() {
            if existing == version {
                return Err(StageError::Fatal(
                    "score stage re-entered with an existing breakdown".into(),
                ));
            }
        }

        let posting = item
            .posting()
            .ok_or_else(|| StageError::Fatal("score without scraped posting".into()))?
            .clone();
        let report = item
            .analysis()
            .ok_or_else(|| StageError::Fatal("score without analysis report".into()))?
            .clone();

        self.store
            .commit_stage(item.id, ItemStatus::Scoring, None, None, Utc::now())
            .await
            .map_err(store_err)?;

        let company = self
            .store
            .company_meta(&posting.company)
            .await
            .map_err(store_err)?;
        let tz_diff = timezone_diff_hours(
            &policies.prefilter.timezone,
            posting.location.as_deref(),
        );

        let mut breakdown = crate::scoring::adjust(
            report.base_score,
            &posting,
            &self.profile,
            company.as_ref(),
            tz_diff,
            &policies.matching,
            Utc::now(),
        );
        // Analyzer concerns ride along for the operator's audit.
        breakdown
            .potential_concerns
            .extend(report.concerns.iter().cloned());

        let matched = breakdown.final_score >= policies.matching.thresholds.medium;
        let next_status = if matched {
            ItemStatus::Matched
        } else {
            ItemStatus::Skipped
        };
        let summary = format!(
            "scored {:.1} (base {:.1}, {:?})",
            breakdown.final_score, breakdown.base_score, breakdown.application_priority
        );

        let updated = self
            .store
            .commit_stage(
                item.id,
                next_status,
                Some(StagePayload::Scored {
                    breakdown,
                    policy_version: version,
                }),
                Some(summary.clone()),
                Utc::now(),
            )
            .await
            .map_err(store_err)?;

        if matched {
            Ok(StepOutcome::Advance(updated))
        } else {
            counter!("jobscout_skipped_total").increment(1);
            let mut skipped = posting;
            skipped.status = PostingStatus::Skipped;
            self.store
                .save_posting(skipped)
                .await
                .map_err(store_err)?;
            Ok(StepOutcome::Done {
                status: ItemStatus::Skipped,
                message: summary,
            })
        }
    }

    async fn stage_persist(&self, item: &QueueItem) -> Result<StepOutcome, StageError> {
        let posting = item
            .posting()
            .ok_or_else(|| StageError::Fatal("persist without scraped posting".into()))?
            .clone();
        let (breakdown, _) = item
            .breakdown()
            .ok_or_else(|| StageError::Fatal("persist without score breakdown".into()))?;

        let mut matched = posting;
        matched.status = PostingStatus::Matched;
        self.store
            .save_posting(matched)
            .await
            .map_err(store_err)?;

        counter!("jobscout_matched_total").increment(1);
        let message = format!(
            "matched: score {:.1}, priority {:?}",
            breakdown.final_score, breakdown.application_priority
        );
        info!(target: "pipeline", item = %item.id, %message, "match persisted");
        Ok(StepOutcome::Done {
            status: ItemStatus::Success,
            message,
        })
    }
}

enum StepOutcome {
    Advance(QueueItem),
    Done { status: ItemStatus, message: String },
}

enum StageError {
    Recoverable(String),
    Fatal(String),
}

fn store_err(e: anyhow::Error) -> StageError {
    // Store trouble is transient by default; the coordinator escalates if
    // it keeps happening.
    StageError::Recoverable(format!("store error: {e}"))
}

/// Build a Posting from the submission's hints. Source-specific extraction
/// lives outside the core; whatever the submitter knew rides along here.
pub fn materialize_posting(sub: &crate::model::Submission, canonical_url: &str) -> Posting {
    let title = sub
        .title
        .as_deref()
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled role".to_string());
    let description = sub
        .description
        .as_deref()
        .map(normalize_text)
        .filter(|d| !d.is_empty());
    let company = sub
        .company
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| host_of(canonical_url).unwrap_or("unknown").to_string());

    let mut inference_text = title.clone();
    if let Some(loc) = &sub.location {
        inference_text.push(' ');
        inference_text.push_str(loc);
    }
    if let Some(d) = &description {
        inference_text.push(' ');
        inference_text.push_str(d);
    }

    Posting {
        url: sub.url.clone(),
        canonical_url: canonical_url.to_string(),
        title: title.clone(),
        company,
        location: sub.location.clone(),
        salary_range: sub.salary_range.clone(),
        description,
        posted_date: sub.posted_date,
        tech_stack: sub.tech_stack.clone(),
        work_arrangement: WorkArrangement::infer(&inference_text),
        employment_type: EmploymentType::infer(&inference_text),
        seniority: Seniority::infer_from_title(&title),
        status: PostingStatus::Pending,
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SalaryRange, Submission};

    fn sub() -> Submission {
        Submission {
            url: "https://jobs.example.com/l/42?utm_source=x".into(),
            company: None,
            title: Some("<b>Senior Rust Engineer</b>".into()),
            description: Some("Remote, full-time. Rust &amp; Postgres.".into()),
            location: Some("Berlin".into()),
            salary_range: Some(SalaryRange {
                min: Some(90_000),
                max: None,
                currency: Some("EUR".into()),
            }),
            posted_date: None,
            tech_stack: vec!["rust".into()],
            bypass_filter: false,
        }
    }

    #[test]
    fn materialize_normalizes_and_infers() {
        let p = materialize_posting(&sub(), "https://jobs.example.com/l/42");
        assert_eq!(p.title, "Senior Rust Engineer");
        assert_eq!(p.company, "jobs.example.com");
        assert_eq!(p.work_arrangement, Some(WorkArrangement::Remote));
        assert_eq!(p.employment_type, Some(EmploymentType::FullTime));
        assert_eq!(p.seniority, Some(Seniority::Senior));
        assert_eq!(p.description.as_deref(), Some("Remote, full-time. Rust & Postgres."));
    }

    #[test]
    fn materialize_tolerates_bare_submissions() {
        let bare = Submission {
            url: "https://a.test/x".into(),
            company: None,
            title: None,
            description: None,
            location: None,
            salary_range: None,
            posted_date: None,
            tech_stack: vec![],
            bypass_filter: false,
        };
        let p = materialize_posting(&bare, "https://a.test/x");
        assert_eq!(p.title, "Untitled role");
        assert_eq!(p.company, "a.test");
        assert_eq!(p.posted_date, None);
    }
}

//! analyzer.rs — the external base-score collaborator.
//!
//! The core treats the analyzer as an opaque, possibly slow, possibly
//! failing dependency: it hands over a posting and a profile, and gets a
//! base relevance score plus supporting evidence back. Timeouts and 5xx
//! responses surface as recoverable errors; the pipeline owns retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Posting, Profile};

/// Result returned by analyzer implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// 0–100 relevance of the posting to the profile.
    pub base_score: f64,
    #[serde(default)]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, posting: &Posting, profile: &Profile) -> Result<AnalysisReport>;
    /// Implementation name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynAnalyzer = Arc<dyn Analyzer>;

/// Factory: build an analyzer from the environment.
///
/// * `ANALYZER_MODE=mock` returns a deterministic mock.
/// * Otherwise `ANALYZER_URL` selects the HTTP analyzer; without it the
///   mock is used as a safe default for local runs.
pub fn build_analyzer() -> DynAnalyzer {
    let mode = std::env::var("ANALYZER_MODE").unwrap_or_default();
    if mode == "mock" {
        return Arc::new(MockAnalyzer::fixed(70.0));
    }
    match std::env::var("ANALYZER_URL") {
        Ok(url) if !url.is_empty() => Arc::new(HttpAnalyzer::new(&url)),
        _ => Arc::new(MockAnalyzer::fixed(70.0)),
    }
}

/* ----------------------------
HTTP analyzer
---------------------------- */

/// Calls an external scoring service: `POST {url}` with posting+profile,
/// expects an `AnalysisReport` JSON body.
pub struct HttpAnalyzer {
    http: reqwest::Client,
    url: String,
}

impl HttpAnalyzer {
    pub fn new(url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("jobscout/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            url: url.to_string(),
        }
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    posting: &'a Posting,
    profile: &'a Profile,
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, posting: &Posting, profile: &Profile) -> Result<AnalysisReport> {
        let resp = self
            .http
            .post(&self.url)
            .json(&AnalyzeRequest { posting, profile })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("analyzer returned {status}");
        }
        let mut report: AnalysisReport = resp.json().await?;
        report.base_score = report.base_score.clamp(0.0, 100.0);
        Ok(report)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/* ----------------------------
Mock analyzer (tests/local runs)
---------------------------- */

/// Deterministic analyzer with a call counter, so tests can assert the
/// pre-filter short-circuit ("analyzer call count is zero").
pub struct MockAnalyzer {
    base_score: f64,
    calls: AtomicUsize,
    /// When set, every call fails with a recoverable-looking error.
    pub fail: bool,
}

impl MockAnalyzer {
    pub fn fixed(base_score: f64) -> Self {
        Self {
            base_score,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            base_score: 0.0,
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, posting: &Posting, profile: &Profile) -> Result<AnalysisReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("mock analyzer unavailable (simulated 503)");
        }
        let haystack = posting.haystack();
        let matched: Vec<String> = profile
            .skills
            .iter()
            .filter(|s| haystack.contains(&s.to_ascii_lowercase()))
            .cloned()
            .collect();
        let missing: Vec<String> = profile
            .skills
            .iter()
            .filter(|s| !haystack.contains(&s.to_ascii_lowercase()))
            .cloned()
            .collect();
        Ok(AnalysisReport {
            base_score: self.base_score,
            matched_skills: matched,
            missing_skills: missing,
            reasons: vec![format!("fixed mock score {:.0}", self.base_score)],
            concerns: vec![],
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PostingStatus, Seniority};

    fn posting() -> Posting {
        Posting {
            url: "https://x.test/a".into(),
            canonical_url: "https://x.test/a".into(),
            title: "Senior Rust Engineer".into(),
            company: "Acme".into(),
            location: None,
            salary_range: None,
            description: Some("Rust and Postgres backend".into()),
            posted_date: None,
            tech_stack: vec![],
            work_arrangement: None,
            employment_type: None,
            seniority: None,
            status: PostingStatus::Pending,
        }
    }

    fn profile() -> Profile {
        Profile {
            name: "Alex".into(),
            seniority: Seniority::Senior,
            skills: vec!["rust".into(), "kubernetes".into()],
            years_experience: None,
        }
    }

    #[tokio::test]
    async fn mock_counts_calls_and_splits_skills() {
        let a = MockAnalyzer::fixed(80.0);
        assert_eq!(a.calls(), 0);
        let r = a.analyze(&posting(), &profile()).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(r.base_score, 80.0);
        assert_eq!(r.matched_skills, vec!["rust".to_string()]);
        assert_eq!(r.missing_skills, vec!["kubernetes".to_string()]);
    }

    #[tokio::test]
    async fn failing_mock_returns_error() {
        let a = MockAnalyzer::failing();
        assert!(a.analyze(&posting(), &profile()).await.is_err());
        assert_eq!(a.calls(), 1);
    }

    #[test]
    #[serial_test::serial]
    fn mock_mode_env_selects_the_mock() {
        std::env::set_var("ANALYZER_MODE", "mock");
        assert_eq!(build_analyzer().name(), "mock");
        std::env::remove_var("ANALYZER_MODE");
    }

    #[test]
    #[serial_test::serial]
    fn analyzer_url_selects_http() {
        std::env::remove_var("ANALYZER_MODE");
        std::env::set_var("ANALYZER_URL", "http://127.0.0.1:9/analyze");
        assert_eq!(build_analyzer().name(), "http");
        std::env::remove_var("ANALYZER_URL");
    }
}

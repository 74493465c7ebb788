//! model.rs — core domain records: postings, profiles, company metadata,
//! and the raw submission shape accepted by the ingestion surface.
//!
//! Everything here is plain data. Inference helpers (work arrangement,
//! seniority, timezone hints) are deliberately conservative: when the text
//! gives no signal we return `None` and let the engines treat the field as
//! "no strike / no adjustment" rather than guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the role expects people to show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkArrangement {
    Remote,
    Hybrid,
    Onsite,
}

impl WorkArrangement {
    /// Best-effort inference from free text (title + location + description).
    pub fn infer(text: &str) -> Option<Self> {
        let t = text.to_ascii_lowercase();
        if t.contains("remote") && !t.contains("no remote") && !t.contains("not remote") {
            return Some(Self::Remote);
        }
        if t.contains("hybrid") {
            return Some(Self::Hybrid);
        }
        if t.contains("on-site") || t.contains("onsite") || t.contains("in office")
            || t.contains("in-office")
        {
            return Some(Self::Onsite);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
}

impl EmploymentType {
    pub fn infer(text: &str) -> Option<Self> {
        let t = text.to_ascii_lowercase();
        if t.contains("intern") {
            return Some(Self::Internship);
        }
        if t.contains("part-time") || t.contains("part time") {
            return Some(Self::PartTime);
        }
        if t.contains("contract") || t.contains("freelance") || t.contains("b2b") {
            return Some(Self::Contract);
        }
        if t.contains("full-time") || t.contains("full time") || t.contains("permanent") {
            return Some(Self::FullTime);
        }
        None
    }
}

/// Ordered seniority ladder; `rank` gives a numeric distance for alignment
/// deltas in the score adjustment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Junior,
    Mid,
    Senior,
    Staff,
    Principal,
}

impl Seniority {
    pub fn rank(self) -> i32 {
        match self {
            Self::Junior => 0,
            Self::Mid => 1,
            Self::Senior => 2,
            Self::Staff => 3,
            Self::Principal => 4,
        }
    }

    /// Infer from a job title. Checks the most senior markers first so that
    /// "Senior Staff Engineer" lands on Staff, not Senior.
    pub fn infer_from_title(title: &str) -> Option<Self> {
        let t = title.to_ascii_lowercase();
        if t.contains("principal") || t.contains("distinguished") {
            return Some(Self::Principal);
        }
        if t.contains("staff") {
            return Some(Self::Staff);
        }
        if t.contains("senior") || t.contains("sr.") || t.contains("sr ") || t.contains("lead") {
            return Some(Self::Senior);
        }
        if t.contains("junior") || t.contains("jr.") || t.contains("jr ")
            || t.contains("entry level") || t.contains("entry-level") || t.contains("graduate")
        {
            return Some(Self::Junior);
        }
        if t.contains("mid-level") || t.contains("mid level") || t.contains("intermediate") {
            return Some(Self::Mid);
        }
        None
    }
}

/// Posting lifecycle, owned by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Pending,
    Filtered,
    Analyzing,
    Analyzed,
    Skipped,
    Matched,
}

/// Annual salary range, as advertised. Either bound may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SalaryRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl SalaryRange {
    /// Upper bound used for floor checks; falls back to `min` when the
    /// posting only advertises a single figure.
    pub fn ceiling(&self) -> Option<u32> {
        self.max.or(self.min)
    }
}

/// Canonical representation of one job opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Raw URL as submitted.
    pub url: String,
    /// Normalized identity key (see `dedup::normalize_url`).
    pub canonical_url: String,
    pub title: String,
    pub company: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_range: Option<SalaryRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_arrangement: Option<WorkArrangement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employment_type: Option<EmploymentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seniority: Option<Seniority>,
    pub status: PostingStatus,
}

impl Posting {
    /// All searchable text in one lowercase haystack: title, location,
    /// description, tech stack. Used by the pre-filter keyword rules.
    pub fn haystack(&self) -> String {
        let mut s = String::new();
        s.push_str(&self.title);
        s.push(' ');
        if let Some(loc) = &self.location {
            s.push_str(loc);
            s.push(' ');
        }
        if let Some(d) = &self.description {
            s.push_str(d);
            s.push(' ');
        }
        for t in &self.tech_stack {
            s.push_str(t);
            s.push(' ');
        }
        s.to_ascii_lowercase()
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.posted_date.map(|d| (now - d).num_days())
    }
}

/// The user we match against. Supplied as configuration; read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub seniority: Seniority,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub years_experience: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySize {
    Seed,
    Startup,
    Mid,
    Large,
    Enterprise,
}

/// What we know about the employer, gathered by external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompanyMeta {
    pub name: String,
    #[serde(default)]
    pub remote_first: bool,
    /// Business domains, e.g. ["fintech", "devtools"].
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<CompanySize>,
}

/// Raw ingestion payload. Only `url` is required; the rest are hints that
/// the scrape stage folds into the Posting when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub url: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary_range: Option<SalaryRange>,
    #[serde(default)]
    pub posted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Escape hatch: skip the pre-filter engine, never dedup or scoring.
    #[serde(default)]
    pub bypass_filter: bool,
}

/// Normalize scraped text: decode HTML entities, strip tags, fold curly
/// quotes to ASCII, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 8000 chars (job descriptions run long)
    if out.chars().count() > 8000 {
        out = out.chars().take(8000).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "<p>Senior&nbsp;Rust Engineer</p>  <b>remote</b>";
        assert_eq!(normalize_text(s), "Senior Rust Engineer remote");
    }

    #[test]
    fn seniority_most_senior_marker_wins() {
        assert_eq!(
            Seniority::infer_from_title("Senior Staff Engineer"),
            Some(Seniority::Staff)
        );
        assert_eq!(
            Seniority::infer_from_title("Jr. Backend Developer"),
            Some(Seniority::Junior)
        );
        assert_eq!(Seniority::infer_from_title("Backend Developer"), None);
    }

    #[test]
    fn work_arrangement_negations_do_not_match_remote() {
        assert_eq!(
            WorkArrangement::infer("Onsite role, no remote option"),
            Some(WorkArrangement::Onsite)
        );
        assert_eq!(WorkArrangement::infer("no remote work"), None);
        assert_eq!(
            WorkArrangement::infer("Fully remote, EU timezones"),
            Some(WorkArrangement::Remote)
        );
    }

    #[test]
    fn salary_ceiling_prefers_max() {
        let r = SalaryRange {
            min: Some(90_000),
            max: Some(130_000),
            currency: None,
        };
        assert_eq!(r.ceiling(), Some(130_000));
        let single = SalaryRange {
            min: Some(100_000),
            max: None,
            currency: None,
        };
        assert_eq!(single.ceiling(), Some(100_000));
    }
}

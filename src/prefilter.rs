//! # Pre-Filter (Strike) Engine
//! Pure, testable logic that maps `(posting, policy)` → pass/filtered before
//! any expensive analysis runs. No I/O, safe to call concurrently.
//!
//! Model: individual rule violations contribute weighted strikes; the
//! posting fails once accumulated weight crosses the policy threshold.
//! Some violations are hard — immediate reject regardless of weight
//! (staleness past the age window, hard-excluded keywords, and a
//! disallowed arrangement beyond the timezone limit with relocation off).
//! Missing optional posting data is "no strike", never a fault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Posting;
use crate::policy::{timezone_diff_hours, PrefilterPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Filtered,
}

/// One rule violation. `hard` strikes reject on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    pub rule: String,
    pub weight: f64,
    pub detail: String,
    pub hard: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefilterOutcome {
    pub verdict: Verdict,
    pub strikes: Vec<Strike>,
    pub total_weight: f64,
    /// Reason string of the first hard strike, when one fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_reject: Option<String>,
}

impl PrefilterOutcome {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// One-line operator summary, e.g. for `result_message`.
    pub fn summary(&self) -> String {
        match (&self.verdict, &self.hard_reject) {
            (Verdict::Pass, _) => format!(
                "prefilter pass ({} strikes, weight {:.1})",
                self.strikes.len(),
                self.total_weight
            ),
            (Verdict::Filtered, Some(hard)) => format!("prefilter hard reject: {hard}"),
            (Verdict::Filtered, None) => format!(
                "prefilter reject: strike weight {:.1} over threshold",
                self.total_weight
            ),
        }
    }
}

/// Fuzzy containment for title keywords: substring first, then
/// Jaro-Winkler against individual title tokens (handles "engineeer").
fn title_matches_keyword(title_lower: &str, keyword: &str) -> bool {
    let kw = keyword.to_ascii_lowercase();
    if title_lower.contains(&kw) {
        return true;
    }
    title_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .any(|tok| strsim::jaro_winkler(tok, &kw) >= 0.92)
}

/// Evaluate a posting against the pre-filter policy. Total and
/// side-effect-free; `now` is passed in so callers stay deterministic.
pub fn evaluate(posting: &Posting, policy: &PrefilterPolicy, now: DateTime<Utc>) -> PrefilterOutcome {
    let mut strikes: Vec<Strike> = Vec::new();
    let haystack = posting.haystack();
    let title_lower = posting.title.to_ascii_lowercase();

    // 1) Required title keywords (any-of). Empty list = rule off.
    if !policy.keywords.required_any.is_empty() {
        let hit = policy
            .keywords
            .required_any
            .iter()
            .any(|kw| title_matches_keyword(&title_lower, kw));
        if !hit {
            strikes.push(Strike {
                rule: "missing_required_keyword".into(),
                weight: policy.weights.missing_required_keyword,
                detail: format!(
                    "title matches none of [{}]",
                    policy.keywords.required_any.join(", ")
                ),
                hard: false,
            });
        }
    }

    // 2) Excluded keywords (soft), hard-excluded keywords (immediate).
    for kw in &policy.keywords.excluded {
        if haystack.contains(&kw.to_ascii_lowercase()) {
            strikes.push(Strike {
                rule: "excluded_keyword".into(),
                weight: policy.weights.excluded_keyword,
                detail: format!("contains excluded keyword \"{kw}\""),
                hard: false,
            });
        }
    }
    for kw in &policy.keywords.excluded_hard {
        if haystack.contains(&kw.to_ascii_lowercase()) {
            strikes.push(Strike {
                rule: "excluded_keyword_hard".into(),
                weight: policy.weights.excluded_keyword,
                detail: format!("contains hard-excluded keyword \"{kw}\""),
                hard: true,
            });
        }
    }

    // 3) Staleness. Hard: analyzing a posting past the age window is wasted
    // work no matter what else it scores. Unknown date = no strike.
    if let Some(age) = posting.age_days(now) {
        if age > policy.prefilter.max_age_days {
            strikes.push(Strike {
                rule: "stale_posting".into(),
                weight: policy.weights.stale_posting,
                detail: format!(
                    "posted {age} days ago (max {})",
                    policy.prefilter.max_age_days
                ),
                hard: true,
            });
        }
    }

    // 4) Work arrangement + timezone.
    let diff = timezone_diff_hours(&policy.timezone, posting.location.as_deref());

    if let Some(arr) = posting.work_arrangement {
        use crate::model::WorkArrangement::*;
        let allowed = match arr {
            Remote => policy.work.remote_ok,
            Hybrid => policy.work.hybrid_ok,
            Onsite => policy.work.onsite_ok,
        };
        if !allowed {
            // Hard when there is no way to make the role work: relocation is
            // off and the posting sits beyond the timezone limit.
            let beyond_tz = diff.map(|d| d > policy.timezone.max_diff_hours).unwrap_or(false);
            let hard = !policy.work.relocation_ok && beyond_tz;
            strikes.push(Strike {
                rule: "work_arrangement".into(),
                weight: policy.weights.work_arrangement,
                detail: format!("{arr:?} arrangement not allowed by policy"),
                hard,
            });
        }
    }

    if let Some(d) = diff {
        if d > 0.0 {
            let over_limit = d > policy.timezone.max_diff_hours;
            let hard = over_limit && !policy.work.relocation_ok;
            strikes.push(Strike {
                rule: "timezone_diff".into(),
                weight: policy.timezone.per_hour_strike * d,
                detail: format!(
                    "{d:.1}h timezone difference (limit {:.1}h)",
                    policy.timezone.max_diff_hours
                ),
                hard,
            });
        }
    }

    // 5) Employment type. Empty allow-list = rule off.
    if let Some(et) = posting.employment_type {
        if !policy.employment.allowed.is_empty() && !policy.employment.allowed.contains(&et) {
            strikes.push(Strike {
                rule: "employment_type".into(),
                weight: policy.weights.employment_type,
                detail: format!("{et:?} not in allowed employment types"),
                hard: false,
            });
        }
    }

    // 6) Salary floor, checked against the advertised ceiling only when a
    // range is present at all.
    if let (Some(floor), Some(range)) = (policy.salary.floor, posting.salary_range.as_ref()) {
        if let Some(ceiling) = range.ceiling() {
            if ceiling < floor {
                strikes.push(Strike {
                    rule: "salary_below_floor".into(),
                    weight: policy.weights.salary_below_floor,
                    detail: format!("advertised ceiling {ceiling} below floor {floor}"),
                    hard: false,
                });
            }
        }
    }

    // 7) Rejected technologies.
    for tech in &policy.tech.rejected {
        if haystack.contains(&tech.to_ascii_lowercase()) {
            strikes.push(Strike {
                rule: "rejected_tech".into(),
                weight: policy.weights.rejected_tech,
                detail: format!("uses rejected technology \"{tech}\""),
                hard: false,
            });
        }
    }

    let total_weight: f64 = strikes.iter().map(|s| s.weight).sum();
    let hard_reject = strikes.iter().find(|s| s.hard).map(|s| s.detail.clone());
    let verdict = if hard_reject.is_some() || total_weight >= policy.prefilter.strike_threshold {
        Verdict::Filtered
    } else {
        Verdict::Pass
    };

    PrefilterOutcome {
        verdict,
        strikes,
        total_weight,
        hard_reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PostingStatus, SalaryRange, WorkArrangement};
    use chrono::Duration;

    // Minimal, deterministic policy used only for tests.
    const TEST_TOML: &str = r#"
[prefilter]
strike_threshold = 6.0
max_age_days = 30

[keywords]
required_any = ["engineer", "developer"]
excluded = ["unpaid"]
excluded_hard = ["gambling"]

[work]
remote_ok = true
hybrid_ok = false
onsite_ok = false
relocation_ok = false

[timezone]
user_offset_hours = 1.0
max_diff_hours = 10.0
per_hour_strike = 0.5

[timezone.locations]
"berlin" = 1.0
"new york" = -5.0
"sydney" = 10.0
"san francisco" = -8.0

[employment]
allowed = ["full_time", "contract"]

[salary]
floor = 80000

[tech]
rejected = ["php"]
"#;

    fn policy() -> PrefilterPolicy {
        PrefilterPolicy::from_toml_str(TEST_TOML).expect("load test policy")
    }

    fn posting(title: &str) -> Posting {
        Posting {
            url: "https://jobs.example.com/1".into(),
            canonical_url: "https://jobs.example.com/1".into(),
            title: title.into(),
            company: "Acme".into(),
            location: Some("Berlin, Germany".into()),
            salary_range: None,
            description: None,
            posted_date: Some(Utc::now()),
            tech_stack: vec![],
            work_arrangement: Some(WorkArrangement::Remote),
            employment_type: Some(crate::model::EmploymentType::FullTime),
            seniority: None,
            status: PostingStatus::Pending,
        }
    }

    #[test]
    fn clean_posting_passes() {
        let out = evaluate(&posting("Senior Rust Engineer"), &policy(), Utc::now());
        assert!(out.passed(), "expected pass, got {out:?}");
        assert_eq!(out.hard_reject, None);
    }

    #[test]
    fn stale_posting_is_a_hard_reject_even_alone() {
        let mut p = posting("Senior Rust Engineer");
        p.posted_date = Some(Utc::now() - Duration::days(45));
        let out = evaluate(&p, &policy(), Utc::now());
        assert_eq!(out.verdict, Verdict::Filtered);
        assert!(out.hard_reject.is_some());
        assert!(out.strikes.iter().any(|s| s.rule == "stale_posting" && s.hard));
    }

    #[test]
    fn missing_posted_date_is_no_strike() {
        let mut p = posting("Senior Rust Engineer");
        p.posted_date = None;
        let out = evaluate(&p, &policy(), Utc::now());
        assert!(out.strikes.iter().all(|s| s.rule != "stale_posting"));
    }

    #[test]
    fn hard_excluded_keyword_rejects_immediately() {
        let mut p = posting("Senior Rust Engineer");
        p.description = Some("Work on our gambling platform".into());
        let out = evaluate(&p, &policy(), Utc::now());
        assert_eq!(out.verdict, Verdict::Filtered);
        assert!(out.hard_reject.unwrap().contains("gambling"));
    }

    #[test]
    fn soft_strikes_accumulate_to_threshold() {
        let mut p = posting("Senior Rust Engineer");
        // unpaid (3.0) + php (2.5) + salary below floor (3.0) = 8.5 >= 6.0
        p.description = Some("Initially unpaid trial period. Stack: PHP.".into());
        p.salary_range = Some(SalaryRange {
            min: Some(40_000),
            max: Some(60_000),
            currency: None,
        });
        let out = evaluate(&p, &policy(), Utc::now());
        assert_eq!(out.verdict, Verdict::Filtered);
        assert_eq!(out.hard_reject, None, "soft rejects carry no hard reason");
        assert!(out.total_weight >= 6.0);
    }

    #[test]
    fn single_soft_strike_passes() {
        let mut p = posting("Senior Rust Engineer");
        p.tech_stack = vec!["php".into()];
        let out = evaluate(&p, &policy(), Utc::now());
        assert!(out.passed());
        assert_eq!(out.strikes.len(), 1);
    }

    #[test]
    fn onsite_beyond_timezone_limit_is_hard_without_relocation() {
        let mut p = posting("Senior Rust Engineer");
        p.location = Some("Sydney, Australia (UTC+12)".into());
        p.work_arrangement = Some(WorkArrangement::Onsite);
        let out = evaluate(&p, &policy(), Utc::now());
        assert_eq!(out.verdict, Verdict::Filtered);
        assert!(out.strikes.iter().any(|s| s.rule == "work_arrangement" && s.hard));
    }

    #[test]
    fn timezone_within_limit_is_soft() {
        let mut p = posting("Senior Rust Engineer");
        p.location = Some("New York, NY".into()); // 6h from UTC+1
        let out = evaluate(&p, &policy(), Utc::now());
        let tz = out
            .strikes
            .iter()
            .find(|s| s.rule == "timezone_diff")
            .expect("timezone strike present");
        assert!(!tz.hard);
        assert!((tz.weight - 3.0).abs() < 1e-9); // 0.5/h * 6h
        assert!(out.passed());
    }

    #[test]
    fn fuzzy_title_keyword_tolerates_typos() {
        let out = evaluate(&posting("Senior Rust Engineeer"), &policy(), Utc::now());
        assert!(out
            .strikes
            .iter()
            .all(|s| s.rule != "missing_required_keyword"));
    }

    #[test]
    fn missing_required_keyword_strikes() {
        let out = evaluate(&posting("Head of Marketing"), &policy(), Utc::now());
        assert!(out
            .strikes
            .iter()
            .any(|s| s.rule == "missing_required_keyword"));
    }
}

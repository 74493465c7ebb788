//! # Score Adjustment Engine
//! Pure, testable logic that maps `(base score, posting, profile, company
//! metadata, match policy)` → `ScoreBreakdown`. No I/O, safe to call
//! concurrently across items.
//!
//! Adjustments apply in a fixed order so results are reproducible and
//! explainable: dealbreakers → timezone → company weights → freshness →
//! seniority → skill overlap → clamp → priority tier. Every rule that was
//! evaluated and relevant appends a human-readable line, even at delta 0,
//! so operators can audit "why wasn't this adjusted".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CompanyMeta, Posting, Profile, Seniority};
use crate::policy::MatchPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// One audited score change: human-readable label plus the signed delta
/// that was actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub label: String,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base_score: f64,
    pub final_score: f64,
    pub adjustments: Vec<Adjustment>,
    pub potential_concerns: Vec<String>,
    pub application_priority: Priority,
}

/// Running state while adjustments are applied. A "locked" dealbreaker
/// suppresses any later positive delta (the line is still recorded at 0).
struct Tally {
    score: f64,
    locked: bool,
    adjustments: Vec<Adjustment>,
    concerns: Vec<String>,
}

impl Tally {
    fn apply(&mut self, delta: f64, label: String) {
        let (applied, label) = if self.locked && delta > 0.0 {
            (0.0, format!("{label} [suppressed by locked dealbreaker]"))
        } else {
            (delta, label)
        };
        self.score += applied;
        self.adjustments.push(Adjustment {
            label,
            delta: applied,
        });
    }
}

fn fmt_delta(d: f64) -> String {
    if d >= 0.0 {
        format!("+{d:.1}")
    } else {
        format!("{d:.1}")
    }
}

/// Apply the match policy's adjustments to an externally supplied base
/// score. `tz_diff_hours` is the pre-computed absolute hour difference
/// between the user and the posting's inferred timezone (None = unknown
/// location, rule not relevant).
pub fn adjust(
    base_score: f64,
    posting: &Posting,
    profile: &Profile,
    company: Option<&CompanyMeta>,
    tz_diff_hours: Option<f64>,
    policy: &MatchPolicy,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let base = base_score.clamp(0.0, 100.0);
    let mut t = Tally {
        score: base,
        locked: false,
        adjustments: Vec::new(),
        concerns: Vec::new(),
    };
    let haystack = posting.haystack();
    let mut dealbreaker_fired = false;

    // 2) Dealbreakers: hard policy violations not already caught upstream.
    for kw in &policy.dealbreakers.keywords {
        if haystack.contains(&kw.to_ascii_lowercase()) {
            dealbreaker_fired = true;
            let locked = policy
                .dealbreakers
                .locked
                .iter()
                .any(|l| l.eq_ignore_ascii_case(kw));
            if locked {
                t.locked = true;
            }
            let delta = -policy.dealbreakers.penalty;
            t.concerns.push(format!("Dealbreaker: \"{kw}\""));
            t.apply(
                delta,
                format!(
                    "Dealbreaker \"{kw}\": {}{}",
                    fmt_delta(delta),
                    if locked { " [locked]" } else { "" }
                ),
            );
        }
    }

    // 3) Timezone.
    if let Some(d) = tz_diff_hours {
        let delta = if d > policy.timezone.max_diff_hours {
            policy.timezone.hard_reject_penalty
        } else {
            -(policy.timezone.per_hour_penalty * d)
        };
        let over = if d > policy.timezone.max_diff_hours {
            ", over limit"
        } else {
            ""
        };
        t.apply(
            delta,
            format!("Timezone penalty: {} ({d:.0}h difference{over})", fmt_delta(delta)),
        );
        if d > policy.timezone.max_diff_hours {
            t.concerns
                .push(format!("Timezone difference {d:.0}h exceeds working limit"));
        }
    }

    // 4) Company weights: independent additive deltas, each its own cap.
    if let Some(meta) = company {
        let cw = &policy.company;

        let rf = if meta.remote_first { cw.remote_first_bonus } else { 0.0 };
        t.apply(
            rf,
            format!("Remote-first company: {}", fmt_delta(rf)),
        );

        let focus_hit = meta.domains.iter().any(|d| {
            cw.focus_domains
                .iter()
                .any(|f| f.eq_ignore_ascii_case(d))
        });
        let df = if focus_hit { cw.domain_focus_bonus } else { 0.0 };
        t.apply(df, format!("Domain focus: {}", fmt_delta(df)));

        if let Some(size) = meta.size {
            let sd = cw.size_adjustments.get(&size).copied().unwrap_or(0.0);
            t.apply(sd, format!("Company size {size:?}: {}", fmt_delta(sd)));
        }

        let prio_hit = cw
            .priority
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&meta.name));
        if prio_hit {
            t.apply(
                cw.priority_bonus,
                format!(
                    "Priority company \"{}\": {}",
                    meta.name,
                    fmt_delta(cw.priority_bonus)
                ),
            );
        }
    }

    // 5) Freshness decay past the grace window.
    if let Some(age) = posting.age_days(now) {
        let f = &policy.freshness;
        let delta = if age > f.grace_days {
            -((age - f.grace_days) as f64 * f.per_day_penalty).min(f.max_penalty)
        } else {
            0.0
        };
        let note = if age > f.grace_days {
            format!("{age} days old, grace {}", f.grace_days)
        } else {
            format!("{age} days old, within grace window")
        };
        t.apply(delta, format!("Freshness: {} ({note})", fmt_delta(delta)));
    }

    // 6) Seniority alignment (posting's explicit level, else title inference).
    let posting_seniority = posting
        .seniority
        .or_else(|| Seniority::infer_from_title(&posting.title));
    if let Some(ps) = posting_seniority {
        let s = &policy.seniority;
        let gap = (ps.rank() - profile.seniority.rank()).abs();
        if gap == 0 {
            t.apply(
                s.exact_match_bonus,
                format!(
                    "Seniority match ({ps:?}): {}",
                    fmt_delta(s.exact_match_bonus)
                ),
            );
        } else {
            let delta = -(gap as f64 * s.per_level_gap_penalty).min(s.max_penalty);
            t.apply(
                delta,
                format!(
                    "Seniority gap {gap} ({ps:?} vs {:?}): {}",
                    profile.seniority,
                    fmt_delta(delta)
                ),
            );
        }
    }

    // 7) Skill overlap between the profile and the posting text.
    if !profile.skills.is_empty() {
        let sk = &policy.skills;
        let matched = profile
            .skills
            .iter()
            .filter(|s| haystack.contains(&s.to_ascii_lowercase()))
            .count();
        let delta = (matched as f64 * sk.per_skill_bonus).min(sk.max_bonus);
        t.apply(
            delta,
            format!("Skill overlap ({matched} matched): {}", fmt_delta(delta)),
        );
    }

    // 8) Clamp + priority tier. A fired dealbreaker can never yield High.
    let final_score = t.score.clamp(0.0, 100.0);
    let th = &policy.thresholds;
    let mut priority = if final_score >= th.high {
        Priority::High
    } else if final_score >= th.medium {
        Priority::Medium
    } else {
        Priority::Low
    };
    if dealbreaker_fired && priority == Priority::High {
        priority = Priority::Medium;
    }

    ScoreBreakdown {
        base_score: base,
        final_score,
        adjustments: t.adjustments,
        potential_concerns: t.concerns,
        application_priority: priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompanySize, PostingStatus};

    const TEST_TOML: &str = r#"
[thresholds]
high = 85.0
medium = 60.0

[timezone]
per_hour_penalty = 2.0
max_diff_hours = 10.0
hard_reject_penalty = -40.0

[company]
remote_first_bonus = 5.0
domain_focus_bonus = 4.0
focus_domains = ["devtools"]
priority = ["Ferrous Systems"]
priority_bonus = 6.0

[company.size_adjustments]
startup = 2.0
enterprise = -2.0

[freshness]
grace_days = 7
per_day_penalty = 0.5
max_penalty = 15.0

[seniority]
per_level_gap_penalty = 4.0
max_penalty = 12.0
exact_match_bonus = 2.0

[skills]
per_skill_bonus = 1.0
max_bonus = 8.0

[dealbreakers]
keywords = ["clearance required", "gambling"]
locked = ["gambling"]
penalty = 50.0
"#;

    fn policy() -> MatchPolicy {
        MatchPolicy::from_toml_str(TEST_TOML).expect("load test policy")
    }

    fn profile() -> Profile {
        Profile {
            name: "Alex".into(),
            seniority: Seniority::Senior,
            skills: vec!["rust".into(), "postgres".into()],
            years_experience: Some(8),
        }
    }

    fn posting() -> Posting {
        Posting {
            url: "https://jobs.example.com/1".into(),
            canonical_url: "https://jobs.example.com/1".into(),
            title: "Senior Rust Engineer".into(),
            company: "Acme".into(),
            location: None,
            salary_range: None,
            description: None,
            posted_date: Some(Utc::now()),
            tech_stack: vec!["rust".into()],
            work_arrangement: None,
            employment_type: None,
            seniority: Some(Seniority::Senior),
            status: PostingStatus::Pending,
        }
    }

    /// The reference scenario: base 80, 9h diff, -2/h, limit 10h → 62 → Medium.
    #[test]
    fn timezone_scenario_lands_on_medium() {
        let mut p = posting();
        // Neutralize the other rules so the arithmetic stays visible.
        p.seniority = None;
        p.title = "Rust person".into();
        p.posted_date = None;
        let prof = Profile {
            skills: vec![],
            ..profile()
        };
        let out = adjust(80.0, &p, &prof, None, Some(9.0), &policy(), Utc::now());
        assert!((out.final_score - 62.0).abs() < 1e-9, "got {}", out.final_score);
        assert_eq!(out.application_priority, Priority::Medium);
        assert!(out
            .adjustments
            .iter()
            .any(|a| a.label.contains("Timezone penalty: -18.0 (9h difference)")));
    }

    #[test]
    fn over_limit_timezone_floors_at_hard_penalty() {
        let out = adjust(90.0, &posting(), &profile(), None, Some(12.0), &policy(), Utc::now());
        let tz = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Timezone"))
            .unwrap();
        assert_eq!(tz.delta, -40.0);
        assert!(!out.potential_concerns.is_empty());
    }

    #[test]
    fn final_score_is_always_clamped() {
        for base in [-50.0, 0.0, 50.0, 100.0, 500.0] {
            let out = adjust(base, &posting(), &profile(), None, Some(24.0), &policy(), Utc::now());
            assert!((0.0..=100.0).contains(&out.final_score), "base {base}");
        }
        // Bonuses cannot push past 100 either.
        let meta = CompanyMeta {
            name: "Ferrous Systems".into(),
            remote_first: true,
            domains: vec!["devtools".into()],
            size: Some(CompanySize::Startup),
        };
        let out = adjust(100.0, &posting(), &profile(), Some(&meta), None, &policy(), Utc::now());
        assert!(out.final_score <= 100.0);
    }

    #[test]
    fn dealbreaker_never_yields_high_priority() {
        let mut p = posting();
        p.description = Some("Active TS/SCI clearance required.".into());
        let meta = CompanyMeta {
            name: "Ferrous Systems".into(),
            remote_first: true,
            domains: vec!["devtools".into()],
            size: Some(CompanySize::Startup),
        };
        let out = adjust(100.0, &p, &profile(), Some(&meta), None, &policy(), Utc::now());
        assert_ne!(out.application_priority, Priority::High);
        assert!(out
            .potential_concerns
            .iter()
            .any(|c| c.contains("clearance required")));
    }

    #[test]
    fn locked_dealbreaker_suppresses_positive_adjustments() {
        let mut p = posting();
        p.description = Some("Backend for a gambling product".into());
        let meta = CompanyMeta {
            name: "Ferrous Systems".into(),
            remote_first: true,
            domains: vec![],
            size: None,
        };
        let out = adjust(90.0, &p, &profile(), Some(&meta), None, &policy(), Utc::now());
        let rf = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Remote-first"))
            .unwrap();
        assert_eq!(rf.delta, 0.0);
        assert!(rf.label.contains("suppressed"));
        // Negative adjustments still apply under lock.
        assert!(out.final_score < 90.0 - 40.0);
    }

    #[test]
    fn zero_delta_rules_still_leave_an_audit_line() {
        let out = adjust(70.0, &posting(), &profile(), None, Some(0.0), &policy(), Utc::now());
        let tz = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Timezone"))
            .unwrap();
        assert_eq!(tz.delta, 0.0);
        let fresh = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Freshness"))
            .unwrap();
        assert_eq!(fresh.delta, 0.0);
        assert!(fresh.label.contains("within grace window"));
    }

    #[test]
    fn freshness_decay_is_capped() {
        let mut p = posting();
        p.posted_date = Some(Utc::now() - chrono::Duration::days(200));
        let out = adjust(80.0, &p, &profile(), None, None, &policy(), Utc::now());
        let fresh = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Freshness"))
            .unwrap();
        assert_eq!(fresh.delta, -15.0);
    }

    #[test]
    fn seniority_gap_penalizes_per_level() {
        let mut p = posting();
        p.seniority = Some(Seniority::Junior); // 2 levels from Senior
        p.title = "Coder".into();
        let out = adjust(80.0, &p, &profile(), None, None, &policy(), Utc::now());
        let s = out
            .adjustments
            .iter()
            .find(|a| a.label.contains("Seniority gap"))
            .unwrap();
        assert_eq!(s.delta, -8.0);
    }
}

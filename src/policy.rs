//! policy.rs — versioned policy documents consumed by the pure engines:
//! the pre-filter (strike) policy and the match (score adjustment) policy.
//!
//! Policies are read-only inputs. The pipeline snapshots the current
//! `PolicySet` once at the start of each item run, so a single item's
//! journey is internally consistent even if an operator reloads mid-flight.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tracing::info;

// --- env defaults & names ---
pub const DEFAULT_PREFILTER_CONFIG_PATH: &str = "config/prefilter.toml";
pub const DEFAULT_MATCH_CONFIG_PATH: &str = "config/match.toml";

pub const ENV_PREFILTER_CONFIG_PATH: &str = "PREFILTER_CONFIG_PATH";
pub const ENV_MATCH_CONFIG_PATH: &str = "MATCH_CONFIG_PATH";

/* ----------------------------
Pre-filter policy schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct PrefilterPolicy {
    #[serde(default = "default_version")]
    pub version: u32,
    pub prefilter: PrefilterSection,
    #[serde(default)]
    pub keywords: KeywordRules,
    #[serde(default)]
    pub work: WorkRules,
    pub timezone: TimezoneRules,
    #[serde(default)]
    pub employment: EmploymentRules,
    #[serde(default)]
    pub salary: SalaryRules,
    #[serde(default)]
    pub tech: TechRules,
    #[serde(default)]
    pub weights: StrikeWeights,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrefilterSection {
    /// Accumulated soft-strike weight at or above this rejects the posting.
    pub strike_threshold: f64,
    /// Postings older than this many days take a staleness strike.
    pub max_age_days: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordRules {
    /// Title must fuzzily contain at least one of these (empty = rule off).
    #[serde(default)]
    pub required_any: Vec<String>,
    /// Soft-strike keywords anywhere in the posting text.
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Immediate reject keywords, regardless of accumulated weight.
    #[serde(default)]
    pub excluded_hard: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkRules {
    pub remote_ok: bool,
    pub hybrid_ok: bool,
    pub onsite_ok: bool,
    /// When false, a disallowed arrangement beyond the timezone hard limit
    /// is a hard reject (there is no way to make the role work).
    pub relocation_ok: bool,
}

impl Default for WorkRules {
    fn default() -> Self {
        Self {
            remote_ok: true,
            hybrid_ok: true,
            onsite_ok: true,
            relocation_ok: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneRules {
    /// The user's UTC offset in hours.
    pub user_offset_hours: f64,
    /// Absolute hour difference above this is a hard reject.
    pub max_diff_hours: f64,
    /// Soft strike weight applied per hour of difference.
    pub per_hour_strike: f64,
    /// Location keyword -> UTC offset hours. Lowercase keys.
    #[serde(default)]
    pub locations: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmploymentRules {
    /// Allowed employment types (empty = rule off).
    #[serde(default)]
    pub allowed: Vec<crate::model::EmploymentType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SalaryRules {
    /// Reject-below floor on the advertised ceiling. Absent = rule off.
    #[serde(default)]
    pub floor: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TechRules {
    /// Technologies the user refuses to work with.
    #[serde(default)]
    pub rejected: Vec<String>,
}

/// Per-rule strike weights. Policy data, not algorithm constants; the
/// defaults are illustrative.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrikeWeights {
    pub missing_required_keyword: f64,
    pub excluded_keyword: f64,
    pub stale_posting: f64,
    pub work_arrangement: f64,
    pub employment_type: f64,
    pub salary_below_floor: f64,
    pub rejected_tech: f64,
}

impl Default for StrikeWeights {
    fn default() -> Self {
        Self {
            missing_required_keyword: 2.0,
            excluded_keyword: 3.0,
            stale_posting: 2.0,
            work_arrangement: 3.0,
            employment_type: 2.0,
            salary_below_floor: 3.0,
            rejected_tech: 2.5,
        }
    }
}

/* ----------------------------
Match policy schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct MatchPolicy {
    #[serde(default = "default_version")]
    pub version: u32,
    pub thresholds: PriorityThresholds,
    pub timezone: TimezonePenalty,
    #[serde(default)]
    pub company: CompanyWeights,
    #[serde(default)]
    pub freshness: FreshnessDecay,
    #[serde(default)]
    pub seniority: SeniorityAlignment,
    #[serde(default)]
    pub skills: SkillMatch,
    #[serde(default)]
    pub dealbreakers: Dealbreakers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriorityThresholds {
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimezonePenalty {
    /// Points subtracted per hour of timezone difference.
    pub per_hour_penalty: f64,
    /// Beyond this the penalty floors at `hard_reject_penalty`.
    pub max_diff_hours: f64,
    /// Negative delta applied when the diff exceeds `max_diff_hours`.
    pub hard_reject_penalty: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompanyWeights {
    pub remote_first_bonus: f64,
    pub domain_focus_bonus: f64,
    /// Business domains the user cares about (lowercase).
    pub focus_domains: Vec<String>,
    /// Named companies worth an extra look.
    pub priority: Vec<String>,
    pub priority_bonus: f64,
    /// Size tier -> signed delta.
    pub size_adjustments: HashMap<crate::model::CompanySize, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FreshnessDecay {
    /// No decay inside the grace window.
    pub grace_days: i64,
    pub per_day_penalty: f64,
    pub max_penalty: f64,
}

impl Default for FreshnessDecay {
    fn default() -> Self {
        Self {
            grace_days: 7,
            per_day_penalty: 0.5,
            max_penalty: 15.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeniorityAlignment {
    pub per_level_gap_penalty: f64,
    pub max_penalty: f64,
    /// Small bonus when the posting matches the profile level exactly.
    pub exact_match_bonus: f64,
}

impl Default for SeniorityAlignment {
    fn default() -> Self {
        Self {
            per_level_gap_penalty: 4.0,
            max_penalty: 12.0,
            exact_match_bonus: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillMatch {
    /// Bonus per profile skill present in the posting's tech stack.
    pub per_skill_bonus: f64,
    pub max_bonus: f64,
}

impl Default for SkillMatch {
    fn default() -> Self {
        Self {
            per_skill_bonus: 1.0,
            max_bonus: 8.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Dealbreakers {
    /// Keywords anywhere in the posting text that force the score toward 0.
    pub keywords: Vec<String>,
    /// Subset of keywords that additionally lock out positive adjustments.
    pub locked: Vec<String>,
    /// Points subtracted per dealbreaker hit.
    pub penalty: f64,
}

/* ----------------------------
Loading & validation
---------------------------- */

impl PrefilterPolicy {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut p: PrefilterPolicy = toml::from_str(s)?;
        if !p.prefilter.strike_threshold.is_finite() || p.prefilter.strike_threshold <= 0.0 {
            anyhow::bail!("prefilter.strike_threshold must be a positive finite number");
        }
        if p.timezone.max_diff_hours < 0.0 || !p.timezone.max_diff_hours.is_finite() {
            anyhow::bail!("timezone.max_diff_hours must be non-negative");
        }
        // keyword maps are matched lowercase
        p.timezone.locations = p
            .timezone
            .locations
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Ok(p)
    }
}

impl MatchPolicy {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let p: MatchPolicy = toml::from_str(s)?;
        if p.thresholds.high < p.thresholds.medium {
            anyhow::bail!(
                "thresholds.high ({}) must be >= thresholds.medium ({})",
                p.thresholds.high,
                p.thresholds.medium
            );
        }
        Ok(p)
    }
}

/// Immutable-per-run pair of policy documents.
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub prefilter: PrefilterPolicy,
    pub matching: MatchPolicy,
}

impl PolicySet {
    /// Combined version tag recorded on each ScoreBreakdown, e.g. "p1/m2".
    pub fn version_tag(&self) -> String {
        format!("p{}/m{}", self.prefilter.version, self.matching.version)
    }

    pub fn load() -> anyhow::Result<Self> {
        let (pf_path, m_path) = config_paths();
        let pf = fs::read_to_string(&pf_path).map_err(|e| {
            anyhow::anyhow!("failed to read prefilter policy at {}: {}", pf_path.display(), e)
        })?;
        let m = fs::read_to_string(&m_path).map_err(|e| {
            anyhow::anyhow!("failed to read match policy at {}: {}", m_path.display(), e)
        })?;
        Ok(Self {
            prefilter: PrefilterPolicy::from_toml_str(&pf)?,
            matching: MatchPolicy::from_toml_str(&m)?,
        })
    }
}

pub fn config_paths() -> (PathBuf, PathBuf) {
    let pf = std::env::var(ENV_PREFILTER_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREFILTER_CONFIG_PATH));
    let m = std::env::var(ENV_MATCH_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_MATCH_CONFIG_PATH));
    (pf, m)
}

/* ----------------------------
Thread-safe handle + hot reload
---------------------------- */

/// Cheap-to-clone handle. `snapshot` hands out the current `Arc<PolicySet>`;
/// a reload swaps the Arc so in-flight items keep the set they started with.
#[derive(Clone)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicySet>>>,
}

impl PolicyHandle {
    pub fn new(set: PolicySet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(set))),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.inner
            .read()
            .map(|g| g.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Re-read both documents from disk and swap atomically.
    pub fn reload(&self) -> anyhow::Result<String> {
        let fresh = PolicySet::load()?;
        let tag = fresh.version_tag();
        if let Ok(mut g) = self.inner.write() {
            *g = Arc::new(fresh);
        }
        info!(target: "policy", version = %tag, "policies reloaded");
        Ok(tag)
    }

    pub fn replace(&self, set: PolicySet) {
        if let Ok(mut g) = self.inner.write() {
            *g = Arc::new(set);
        }
    }
}

/// Returns true if we should enable hot reload (dev/local only).
fn hot_reload_enabled() -> bool {
    let want = std::env::var("JOBSCOUT_HOT_RELOAD")
        .ok()
        .map(|v| v == "1")
        .unwrap_or(false);
    if !want {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("JOBSCOUT_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Start a polling watcher over both policy files. Polls mtime every 2s.
pub fn start_hot_reload_thread(handle: PolicyHandle) {
    if !hot_reload_enabled() {
        return;
    }

    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last: Option<(SystemTime, SystemTime)> = None;

        loop {
            let (pf_path, m_path) = config_paths();
            let mtimes = (
                fs::metadata(&pf_path).and_then(|m| m.modified()),
                fs::metadata(&m_path).and_then(|m| m.modified()),
            );
            if let (Ok(a), Ok(b)) = mtimes {
                let changed = match last {
                    None => {
                        last = Some((a, b));
                        false
                    }
                    Some((pa, pb)) => a > pa || b > pb,
                };
                if changed {
                    if let Err(e) = handle.reload() {
                        tracing::warn!(target: "policy", error = ?e, "hot reload failed");
                    }
                    last = Some((a, b));
                }
            }
            thread::sleep(poll);
        }
    });
}

/* ----------------------------
Timezone inference
---------------------------- */

/// Infer a UTC offset (hours) from free-form location text: explicit
/// `UTC+2` / `GMT-05:30` markers win, then the policy's keyword map
/// (longest keyword match). Returns None when nothing matches.
pub fn infer_offset_hours(location: &str, locations: &HashMap<String, f64>) -> Option<f64> {
    let loc = location.to_ascii_lowercase();

    static RE_UTC: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE_UTC.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(?:utc|gmt)\s*([+-])\s*(\d{1,2})(?::(\d{2}))?").unwrap()
    });
    if let Some(caps) = re.captures(&loc) {
        let sign = if &caps[1] == "-" { -1.0 } else { 1.0 };
        let hours: f64 = caps[2].parse().unwrap_or(0.0);
        let mins: f64 = caps
            .get(3)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
        return Some(sign * (hours + mins / 60.0));
    }

    let mut best: Option<(&str, f64)> = None;
    for (kw, off) in locations {
        if loc.contains(kw.as_str()) {
            match best {
                Some((prev, _)) if prev.len() >= kw.len() => {}
                _ => best = Some((kw.as_str(), *off)),
            }
        }
    }
    best.map(|(_, off)| off)
}

/// Absolute hour difference between the user and an inferred posting offset.
pub fn timezone_diff_hours(tz: &TimezoneRules, location: Option<&str>) -> Option<f64> {
    let loc = location?;
    let posting_off = infer_offset_hours(loc, &tz.locations)?;
    Some((posting_off - tz.user_offset_hours).abs())
}

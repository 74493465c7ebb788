//! config.rs — runtime configuration from the environment, plus the
//! profile the matcher scores against.
//!
//! Policies (pre-filter and match weights) live in their own TOML files
//! under `config/`; this module covers everything else: bind address,
//! worker pool sizing, retry/backoff knobs, and the profile file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::coordinator::CoordinatorCfg;
use crate::model::Profile;
use crate::pipeline::PipelineCfg;

pub const ENV_PROFILE_CONFIG_PATH: &str = "PROFILE_CONFIG_PATH";
pub const DEFAULT_PROFILE_CONFIG_PATH: &str = "config/profile.toml";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub bind_addr: String,
    pub coordinator: CoordinatorCfg,
    pub pipeline: PipelineCfg,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RuntimeConfig {
    /// Read the runtime knobs from the environment, with safe defaults
    /// for local runs. Missing variables are never an error.
    pub fn from_env() -> Self {
        let defaults = CoordinatorCfg::default();
        let coordinator = CoordinatorCfg {
            workers: env_u64("JOBSCOUT_WORKERS", defaults.workers as u64) as usize,
            poll_interval: Duration::from_millis(env_u64(
                "JOBSCOUT_POLL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            claim_lease: Duration::from_secs(env_u64(
                "JOBSCOUT_CLAIM_LEASE_SECS",
                defaults.claim_lease.as_secs(),
            )),
            max_attempts: env_u64("JOBSCOUT_MAX_ATTEMPTS", defaults.max_attempts as u64) as u32,
            backoff_base: Duration::from_secs(env_u64(
                "JOBSCOUT_BACKOFF_BASE_SECS",
                defaults.backoff_base.as_secs(),
            )),
            backoff_cap: Duration::from_secs(env_u64(
                "JOBSCOUT_BACKOFF_CAP_SECS",
                defaults.backoff_cap.as_secs(),
            )),
        };
        let pipeline = PipelineCfg {
            analyzer_timeout: Duration::from_secs(env_u64(
                "JOBSCOUT_ANALYZER_TIMEOUT_SECS",
                PipelineCfg::default().analyzer_timeout.as_secs(),
            )),
        };
        Self {
            bind_addr: std::env::var("JOBSCOUT_BIND")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            coordinator,
            pipeline,
        }
    }
}

pub fn profile_path() -> PathBuf {
    std::env::var(ENV_PROFILE_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROFILE_CONFIG_PATH))
}

/// Load the matching profile from its TOML file.
pub fn load_profile() -> Result<Profile> {
    let path = profile_path();
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading profile config {}", path.display()))?;
    let profile: Profile =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(profile)
}

//! Cache configuration: lease/hold TTLs, sweep cadence, matching defaults.
//! Loaded from an optional YAML file; daemon flags override individual
//! fields.

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::matcher::{FirstFitRanker, Ranker};

pub const DEFAULT_LEASE_TTL_SECS: u64 = 120;
pub const DEFAULT_HOLD_TTL_SECS: u64 = 300;
pub const DEFAULT_HOLD_SWEEP_INTERVAL_SECS: u64 = 30;
/// 1 TiB, in MB.
pub const DEFAULT_DISK_MB_PER_HOST: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub lease_ttl_secs: u64,
    pub hold_ttl_secs: u64,
    pub hold_sweep_interval_secs: u64,
    /// Advertised disk for backends that do not report one.
    pub default_disk_mb_per_host: u64,
    /// Default per-query host cap; `None` means unbounded.
    pub max_match_hosts: Option<usize>,
    pub ranker: RankerKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            hold_ttl_secs: DEFAULT_HOLD_TTL_SECS,
            hold_sweep_interval_secs: DEFAULT_HOLD_SWEEP_INTERVAL_SECS,
            default_disk_mb_per_host: DEFAULT_DISK_MB_PER_HOST,
            max_match_hosts: None,
            ranker: RankerKind::FirstFit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankerKind {
    #[serde(rename = "first_fit")]
    FirstFit,
}

impl RankerKind {
    pub fn build(&self) -> Box<dyn Ranker> {
        match self {
            RankerKind::FirstFit => Box::new(FirstFitRanker),
        }
    }
}

impl CacheConfig {
    /// Load from a YAML file. Missing fields fall back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read cache config {}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse cache config {}", path))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs as i64)
    }

    pub fn hold_ttl(&self) -> Duration {
        Duration::seconds(self.hold_ttl_secs as i64)
    }

    pub fn hold_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.hold_sweep_interval_secs)
    }
}

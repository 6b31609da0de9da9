//! Scalar resource vector for host capacity accounting.
//! CPU and GPU are fractional counts compared with an absolute epsilon;
//! memory and disk are whole MB compared exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Absolute tolerance for cpu/gpu comparisons.
pub const SCALAR_EPSILON: f64 = 1e-6;

/// Fixed-shape non-negative resource vector, plus named scalars for
/// extensibility (e.g. vendor device counts).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem_mb: u64,
    #[serde(default)]
    pub disk_mb: u64,
    #[serde(default)]
    pub gpu: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, f64>,
}

impl Resources {
    pub fn new(cpu: f64, mem_mb: u64, disk_mb: u64, gpu: f64) -> Self {
        Self {
            cpu,
            mem_mb,
            disk_mb,
            gpu,
            custom: BTreeMap::new(),
        }
    }

    /// Component-wise sum. Named scalars are unioned.
    pub fn add(&self, other: &Resources) -> Resources {
        let mut custom = self.custom.clone();
        for (name, value) in &other.custom {
            *custom.entry(name.clone()).or_insert(0.0) += value;
        }
        Resources {
            cpu: self.cpu + other.cpu,
            mem_mb: self.mem_mb + other.mem_mb,
            disk_mb: self.disk_mb + other.disk_mb,
            gpu: self.gpu + other.gpu,
            custom,
        }
    }

    /// Component-wise difference, clamped at zero. The flag reports whether
    /// any component would have gone negative; callers treat that as a
    /// programming error.
    pub fn subtract(&self, other: &Resources) -> (Resources, bool) {
        let mut underflow = false;

        let cpu = self.cpu - other.cpu;
        if cpu < -SCALAR_EPSILON {
            underflow = true;
        }
        let gpu = self.gpu - other.gpu;
        if gpu < -SCALAR_EPSILON {
            underflow = true;
        }
        if other.mem_mb > self.mem_mb || other.disk_mb > self.disk_mb {
            underflow = true;
        }

        let mut custom = self.custom.clone();
        for (name, value) in &other.custom {
            let entry = custom.entry(name.clone()).or_insert(0.0);
            let diff = *entry - value;
            if diff < -SCALAR_EPSILON {
                underflow = true;
            }
            *entry = diff.max(0.0);
        }

        (
            Resources {
                cpu: cpu.max(0.0),
                mem_mb: self.mem_mb.saturating_sub(other.mem_mb),
                disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
                gpu: gpu.max(0.0),
                custom,
            },
            underflow,
        )
    }

    /// All components of `other` fit within `self`. Primary feasibility test
    /// when matching a filter against a host.
    pub fn contains(&self, other: &Resources) -> bool {
        if self.cpu + SCALAR_EPSILON < other.cpu {
            return false;
        }
        if self.gpu + SCALAR_EPSILON < other.gpu {
            return false;
        }
        if self.mem_mb < other.mem_mb || self.disk_mb < other.disk_mb {
            return false;
        }
        for (name, value) in &other.custom {
            let have = self.custom.get(name).copied().unwrap_or(0.0);
            if have + SCALAR_EPSILON < *value {
                return false;
            }
        }
        true
    }

    /// Epsilon equality on cpu/gpu, exact on mem/disk. Named scalars must
    /// agree on both sides; absent entries compare as zero.
    pub fn equals(&self, other: &Resources) -> bool {
        if (self.cpu - other.cpu).abs() > SCALAR_EPSILON
            || (self.gpu - other.gpu).abs() > SCALAR_EPSILON
        {
            return false;
        }
        if self.mem_mb != other.mem_mb || self.disk_mb != other.disk_mb {
            return false;
        }
        let names: std::collections::BTreeSet<&String> =
            self.custom.keys().chain(other.custom.keys()).collect();
        for name in names {
            let a = self.custom.get(name).copied().unwrap_or(0.0);
            let b = other.custom.get(name).copied().unwrap_or(0.0);
            if (a - b).abs() > SCALAR_EPSILON {
                return false;
            }
        }
        true
    }

    pub fn is_zero(&self) -> bool {
        self.equals(&Resources::default())
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu:{} mem_mb:{} disk_mb:{} gpu:{}",
            self.cpu, self.mem_mb, self.disk_mb, self.gpu
        )
    }
}

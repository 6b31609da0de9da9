//! Host and pod lifecycle events pushed by cluster backend plugins, and the
//! resource-version ordering used to reject out-of-order deliveries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::Resources;

/// Host-level payload shared by every host event kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    #[serde(default)]
    pub capacity: Resources,
    /// Backend-supplied free resources. Only meaningful for Mesos-style
    /// backends; Kubelet-style summaries derive free capacity themselves.
    #[serde(default)]
    pub available: Resources,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEventKind {
    AddHost,
    UpdateHostSpec,
    DeleteHost,
    UpdateHostAvailableRes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: HostEventKind,
    pub host_info: HostInfo,
}

impl HostEvent {
    pub fn new(kind: HostEventKind, host_info: HostInfo) -> Self {
        Self { kind, host_info }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodEventKind {
    Launch,
    Update,
    Kill,
    Evict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodEvent {
    pub hostname: String,
    pub pod_id: String,
    pub kind: PodEventKind,
    #[serde(default)]
    pub resources: Resources,
}

/// Whether `incoming` is strictly older than `current`. Versions that both
/// parse as unsigned integers compare numerically; anything else compares as
/// strings. Equal versions are not old, so re-delivered events re-apply
/// idempotently.
pub fn is_old_version(current: &str, incoming: &str) -> bool {
    match (current.parse::<u64>(), incoming.parse::<u64>()) {
        (Ok(cur), Ok(inc)) => inc < cur,
        _ => incoming < current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_versions() {
        assert!(is_old_version("5", "3"));
        assert!(!is_old_version("3", "5"));
        assert!(!is_old_version("5", "5"));
        // Numeric compare, not lexicographic.
        assert!(!is_old_version("9", "10"));
    }

    #[test]
    fn test_string_versions() {
        assert!(is_old_version("b", "a"));
        assert!(!is_old_version("a", "b"));
        assert!(!is_old_version("a", "a"));
        // Mixed falls back to string compare.
        assert!(is_old_version("v2", "10"));
    }
}

//! Filter evaluation against candidate hosts: hint-directed pass first, then
//! a deterministic ranked pass, with per-reason tallies for observability.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::resources::Resources;

/// Closed set of per-host filter outcomes. Every host examined by a match
/// lands in exactly one bucket, so the tallies sum to the number of hosts
/// examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterReason {
    /// Host is neither Ready nor Held (or its status changed under us
    /// between match and acquire).
    MismatchStatus,
    InsufficientResources,
    MismatchLabels,
    MismatchConstraints,
    /// Host matched and was counted toward the host limit. Not a negative
    /// outcome; tallied so the counts stay complete.
    MatchMaxHostLimit,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::MismatchStatus => "MISMATCH_STATUS",
            FilterReason::InsufficientResources => "INSUFFICIENT_RESOURCES",
            FilterReason::MismatchLabels => "MISMATCH_LABELS",
            FilterReason::MismatchConstraints => "MISMATCH_CONSTRAINTS",
            FilterReason::MatchMaxHostLimit => "MATCH_MAX_HOST_LIMIT",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Label must be present with the given value.
    Affinity,
    /// Label must be absent or carry a different value.
    AntiAffinity,
}

/// Key/value predicate over a host's labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConstraint {
    pub kind: ConstraintKind,
    pub key: String,
    pub value: String,
}

/// Structured predicate a placement query matches against candidate hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFilter {
    /// Minimum free resources a host must offer.
    pub min_resources: Resources,
    /// Required label key/values; all must appear on the host.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub constraints: Vec<SchedulingConstraint>,
    /// Preferred hostnames, tried in order before the ranked pass.
    #[serde(default)]
    pub hint_hostnames: Vec<String>,
    /// Per-query host cap; falls back to the configured default when unset.
    #[serde(default)]
    pub max_hosts: Option<usize>,
}

impl HostFilter {
    pub fn with_resources(min_resources: Resources) -> Self {
        Self {
            min_resources,
            ..Default::default()
        }
    }

    pub fn matches_labels(&self, host_labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| host_labels.get(k) == Some(v))
    }

    pub fn matches_constraints(&self, host_labels: &BTreeMap<String, String>) -> bool {
        self.constraints.iter().all(|c| {
            let hit = host_labels.get(&c.key) == Some(&c.value);
            match c.kind {
                ConstraintKind::Affinity => hit,
                ConstraintKind::AntiAffinity => !hit,
            }
        })
    }
}

/// Orders candidate hostnames for the non-hint pass. Implementations must be
/// deterministic for a given snapshot of the index.
pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;
    fn order(&self, candidates: &mut Vec<String>);
}

/// Lexicographic hostname order; takes the first hosts that fit.
pub struct FirstFitRanker;

impl Ranker for FirstFitRanker {
    fn name(&self) -> &'static str {
        "first_fit"
    }

    fn order(&self, candidates: &mut Vec<String>) {
        candidates.sort();
    }
}

/// Leases granted by a placement query, with the per-reason tallies for
/// every host examined. Fewer leases than the host cap is not an error.
#[derive(Debug, Default)]
pub struct MatchResult {
    pub leases: Vec<crate::host::Lease>,
    pub filter_counts: HashMap<FilterReason, u32>,
}

/// Per-call accumulator: matched hostnames, mismatch tallies, and the host
/// cap. The cache drives iteration and lock acquisition; the matcher only
/// records outcomes.
pub struct Matcher<'a> {
    pub filter: &'a HostFilter,
    host_limit: usize,
    host_names: Vec<String>,
    filter_counts: HashMap<FilterReason, u32>,
}

impl<'a> Matcher<'a> {
    pub fn new(filter: &'a HostFilter, default_limit: Option<usize>) -> Self {
        let host_limit = filter
            .max_hosts
            .or(default_limit)
            .unwrap_or(usize::MAX)
            .max(1);
        Self {
            filter,
            host_limit,
            host_names: Vec::new(),
            filter_counts: HashMap::new(),
        }
    }

    pub fn limit_reached(&self) -> bool {
        self.host_names.len() >= self.host_limit
    }

    /// Record a host that passed TryMatch. The tally for it lands only after
    /// the acquire step settles its final outcome.
    pub fn record_match(&mut self, hostname: &str) {
        self.host_names.push(hostname.to_string());
    }

    pub fn record_mismatch(&mut self, reason: FilterReason) {
        *self.filter_counts.entry(reason).or_insert(0) += 1;
    }

    pub fn matched_hosts(&self) -> &[String] {
        &self.host_names
    }

    pub fn into_parts(self) -> (Vec<String>, HashMap<FilterReason, u32>) {
        (self.host_names, self.filter_counts)
    }
}

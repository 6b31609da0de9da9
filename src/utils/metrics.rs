//! In-process counters and gauges for cache observability. Scraped by the
//! surrounding process; the cache only increments.

use std::collections::HashMap;

use crate::matcher::FilterReason;

pub const STALE_HOST_EVENTS: &str = "events.host.stale_dropped";
pub const UNKNOWN_HOST_POD_EVENTS: &str = "events.pod.unknown_host_dropped";
pub const LEASES_GRANTED: &str = "leases.granted";
pub const LEASES_COMPLETED: &str = "leases.completed";
pub const LEASES_TERMINATED: &str = "leases.terminated";
pub const HOLDS_EXPIRED: &str = "holds.expired";

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&mut self, name: &str) {
        self.add_to_counter(name, 1);
    }

    pub fn add_to_counter(&mut self, name: &str, delta: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Fold one placement query's per-reason tallies into the counters.
    pub fn merge_filter_counts(&mut self, counts: &HashMap<FilterReason, u32>) {
        for (reason, count) in counts {
            self.add_to_counter(&format!("match.{}", reason.as_str()), u64::from(*count));
        }
    }

    pub fn set_gauge(&mut self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str) -> f64 {
        self.gauges.get(name).copied().unwrap_or(0.0)
    }

    pub fn get_all_counters(&self) -> &HashMap<String, u64> {
        &self.counters
    }
}

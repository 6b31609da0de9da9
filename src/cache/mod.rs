//! Process-wide host index: {hostname → summary} plus the derived
//! {pod id → hostname} hold index, the event ingest loops, and the public
//! placement operations served to the RPC handler layer.
//!
//! Lock order is cache index → summary, never the reverse. Iterating
//! operations hold the index read lock and take each summary's lock only
//! briefly; operations that add or remove hostnames or touch the held index
//! take the index write lock.

pub mod lifecycle;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::events::{is_old_version, HostEvent, HostEventKind, HostInfo, PodEvent};
use crate::host::{HostKind, HostSummary, Lease};
use crate::matcher::{FilterReason, HostFilter, MatchResult, Matcher, Ranker};
use crate::plugin::Plugin;
use crate::resources::Resources;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::metrics::{self, MetricsCollector};

pub use lifecycle::{Lifecycle, LifecycleState};

/// Consistent snapshot of total and reserved resources across the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterCapacity {
    pub capacity: Resources,
    pub allocated: Resources,
}

struct CacheIndex {
    hosts: HashMap<String, Arc<Mutex<HostSummary>>>,
    /// Derived accelerator for GetHostHeldForPod; per-summary `holds` is
    /// authoritative.
    pod_held_index: HashMap<String, String>,
}

pub struct HostCache {
    index: RwLock<CacheIndex>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    ranker: Box<dyn Ranker>,
    metrics: Mutex<MetricsCollector>,
    lifecycle: Lifecycle,
    plugin: Mutex<Option<Box<dyn Plugin>>>,
}

impl HostCache {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let ranker = config.ranker.build();
        Arc::new(Self {
            index: RwLock::new(CacheIndex {
                hosts: HashMap::new(),
                pod_held_index: HashMap::new(),
            }),
            config,
            clock,
            ranker,
            metrics: Mutex::new(MetricsCollector::new()),
            lifecycle: Lifecycle::new(),
            plugin: Mutex::new(None),
        })
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Spawn the two event loops over the plugin's channels. Idempotent
    /// while running; fails once stopped.
    pub fn start(self: &Arc<Self>, mut plugin: Box<dyn Plugin>) -> Result<(), CacheError> {
        if !self.lifecycle.begin_start()? {
            debug!("host cache already running");
            return Ok(());
        }
        let streams = plugin.event_streams();
        *self.plugin.lock().unwrap() = Some(plugin);
        self.lifecycle.register(tokio::spawn(run_host_event_loop(
            Arc::clone(self),
            streams.host_events,
            self.lifecycle.stop_signal(),
        )));
        self.lifecycle.register(tokio::spawn(run_pod_event_loop(
            Arc::clone(self),
            streams.pod_events,
            self.lifecycle.stop_signal(),
        )));
        info!("host cache started");
        Ok(())
    }

    /// Signal the event loops and wait for both to drain and exit.
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
        info!("host cache stopped");
    }

    /// Ask the backend to re-list; re-emitted AddHost events merge through
    /// the version check.
    pub fn reconcile(&self) -> anyhow::Result<()> {
        let mut plugin = self.plugin.lock().unwrap();
        match plugin.as_mut() {
            Some(plugin) => plugin.reconcile(),
            None => Err(anyhow::anyhow!("no plugin attached; cache not started")),
        }
    }

    /// Match the filter against the index and convert every match into an
    /// exclusive lease. Returning fewer leases than the cap is not an error.
    pub fn acquire_leases(&self, filter: &HostFilter) -> MatchResult {
        let now = self.clock.now();
        let mut matcher = Matcher::new(filter, self.config.max_match_hosts);
        let index = self.index.read().unwrap();

        // Hint pass: preferred hostnames first, in caller order.
        for hostname in &filter.hint_hostnames {
            if matcher.limit_reached() {
                break;
            }
            if let Some(summary) = index.hosts.get(hostname) {
                match summary.lock().unwrap().try_match(filter, now) {
                    Ok(()) => matcher.record_match(hostname),
                    Err(reason) => matcher.record_mismatch(reason),
                }
            }
        }

        // Ranked pass over the rest of the index.
        if !matcher.limit_reached() {
            let mut rest: Vec<String> = index
                .hosts
                .keys()
                .filter(|hostname| !filter.hint_hostnames.contains(hostname))
                .cloned()
                .collect();
            self.ranker.order(&mut rest);
            for hostname in rest {
                if matcher.limit_reached() {
                    break;
                }
                if let Some(summary) = index.hosts.get(&hostname) {
                    match summary.lock().unwrap().try_match(filter, now) {
                        Ok(()) => matcher.record_match(&hostname),
                        Err(reason) => matcher.record_mismatch(reason),
                    }
                }
            }
        }

        // Convert matches into leases. A host whose state moved between
        // match and acquire counts as MISMATCH_STATUS and is skipped.
        let (matched, mut counts) = matcher.into_parts();
        let mut leases = Vec::new();
        for hostname in matched {
            let Some(summary) = index.hosts.get(&hostname) else {
                continue;
            };
            let acquired =
                summary
                    .lock()
                    .unwrap()
                    .acquire_lease(filter, now, self.config.lease_ttl());
            match acquired {
                Ok(lease) => {
                    leases.push(lease);
                    *counts.entry(FilterReason::MatchMaxHostLimit).or_insert(0) += 1;
                }
                Err(reason) => {
                    debug!("host {} no longer matches ({}), skipping", hostname, reason);
                    *counts.entry(FilterReason::MismatchStatus).or_insert(0) += 1;
                }
            }
        }
        drop(index);

        let mut m = self.metrics.lock().unwrap();
        m.add_to_counter(metrics::LEASES_GRANTED, leases.len() as u64);
        m.merge_filter_counts(&counts);
        MatchResult {
            leases,
            filter_counts: counts,
        }
    }

    /// Release a lease without launching anything, restoring the host's
    /// prior state exactly.
    pub fn terminate_lease(&self, hostname: &str, lease_id: &str) -> Result<(), CacheError> {
        let now = self.clock.now();
        let summary = self.get_summary(hostname)?;
        summary.lock().unwrap().terminate_lease(lease_id, now)?;
        self.metrics
            .lock()
            .unwrap()
            .increment_counter(metrics::LEASES_TERMINATED);
        Ok(())
    }

    /// Settle a lease by launching pods on its host.
    pub fn complete_lease(
        &self,
        hostname: &str,
        lease_id: &str,
        pod_to_resources: HashMap<String, Resources>,
    ) -> Result<(), CacheError> {
        let now = self.clock.now();
        let summary = self.get_summary(hostname)?;
        let released = summary
            .lock()
            .unwrap()
            .complete_lease(lease_id, &pod_to_resources, now)?;
        if !released.is_empty() {
            self.unindex_held_pods(&released);
        }
        self.metrics
            .lock()
            .unwrap()
            .increment_counter(metrics::LEASES_COMPLETED);
        Ok(())
    }

    /// Reserve a host for the given pod ids. All-or-nothing: a conflict on
    /// any pod leaves no new holds behind.
    pub fn hold_for_pods(&self, hostname: &str, pod_ids: &[String]) -> Result<(), CacheError> {
        let now = self.clock.now();
        let mut index = self.index.write().unwrap();
        let summary = index
            .hosts
            .get(hostname)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("host {}", hostname)))?;

        {
            let mut guard = summary.lock().unwrap();
            for pod_id in pod_ids {
                if guard.pods().contains_key(pod_id) {
                    return Err(CacheError::ConflictingStatus {
                        hostname: hostname.to_string(),
                        status: guard.status(),
                    });
                }
            }
            for pod_id in pod_ids {
                guard.hold_for_pod(pod_id, now, self.config.hold_ttl())?;
            }
        }

        // A pod holds at most one host; a newer hold supersedes the old one.
        for pod_id in pod_ids {
            if let Some(previous) = index
                .pod_held_index
                .insert(pod_id.clone(), hostname.to_string())
            {
                if previous != hostname {
                    if let Some(old) = index.hosts.get(&previous) {
                        old.lock().unwrap().release_hold_for_pod(pod_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop holds for the given pod ids. Fails `NotFound` (releasing
    /// nothing) when any pod id is not held on the host.
    pub fn release_hold_for_pods(
        &self,
        hostname: &str,
        pod_ids: &[String],
    ) -> Result<(), CacheError> {
        let mut index = self.index.write().unwrap();
        let summary = index
            .hosts
            .get(hostname)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("host {}", hostname)))?;

        {
            let mut guard = summary.lock().unwrap();
            for pod_id in pod_ids {
                if !guard.has_hold_for(pod_id) {
                    return Err(CacheError::NotFound(format!(
                        "pod {} not held on {}",
                        pod_id, hostname
                    )));
                }
            }
            for pod_id in pod_ids {
                guard.release_hold_for_pod(pod_id);
            }
        }
        for pod_id in pod_ids {
            index.pod_held_index.remove(pod_id);
        }
        Ok(())
    }

    /// Hostname currently holding the pod, if any.
    pub fn get_host_held_for_pod(&self, pod_id: &str) -> Option<String> {
        self.index
            .read()
            .unwrap()
            .pod_held_index
            .get(pod_id)
            .cloned()
    }

    /// Sum capacity and allocation across every summary under the read
    /// lock; the returned pair is a consistent snapshot.
    pub fn get_cluster_capacity(&self) -> ClusterCapacity {
        let index = self.index.read().unwrap();
        let mut totals = ClusterCapacity::default();
        for summary in index.hosts.values() {
            let summary = summary.lock().unwrap();
            totals.capacity = totals.capacity.add(summary.capacity());
            totals.allocated = totals.allocated.add(summary.allocated());
        }
        totals
    }

    /// Owned snapshots of every summary.
    pub fn get_summaries(&self) -> Vec<HostSummary> {
        let index = self.index.read().unwrap();
        index
            .hosts
            .values()
            .map(|summary| summary.lock().unwrap().clone())
            .collect()
    }

    /// Current lease view for a host, if one is outstanding.
    pub fn get_host_lease(&self, hostname: &str) -> Result<Option<Lease>, CacheError> {
        let summary = self.get_summary(hostname)?;
        let lease = summary.lock().unwrap().get_host_lease();
        Ok(lease)
    }

    /// Sweep expired holds across the index. Returns the hostnames whose
    /// status changed (left Held), sorted for determinism. Invoked by a
    /// periodic sweeper; safe to call repeatedly.
    pub fn reset_expired_held_host_summaries(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut index = self.index.write().unwrap();
        let mut freed_hosts = Vec::new();
        let mut expired_total: u64 = 0;

        let summaries: Vec<(String, Arc<Mutex<HostSummary>>)> = index
            .hosts
            .iter()
            .map(|(hostname, summary)| (hostname.clone(), Arc::clone(summary)))
            .collect();
        for (hostname, summary) in summaries {
            let (freed, expired) = summary.lock().unwrap().delete_expired_holds(now);
            for pod_id in &expired {
                index.pod_held_index.remove(pod_id);
            }
            expired_total += expired.len() as u64;
            if freed {
                freed_hosts.push(hostname);
            }
        }

        // Reconcile the derived index with the authoritative holds.
        let CacheIndex {
            hosts,
            pod_held_index,
        } = &mut *index;
        pod_held_index.retain(|pod_id, hostname| {
            hosts
                .get(hostname)
                .map(|summary| summary.lock().unwrap().has_hold_for(pod_id))
                .unwrap_or(false)
        });

        if expired_total > 0 {
            self.metrics
                .lock()
                .unwrap()
                .add_to_counter(metrics::HOLDS_EXPIRED, expired_total);
        }
        freed_hosts.sort();
        freed_hosts
    }

    /// Apply one host event. The event loop funnels here; backends that
    /// deliver synchronously may call it directly.
    pub fn ingest_host_event(&self, event: HostEvent) {
        match self.apply_host_event(&event) {
            Ok(()) => {
                let total = self.index.read().unwrap().hosts.len();
                self.metrics
                    .lock()
                    .unwrap()
                    .set_gauge("hosts.total", total as f64);
            }
            Err(CacheError::OldEventVersion {
                hostname,
                event_version,
                current_version,
            }) => {
                debug!(
                    "dropping stale {:?} for {}: version {} < {}",
                    event.kind, hostname, event_version, current_version
                );
                self.metrics
                    .lock()
                    .unwrap()
                    .increment_counter(metrics::STALE_HOST_EVENTS);
            }
            Err(err) => warn!("host event {:?} failed: {}", event.kind, err),
        }
    }

    fn apply_host_event(&self, event: &HostEvent) -> Result<(), CacheError> {
        let info = &event.host_info;
        match event.kind {
            HostEventKind::AddHost => {
                {
                    let index = self.index.read().unwrap();
                    if let Some(summary) = index.hosts.get(&info.hostname) {
                        let mut summary = summary.lock().unwrap();
                        check_version(&summary, info)?;
                        summary.set_capacity(info.capacity.clone());
                        summary.set_labels(info.labels.clone());
                        summary.set_version(&info.resource_version);
                        return Ok(());
                    }
                }
                // Creation is safe against the re-check below because the
                // single-consumer event loop is the only creator.
                let mut index = self.index.write().unwrap();
                index.hosts.entry(info.hostname.clone()).or_insert_with(|| {
                    debug!(
                        "added host {} at version {}",
                        info.hostname, info.resource_version
                    );
                    Arc::new(Mutex::new(HostSummary::new(
                        &info.hostname,
                        HostKind::Kubelet,
                        info.capacity.clone(),
                        info.available.clone(),
                        &info.resource_version,
                        info.labels.clone(),
                    )))
                });
                Ok(())
            }
            HostEventKind::UpdateHostSpec => {
                let index = self.index.read().unwrap();
                match index.hosts.get(&info.hostname) {
                    Some(summary) => {
                        let mut summary = summary.lock().unwrap();
                        check_version(&summary, info)?;
                        summary.set_capacity(info.capacity.clone());
                        summary.set_labels(info.labels.clone());
                        summary.set_version(&info.resource_version);
                        Ok(())
                    }
                    // Reconciliation will recreate the host later.
                    None => {
                        debug!("ignoring UpdateHostSpec for unknown host {}", info.hostname);
                        Ok(())
                    }
                }
            }
            HostEventKind::DeleteHost => {
                let mut index = self.index.write().unwrap();
                let Some(summary) = index.hosts.get(&info.hostname) else {
                    debug!("ignoring DeleteHost for unknown host {}", info.hostname);
                    return Ok(());
                };
                let held = {
                    let summary = summary.lock().unwrap();
                    check_version(&summary, info)?;
                    summary.held_pods()
                };
                index.hosts.remove(&info.hostname);
                for pod_id in held {
                    index.pod_held_index.remove(&pod_id);
                }
                info!("removed host {}", info.hostname);
                Ok(())
            }
            HostEventKind::UpdateHostAvailableRes => {
                {
                    let index = self.index.read().unwrap();
                    if let Some(summary) = index.hosts.get(&info.hostname) {
                        let mut summary = summary.lock().unwrap();
                        if summary.kind() != HostKind::Mesos {
                            warn!(
                                "ignoring UpdateHostAvailableRes for kubelet host {}",
                                info.hostname
                            );
                            return Ok(());
                        }
                        check_version(&summary, info)?;
                        summary.set_available(info.available.clone());
                        summary.set_version(&info.resource_version);
                        return Ok(());
                    }
                }
                let mut index = self.index.write().unwrap();
                index.hosts.entry(info.hostname.clone()).or_insert_with(|| {
                    debug!(
                        "added mesos host {} at version {}",
                        info.hostname, info.resource_version
                    );
                    Arc::new(Mutex::new(HostSummary::new(
                        &info.hostname,
                        HostKind::Mesos,
                        info.capacity.clone(),
                        info.available.clone(),
                        &info.resource_version,
                        info.labels.clone(),
                    )))
                });
                Ok(())
            }
        }
    }

    /// Apply one pod event. Unknown hostnames are logged and dropped; the
    /// backend's reconciliation reconstructs them.
    pub fn ingest_pod_event(&self, event: PodEvent) {
        let released = {
            let index = self.index.read().unwrap();
            match index.hosts.get(&event.hostname) {
                Some(summary) => summary.lock().unwrap().handle_pod_event(&event),
                None => {
                    warn!(
                        "dropping pod event for unknown host {} (pod {})",
                        event.hostname, event.pod_id
                    );
                    self.metrics
                        .lock()
                        .unwrap()
                        .increment_counter(metrics::UNKNOWN_HOST_POD_EVENTS);
                    return;
                }
            }
        };
        if !released.is_empty() {
            self.unindex_held_pods(&released);
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.metrics.lock().unwrap().get_counter(name)
    }

    fn get_summary(&self, hostname: &str) -> Result<Arc<Mutex<HostSummary>>, CacheError> {
        self.index
            .read()
            .unwrap()
            .hosts
            .get(hostname)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("host {}", hostname)))
    }

    fn unindex_held_pods(&self, pod_ids: &[String]) {
        let mut index = self.index.write().unwrap();
        for pod_id in pod_ids {
            index.pod_held_index.remove(pod_id);
        }
    }
}

fn check_version(summary: &HostSummary, info: &HostInfo) -> Result<(), CacheError> {
    if is_old_version(summary.version(), &info.resource_version) {
        return Err(CacheError::OldEventVersion {
            hostname: summary.hostname().to_string(),
            event_version: info.resource_version.clone(),
            current_version: summary.version().to_string(),
        });
    }
    Ok(())
}

async fn run_host_event_loop(
    cache: Arc<HostCache>,
    mut events: UnboundedReceiver<HostEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => cache.ingest_host_event(event),
                None => break,
            }
        }
    }
    // Drain whatever the backend queued before acknowledging the stop.
    while let Ok(event) = events.try_recv() {
        cache.ingest_host_event(event);
    }
    debug!("host event loop stopped");
}

async fn run_pod_event_loop(
    cache: Arc<HostCache>,
    mut events: UnboundedReceiver<PodEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => cache.ingest_pod_event(event),
                None => break,
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        cache.ingest_pod_event(event);
    }
    debug!("pod event loop stopped");
}

//! Per-host summary: resource accounting, the Ready/Placing/Held state
//! machine, lease lifecycle with lazy TTL expiry, and pod holds.
//!
//! A summary is always mutated under its owning lock in the cache; the
//! methods here assume exclusive access and keep the invariants
//! (allocated = Σ pod resources, allocated ≤ capacity, Placing ⇔ lease
//! present, holds/pods disjoint) true on return.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::CacheError;
use crate::events::{PodEvent, PodEventKind};
use crate::host::types::{HostKind, HostStatus, Lease};
use crate::matcher::{FilterReason, HostFilter};
use crate::resources::Resources;

#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    hostname: String,
    kind: HostKind,
    capacity: Resources,
    /// Sum of resources reserved by currently running pods.
    allocated: Resources,
    /// Backend-supplied free resources; only read for Mesos-kind hosts.
    available: Resources,
    version: String,
    labels: BTreeMap<String, String>,
    status: HostStatus,
    lease: Option<Lease>,
    pods: HashMap<String, Resources>,
    /// Pod id → hold expiry. Authoritative; the cache-level held index is a
    /// derived accelerator.
    holds: HashMap<String, DateTime<Utc>>,
}

impl HostSummary {
    pub fn new(
        hostname: impl Into<String>,
        kind: HostKind,
        capacity: Resources,
        available: Resources,
        version: impl Into<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            kind,
            capacity,
            allocated: Resources::default(),
            available,
            version: version.into(),
            labels,
            status: HostStatus::Ready,
            lease: None,
            pods: HashMap::new(),
            holds: HashMap::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn capacity(&self) -> &Resources {
        &self.capacity
    }

    pub fn allocated(&self) -> &Resources {
        &self.allocated
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn pods(&self) -> &HashMap<String, Resources> {
        &self.pods
    }

    pub fn holds(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.holds
    }

    pub fn held_pods(&self) -> Vec<String> {
        self.holds.keys().cloned().collect()
    }

    pub fn has_hold_for(&self, pod_id: &str) -> bool {
        self.holds.contains_key(pod_id)
    }

    /// Resources currently free for placement.
    pub fn free(&self) -> Resources {
        match self.kind {
            HostKind::Kubelet => self.capacity.subtract(&self.allocated).0,
            HostKind::Mesos => self.available.clone(),
        }
    }

    pub fn set_capacity(&mut self, capacity: Resources) {
        self.capacity = capacity;
    }

    pub fn set_available(&mut self, available: Resources) {
        self.available = available;
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.labels = labels;
    }

    pub fn get_host_lease(&self) -> Option<Lease> {
        self.lease.clone()
    }

    /// Status as observed at `now`: a Placing host whose lease TTL elapsed
    /// reads as if the stale lease were already terminated. Mutating
    /// operations perform the actual termination.
    fn effective_status(&self, now: DateTime<Utc>) -> HostStatus {
        if self.status == HostStatus::Placing && self.lease_expired(now) {
            if self.holds.is_empty() {
                HostStatus::Ready
            } else {
                HostStatus::Held
            }
        } else {
            self.status
        }
    }

    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .map(|l| l.expires_at <= now)
            .unwrap_or(false)
    }

    /// Auto-terminate a lease whose TTL elapsed. Enforced lazily on the next
    /// mutating operation that observes the summary.
    fn expire_stale_lease(&mut self, now: DateTime<Utc>) {
        if self.status == HostStatus::Placing && self.lease_expired(now) {
            let lease_id = self
                .lease
                .as_ref()
                .map(|l| l.lease_id.clone())
                .unwrap_or_default();
            warn!(
                "host {}: lease {} expired, reverting to {:?}",
                self.hostname,
                lease_id,
                if self.holds.is_empty() {
                    HostStatus::Ready
                } else {
                    HostStatus::Held
                }
            );
            self.revert_lease();
        }
    }

    fn revert_lease(&mut self) {
        self.lease = None;
        self.status = if self.holds.is_empty() {
            HostStatus::Ready
        } else {
            HostStatus::Held
        };
    }

    /// Read-only feasibility test of a filter against this host. Does not
    /// mutate state.
    pub fn try_match(&self, filter: &HostFilter, now: DateTime<Utc>) -> Result<(), FilterReason> {
        match self.effective_status(now) {
            HostStatus::Ready | HostStatus::Held => {}
            HostStatus::Placing => return Err(FilterReason::MismatchStatus),
        }
        if !filter.matches_labels(&self.labels) {
            return Err(FilterReason::MismatchLabels);
        }
        if !filter.matches_constraints(&self.labels) {
            return Err(FilterReason::MismatchConstraints);
        }
        if !self.free().contains(&filter.min_resources) {
            return Err(FilterReason::InsufficientResources);
        }
        Ok(())
    }

    /// Transition Ready|Held → Placing, minting a fresh lease over the
    /// host's current free resources.
    pub fn acquire_lease(
        &mut self,
        filter: &HostFilter,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Lease, FilterReason> {
        self.expire_stale_lease(now);
        self.try_match(filter, now)?;

        let lease = Lease {
            hostname: self.hostname.clone(),
            lease_id: Uuid::new_v4().to_string(),
            offered: self.free(),
            expires_at: now + lease_ttl,
        };
        debug!(
            "host {}: acquired lease {} (offered {})",
            self.hostname, lease.lease_id, lease.offered
        );
        self.lease = Some(lease.clone());
        self.status = HostStatus::Placing;
        Ok(lease)
    }

    /// Transition Placing → Ready|Held without launching anything, restoring
    /// the prior allocation exactly. A second call with the same id fails
    /// `NotFound`; a mismatched id fails `InvalidLease`.
    pub fn terminate_lease(&mut self, lease_id: &str, now: DateTime<Utc>) -> Result<(), CacheError> {
        self.expire_stale_lease(now);
        let current = match &self.lease {
            Some(lease) => lease,
            None => {
                return Err(CacheError::NotFound(format!(
                    "no active lease on host {}",
                    self.hostname
                )))
            }
        };
        if current.lease_id != lease_id {
            return Err(CacheError::InvalidLease {
                hostname: self.hostname.clone(),
                lease_id: lease_id.to_string(),
            });
        }
        debug!("host {}: terminated lease {}", self.hostname, lease_id);
        self.revert_lease();
        Ok(())
    }

    /// Settle a lease by launching pods: adds each entry to the pod map,
    /// grows `allocated`, consumes any holds for the launched pods, and
    /// transitions back to Ready (or Held when residual holds remain).
    ///
    /// Returns the pod ids whose holds were consumed, so the cache can drop
    /// them from its held index.
    pub fn complete_lease(
        &mut self,
        lease_id: &str,
        pod_to_resources: &HashMap<String, Resources>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, CacheError> {
        self.expire_stale_lease(now);
        match &self.lease {
            Some(lease) if lease.lease_id == lease_id => {}
            _ => {
                return Err(CacheError::InvalidLease {
                    hostname: self.hostname.clone(),
                    lease_id: lease_id.to_string(),
                })
            }
        }

        // Pods already tracked (re-delivery) are counted in `allocated`;
        // only net-new entries need free capacity.
        let mut needed = Resources::default();
        for (pod_id, resources) in pod_to_resources {
            if !self.pods.contains_key(pod_id) {
                needed = needed.add(resources);
            }
        }
        let (free, underflow) = self.capacity.subtract(&self.allocated);
        if underflow {
            return Err(CacheError::Internal(format!(
                "host {}: allocated exceeds capacity",
                self.hostname
            )));
        }
        if !free.contains(&needed) {
            return Err(CacheError::InsufficientResources(self.hostname.clone()));
        }

        let mut released = Vec::new();
        for (pod_id, resources) in pod_to_resources {
            if let Some(old) = self.pods.insert(pod_id.clone(), resources.clone()) {
                let (adjusted, _) = self.allocated.subtract(&old);
                self.allocated = adjusted.add(resources);
            } else {
                self.allocated = self.allocated.add(resources);
            }
            if self.holds.remove(pod_id).is_some() {
                released.push(pod_id.clone());
            }
        }
        debug!(
            "host {}: completed lease {} with {} pod(s), allocated now {}",
            self.hostname,
            lease_id,
            pod_to_resources.len(),
            self.allocated
        );
        self.revert_lease();
        Ok(released)
    }

    /// Reserve this host for a pod id until the hold TTL elapses or the pod
    /// launches. Refreshes the deadline when the hold already exists.
    pub fn hold_for_pod(
        &mut self,
        pod_id: &str,
        now: DateTime<Utc>,
        hold_ttl: Duration,
    ) -> Result<(), CacheError> {
        self.expire_stale_lease(now);
        if self.status == HostStatus::Placing {
            return Err(CacheError::ConflictingStatus {
                hostname: self.hostname.clone(),
                status: self.status,
            });
        }
        // Holds and running pods stay disjoint on pod id.
        if self.pods.contains_key(pod_id) {
            return Err(CacheError::ConflictingStatus {
                hostname: self.hostname.clone(),
                status: self.status,
            });
        }
        self.holds.insert(pod_id.to_string(), now + hold_ttl);
        self.status = HostStatus::Held;
        debug!("host {}: held for pod {}", self.hostname, pod_id);
        Ok(())
    }

    /// Drop the hold for a pod id. Returns whether an entry was removed;
    /// transitions Held → Ready when the last hold goes.
    pub fn release_hold_for_pod(&mut self, pod_id: &str) -> bool {
        let removed = self.holds.remove(pod_id).is_some();
        if removed {
            debug!("host {}: released hold for pod {}", self.hostname, pod_id);
        }
        if self.holds.is_empty() && self.status == HostStatus::Held {
            self.status = HostStatus::Ready;
        }
        removed
    }

    /// Remove every hold whose expiry is at or before `now`. Returns whether
    /// the host left Held, plus the expired pod ids.
    pub fn delete_expired_holds(&mut self, now: DateTime<Utc>) -> (bool, Vec<String>) {
        let expired: Vec<String> = self
            .holds
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(pod_id, _)| pod_id.clone())
            .collect();
        for pod_id in &expired {
            self.holds.remove(pod_id);
        }
        let freed = self.holds.is_empty() && self.status == HostStatus::Held;
        if freed {
            self.status = HostStatus::Ready;
            debug!(
                "host {}: {} hold(s) expired, back to Ready",
                self.hostname,
                expired.len()
            );
        }
        (freed, expired)
    }

    /// Apply a pod-level mutation to the pod map and derived allocation.
    /// Returns the pod ids whose holds were consumed or abandoned by the
    /// event, for held-index maintenance.
    pub fn handle_pod_event(&mut self, event: &PodEvent) -> Vec<String> {
        let mut released = Vec::new();
        match event.kind {
            PodEventKind::Launch | PodEventKind::Update => {
                let prospective = match self.pods.get(&event.pod_id) {
                    Some(old) => self.allocated.subtract(old).0.add(&event.resources),
                    None => self.allocated.add(&event.resources),
                };
                if self.kind == HostKind::Kubelet && !self.capacity.contains(&prospective) {
                    warn!(
                        "host {}: dropping pod event for {} ({}), would exceed capacity {}",
                        self.hostname, event.pod_id, event.resources, self.capacity
                    );
                    return released;
                }
                self.pods
                    .insert(event.pod_id.clone(), event.resources.clone());
                self.allocated = prospective;
                if self.holds.remove(&event.pod_id).is_some() {
                    released.push(event.pod_id.clone());
                }
            }
            PodEventKind::Kill | PodEventKind::Evict => {
                if let Some(old) = self.pods.remove(&event.pod_id) {
                    let (adjusted, underflow) = self.allocated.subtract(&old);
                    if underflow {
                        warn!(
                            "host {}: allocation underflow removing pod {}",
                            self.hostname, event.pod_id
                        );
                    }
                    self.allocated = adjusted;
                }
                // A killed pod will never launch; any hold for it is dead.
                if self.holds.remove(&event.pod_id).is_some() {
                    released.push(event.pod_id.clone());
                }
            }
        }
        if self.holds.is_empty() && self.status == HostStatus::Held {
            self.status = HostStatus::Ready;
        }
        released
    }
}

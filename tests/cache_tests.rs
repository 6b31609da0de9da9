use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use hostcache::cache::HostCache;
use hostcache::config::CacheConfig;
use hostcache::error::CacheError;
use hostcache::events::{HostEvent, HostEventKind, HostInfo, PodEvent, PodEventKind};
use hostcache::host::HostStatus;
use hostcache::matcher::{FilterReason, HostFilter};
use hostcache::resources::Resources;
use hostcache::utils::clock::ManualClock;
use hostcache::utils::metrics;

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn new_cache() -> (Arc<HostCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let cache = HostCache::with_clock(CacheConfig::default(), clock.clone());
    (cache, clock)
}

fn host_info(hostname: &str, capacity: Resources, version: &str) -> HostInfo {
    HostInfo {
        hostname: hostname.to_string(),
        available: capacity.clone(),
        capacity,
        resource_version: version.to_string(),
        labels: Default::default(),
    }
}

fn add_host(cache: &HostCache, hostname: &str, capacity: Resources) {
    cache.ingest_host_event(HostEvent::new(
        HostEventKind::AddHost,
        host_info(hostname, capacity, "1"),
    ));
}

/// Every invariant from the design holds after every operation: allocation
/// is the pod sum and within capacity, Placing implies a lease, and the
/// held index agrees with per-host holds in both directions.
fn assert_invariants(cache: &HostCache) {
    for summary in cache.get_summaries() {
        let mut pod_sum = Resources::default();
        for resources in summary.pods().values() {
            pod_sum = pod_sum.add(resources);
        }
        assert!(
            summary.allocated().equals(&pod_sum),
            "host {}: allocated != pod sum",
            summary.hostname()
        );
        assert!(
            summary.capacity().contains(summary.allocated()),
            "host {}: allocated exceeds capacity",
            summary.hostname()
        );
        assert_eq!(
            summary.status() == HostStatus::Placing,
            summary.get_host_lease().is_some(),
            "host {}: Placing iff lease",
            summary.hostname()
        );
        for pod_id in summary.holds().keys() {
            assert!(
                !summary.pods().contains_key(pod_id),
                "host {}: hold and pod share id {}",
                summary.hostname(),
                pod_id
            );
            assert_eq!(
                cache.get_host_held_for_pod(pod_id).as_deref(),
                Some(summary.hostname()),
                "held index missing {}",
                pod_id
            );
        }
    }
}

#[test]
fn test_acquire_complete_happy_path() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 10000, 0.0));

    let mut filter = HostFilter::with_resources(Resources::new(2.0, 4096, 0, 0.0));
    filter.max_hosts = Some(1);
    let result = cache.acquire_leases(&filter);
    assert_eq!(result.leases.len(), 1);
    let lease = &result.leases[0];
    assert_eq!(lease.hostname, "h1");
    assert_invariants(&cache);

    let mut pods = HashMap::new();
    pods.insert("p1".to_string(), Resources::new(2.0, 4096, 0, 0.0));
    cache.complete_lease("h1", &lease.lease_id, pods).unwrap();

    let summaries = cache.get_summaries();
    assert_eq!(summaries.len(), 1);
    let h1 = &summaries[0];
    assert!(h1.allocated().equals(&Resources::new(2.0, 4096, 0, 0.0)));
    assert_eq!(h1.status(), HostStatus::Ready);
    assert_eq!(h1.pods().len(), 1);
    assert!(h1.pods().contains_key("p1"));
    assert_invariants(&cache);
}

#[test]
fn test_terminate_restores_allocation() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 10000, 0.0));

    let mut filter = HostFilter::with_resources(Resources::new(2.0, 4096, 0, 0.0));
    filter.max_hosts = Some(1);
    let result = cache.acquire_leases(&filter);
    let lease = &result.leases[0];

    cache.terminate_lease("h1", &lease.lease_id).unwrap();
    let h1 = &cache.get_summaries()[0];
    assert_eq!(h1.status(), HostStatus::Ready);
    assert!(h1.allocated().is_zero());
    assert_invariants(&cache);

    // The id is dead after termination.
    assert!(matches!(
        cache.complete_lease("h1", &lease.lease_id, HashMap::new()),
        Err(CacheError::InvalidLease { .. })
    ));
}

#[test]
fn test_insufficient_resources_returns_no_leases() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(2.0, 4096, 0, 0.0));

    let mut filter = HostFilter::with_resources(Resources::new(4.0, 4096, 0, 0.0));
    filter.max_hosts = Some(1);
    let result = cache.acquire_leases(&filter);

    assert!(result.leases.is_empty());
    assert_eq!(
        result.filter_counts.get(&FilterReason::InsufficientResources),
        Some(&1)
    );
    assert_eq!(result.filter_counts.len(), 1);
}

#[test]
fn test_stale_update_is_ignored() {
    let (cache, _) = new_cache();
    let c1 = Resources::new(4.0, 8192, 0, 0.0);
    let c2 = Resources::new(8.0, 16384, 0, 0.0);

    cache.ingest_host_event(HostEvent::new(
        HostEventKind::AddHost,
        host_info("h1", c1.clone(), "5"),
    ));
    cache.ingest_host_event(HostEvent::new(
        HostEventKind::UpdateHostSpec,
        host_info("h1", c2, "3"),
    ));

    let h1 = &cache.get_summaries()[0];
    assert!(h1.capacity().equals(&c1));
    assert_eq!(h1.version(), "5");
    assert_eq!(cache.counter(metrics::STALE_HOST_EVENTS), 1);
}

#[test]
fn test_version_monotonicity_in_either_order() {
    let c1 = Resources::new(4.0, 8192, 0, 0.0);
    let c2 = Resources::new(8.0, 16384, 0, 0.0);
    let forward = [
        HostEvent::new(HostEventKind::AddHost, host_info("h1", c1.clone(), "1")),
        HostEvent::new(HostEventKind::AddHost, host_info("h1", c2.clone(), "2")),
    ];
    let backward = [forward[1].clone(), forward[0].clone()];

    for order in [forward, backward] {
        let (cache, _) = new_cache();
        for event in order {
            cache.ingest_host_event(event);
        }
        let h1 = &cache.get_summaries()[0];
        assert!(h1.capacity().equals(&c2));
        assert_eq!(h1.version(), "2");
    }
}

#[test]
fn test_hold_expiry_sweep() {
    let (cache, clock) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));

    cache.hold_for_pods("h1", &["p1".to_string()]).unwrap();
    assert_eq!(cache.get_host_held_for_pod("p1").as_deref(), Some("h1"));
    assert_invariants(&cache);

    // Default hold TTL is 300 s.
    clock.advance(Duration::seconds(301));
    let freed = cache.reset_expired_held_host_summaries(clock_now(&clock));
    assert_eq!(freed, vec!["h1".to_string()]);
    assert_eq!(cache.get_host_held_for_pod("p1"), None);
    assert_eq!(cache.get_summaries()[0].status(), HostStatus::Ready);
    assert_invariants(&cache);

    // Sweeping again is a no-op.
    let again = cache.reset_expired_held_host_summaries(clock_now(&clock));
    assert!(again.is_empty());
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
    use hostcache::utils::clock::Clock;
    clock.now()
}

#[test]
fn test_concurrent_double_acquire_grants_one_lease() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(2.0, 4096, 0, 0.0));

    let mut filter = HostFilter::with_resources(Resources::new(2.0, 0, 0, 0.0));
    filter.max_hosts = Some(1);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let filter = filter.clone();
                scope.spawn(move || cache.acquire_leases(&filter))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let granted: usize = results.iter().map(|r| r.leases.len()).sum();
    assert_eq!(granted, 1);
    let loser = results.iter().find(|r| r.leases.is_empty()).unwrap();
    assert_eq!(
        loser.filter_counts.get(&FilterReason::MismatchStatus),
        Some(&1)
    );
    assert_invariants(&cache);
}

#[test]
fn test_release_hold_for_unknown_pod_fails() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));

    cache.hold_for_pods("h1", &["p1".to_string()]).unwrap();
    assert!(matches!(
        cache.release_hold_for_pods("h1", &["p1".to_string(), "p2".to_string()]),
        Err(CacheError::NotFound(_))
    ));
    // All-or-nothing: p1 is still held.
    assert_eq!(cache.get_host_held_for_pod("p1").as_deref(), Some("h1"));

    cache
        .release_hold_for_pods("h1", &["p1".to_string()])
        .unwrap();
    assert_eq!(cache.get_host_held_for_pod("p1"), None);
    assert_invariants(&cache);
}

#[test]
fn test_operations_on_unknown_host_fail_not_found() {
    let (cache, _) = new_cache();
    assert!(matches!(
        cache.terminate_lease("ghost", "id"),
        Err(CacheError::NotFound(_))
    ));
    assert!(matches!(
        cache.complete_lease("ghost", "id", HashMap::new()),
        Err(CacheError::NotFound(_))
    ));
    assert!(matches!(
        cache.hold_for_pods("ghost", &["p1".to_string()]),
        Err(CacheError::NotFound(_))
    ));
}

#[test]
fn test_cluster_capacity_is_summed_across_hosts() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));
    add_host(&cache, "h2", Resources::new(2.0, 4096, 0, 0.0));

    cache.ingest_pod_event(PodEvent {
        hostname: "h1".to_string(),
        pod_id: "p1".to_string(),
        kind: PodEventKind::Launch,
        resources: Resources::new(1.0, 1024, 0, 0.0),
    });

    let totals = cache.get_cluster_capacity();
    assert!(totals.capacity.equals(&Resources::new(6.0, 12288, 0, 0.0)));
    assert!(totals.allocated.equals(&Resources::new(1.0, 1024, 0, 0.0)));
}

#[test]
fn test_pod_event_for_unknown_host_is_dropped() {
    let (cache, _) = new_cache();
    cache.ingest_pod_event(PodEvent {
        hostname: "ghost".to_string(),
        pod_id: "p1".to_string(),
        kind: PodEventKind::Launch,
        resources: Resources::new(1.0, 0, 0, 0.0),
    });
    assert_eq!(cache.counter(metrics::UNKNOWN_HOST_POD_EVENTS), 1);
    assert!(cache.get_summaries().is_empty());
}

#[test]
fn test_pod_launch_consumes_hold() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));
    cache.hold_for_pods("h1", &["p1".to_string()]).unwrap();

    cache.ingest_pod_event(PodEvent {
        hostname: "h1".to_string(),
        pod_id: "p1".to_string(),
        kind: PodEventKind::Launch,
        resources: Resources::new(1.0, 1024, 0, 0.0),
    });

    assert_eq!(cache.get_host_held_for_pod("p1"), None);
    let h1 = &cache.get_summaries()[0];
    assert_eq!(h1.status(), HostStatus::Ready);
    assert!(h1.pods().contains_key("p1"));
    assert_invariants(&cache);
}

#[test]
fn test_delete_host_abandons_leases_and_holds() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));
    cache.hold_for_pods("h1", &["p1".to_string()]).unwrap();

    cache.ingest_host_event(HostEvent::new(
        HostEventKind::DeleteHost,
        host_info("h1", Resources::default(), "2"),
    ));

    assert!(cache.get_summaries().is_empty());
    assert_eq!(cache.get_host_held_for_pod("p1"), None);
    assert!(matches!(
        cache.terminate_lease("h1", "any"),
        Err(CacheError::NotFound(_))
    ));
}

#[test]
fn test_stale_delete_is_ignored() {
    let (cache, _) = new_cache();
    cache.ingest_host_event(HostEvent::new(
        HostEventKind::AddHost,
        host_info("h1", Resources::new(4.0, 8192, 0, 0.0), "7"),
    ));
    cache.ingest_host_event(HostEvent::new(
        HostEventKind::DeleteHost,
        host_info("h1", Resources::default(), "4"),
    ));
    assert_eq!(cache.get_summaries().len(), 1);
    assert_eq!(cache.counter(metrics::STALE_HOST_EVENTS), 1);
}

#[test]
fn test_mesos_flow_uses_backend_available() {
    let (cache, _) = new_cache();
    let mut info = host_info("m1", Resources::new(8.0, 16384, 0, 0.0), "1");
    info.available = Resources::new(2.0, 2048, 0, 0.0);
    cache.ingest_host_event(HostEvent::new(HostEventKind::UpdateHostAvailableRes, info));

    let filter = HostFilter::with_resources(Resources::new(4.0, 4096, 0, 0.0));
    assert!(cache.acquire_leases(&filter).leases.is_empty());

    // A fresh offer raises the free capacity.
    let mut info = host_info("m1", Resources::new(8.0, 16384, 0, 0.0), "2");
    info.available = Resources::new(6.0, 8192, 0, 0.0);
    cache.ingest_host_event(HostEvent::new(HostEventKind::UpdateHostAvailableRes, info));

    let result = cache.acquire_leases(&filter);
    assert_eq!(result.leases.len(), 1);
    assert_eq!(result.leases[0].hostname, "m1");
}

#[test]
fn test_hold_moves_between_hosts() {
    let (cache, _) = new_cache();
    add_host(&cache, "h1", Resources::new(4.0, 8192, 0, 0.0));
    add_host(&cache, "h2", Resources::new(4.0, 8192, 0, 0.0));

    cache.hold_for_pods("h1", &["p1".to_string()]).unwrap();
    cache.hold_for_pods("h2", &["p1".to_string()]).unwrap();

    // The newer hold wins; h1's copy is released.
    assert_eq!(cache.get_host_held_for_pod("p1").as_deref(), Some("h2"));
    let summaries = cache.get_summaries();
    let h1 = summaries.iter().find(|s| s.hostname() == "h1").unwrap();
    assert_eq!(h1.status(), HostStatus::Ready);
    assert!(!h1.has_hold_for("p1"));
    assert_invariants(&cache);
}

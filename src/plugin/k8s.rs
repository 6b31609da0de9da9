//! Kubernetes backend: list-then-watch over Nodes and Pods, converted into
//! the cache's host and pod events. Node allocatable becomes host capacity;
//! container requests become pod resources. A watch failure or a reconcile
//! request falls back to a fresh list, which the cache's version check
//! absorbs.

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::events::{HostEvent, HostEventKind, HostInfo, PodEvent, PodEventKind};
use crate::k8s::K8sClient;
use crate::plugin::{EventStreams, Plugin};
use crate::resources::Resources;
use crate::utils::resource_quantity::{parse_cpu_cores, parse_quantity_count, parse_quantity_mb};

const RELIST_BACKOFF_SECS: u64 = 5;
const GPU_RESOURCE_KEY: &str = "nvidia.com/gpu";

pub struct K8sPlugin {
    client: K8sClient,
    default_disk_mb: u64,
    streams: Option<EventStreams>,
    host_tx: UnboundedSender<HostEvent>,
    pod_tx: UnboundedSender<PodEvent>,
    reconcile_tx: watch::Sender<()>,
    reconcile_rx: watch::Receiver<()>,
}

impl K8sPlugin {
    pub fn new(client: K8sClient, default_disk_mb: u64) -> Self {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (pod_tx, pod_rx) = mpsc::unbounded_channel();
        let (reconcile_tx, reconcile_rx) = watch::channel(());
        Self {
            client,
            default_disk_mb,
            streams: Some(EventStreams {
                host_events: host_rx,
                pod_events: pod_rx,
            }),
            host_tx,
            pod_tx,
            reconcile_tx,
            reconcile_rx,
        }
    }
}

impl Plugin for K8sPlugin {
    /// Hands over the channels and spawns the node/pod watch loops. Must be
    /// called from within a tokio runtime.
    fn event_streams(&mut self) -> EventStreams {
        match self.streams.take() {
            Some(streams) => {
                tokio::spawn(run_node_watch(
                    self.client.nodes(),
                    self.host_tx.clone(),
                    self.reconcile_rx.clone(),
                    self.default_disk_mb,
                ));
                tokio::spawn(run_pod_watch(
                    self.client.pods(None),
                    self.pod_tx.clone(),
                    self.reconcile_rx.clone(),
                ));
                streams
            }
            None => {
                warn!("k8s plugin event streams taken twice; returning closed channels");
                let (_host_tx, host_rx) = mpsc::unbounded_channel();
                let (_pod_tx, pod_rx) = mpsc::unbounded_channel();
                EventStreams {
                    host_events: host_rx,
                    pod_events: pod_rx,
                }
            }
        }
    }

    fn reconcile(&mut self) -> anyhow::Result<()> {
        self.reconcile_tx
            .send(())
            .map_err(|_| anyhow::anyhow!("watch loops have exited"))
    }
}

async fn run_node_watch(
    api: Api<Node>,
    tx: UnboundedSender<HostEvent>,
    mut reconcile_rx: watch::Receiver<()>,
    default_disk_mb: u64,
) {
    loop {
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                warn!("node list failed: {}", e);
                sleep(Duration::from_secs(RELIST_BACKOFF_SECS)).await;
                continue;
            }
        };
        let version = list.metadata.resource_version.clone().unwrap_or_default();
        debug!("listed {} nodes at version {}", list.items.len(), version);
        for node in &list.items {
            if let Some(event) = host_event_from_node(node, HostEventKind::AddHost, default_disk_mb)
            {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }

        let stream = match api.watch(&WatchParams::default(), &version).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("node watch failed to start: {}", e);
                sleep(Duration::from_secs(RELIST_BACKOFF_SECS)).await;
                continue;
            }
        };
        let mut stream = stream.boxed();
        loop {
            tokio::select! {
                changed = reconcile_rx.changed() => {
                    if changed.is_err() {
                        // Plugin dropped; nothing will ask for a re-list again.
                        return;
                    }
                    debug!("node watch: reconcile requested, re-listing");
                    break;
                }
                item = stream.try_next() => {
                    let event = match item {
                        Ok(Some(WatchEvent::Added(node))) => {
                            host_event_from_node(&node, HostEventKind::AddHost, default_disk_mb)
                        }
                        Ok(Some(WatchEvent::Modified(node))) => {
                            host_event_from_node(&node, HostEventKind::UpdateHostSpec, default_disk_mb)
                        }
                        Ok(Some(WatchEvent::Deleted(node))) => {
                            host_event_from_node(&node, HostEventKind::DeleteHost, default_disk_mb)
                        }
                        Ok(Some(WatchEvent::Bookmark(_))) => None,
                        Ok(Some(WatchEvent::Error(e))) => {
                            warn!("node watch error: {:?}", e);
                            break;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("node watch interrupted: {}", e);
                            break;
                        }
                    };
                    if let Some(event) = event {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn run_pod_watch(
    api: Api<Pod>,
    tx: UnboundedSender<PodEvent>,
    mut reconcile_rx: watch::Receiver<()>,
) {
    // Pod ids seen running, to distinguish Launch from Update.
    let mut known: HashSet<String> = HashSet::new();
    loop {
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                warn!("pod list failed: {}", e);
                sleep(Duration::from_secs(RELIST_BACKOFF_SECS)).await;
                continue;
            }
        };
        let version = list.metadata.resource_version.clone().unwrap_or_default();
        debug!("listed {} pods at version {}", list.items.len(), version);
        for pod in &list.items {
            if let Some(event) = pod_event_from_pod(pod, false, &mut known) {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }

        let stream = match api.watch(&WatchParams::default(), &version).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("pod watch failed to start: {}", e);
                sleep(Duration::from_secs(RELIST_BACKOFF_SECS)).await;
                continue;
            }
        };
        let mut stream = stream.boxed();
        loop {
            tokio::select! {
                changed = reconcile_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!("pod watch: reconcile requested, re-listing");
                    break;
                }
                item = stream.try_next() => {
                    let event = match item {
                        Ok(Some(WatchEvent::Added(pod))) | Ok(Some(WatchEvent::Modified(pod))) => {
                            pod_event_from_pod(&pod, false, &mut known)
                        }
                        Ok(Some(WatchEvent::Deleted(pod))) => {
                            pod_event_from_pod(&pod, true, &mut known)
                        }
                        Ok(Some(WatchEvent::Bookmark(_))) => None,
                        Ok(Some(WatchEvent::Error(e))) => {
                            warn!("pod watch error: {:?}", e);
                            break;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("pod watch interrupted: {}", e);
                            break;
                        }
                    };
                    if let Some(event) = event {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn host_event_from_node(
    node: &Node,
    kind: HostEventKind,
    default_disk_mb: u64,
) -> Option<HostEvent> {
    let hostname = node.metadata.name.clone()?;
    let status = node.status.as_ref();
    let quantities = status
        .and_then(|s| s.allocatable.as_ref())
        .or_else(|| status.and_then(|s| s.capacity.as_ref()));
    let capacity = match quantities {
        Some(quantities) => resources_from_quantities(quantities, default_disk_mb),
        None => Resources {
            disk_mb: default_disk_mb,
            ..Default::default()
        },
    };
    Some(HostEvent::new(
        kind,
        HostInfo {
            hostname,
            available: capacity.clone(),
            capacity,
            resource_version: node.metadata.resource_version.clone().unwrap_or_default(),
            labels: node.metadata.labels.clone().unwrap_or_default(),
        },
    ))
}

fn pod_event_from_pod(pod: &Pod, deleted: bool, known: &mut HashSet<String>) -> Option<PodEvent> {
    let hostname = pod.spec.as_ref()?.node_name.clone()?;
    let name = pod.metadata.name.clone()?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let pod_id = format!("{}/{}", namespace, name);

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");
    let reason = pod.status.as_ref().and_then(|s| s.reason.as_deref());

    let kind = if deleted || phase == "Succeeded" || phase == "Failed" {
        known.remove(&pod_id);
        if reason == Some("Evicted") {
            PodEventKind::Evict
        } else {
            PodEventKind::Kill
        }
    } else if known.insert(pod_id.clone()) {
        PodEventKind::Launch
    } else {
        PodEventKind::Update
    };

    Some(PodEvent {
        hostname,
        pod_id,
        kind,
        resources: pod_requests(pod),
    })
}

/// Sum of container resource requests; disk comes from ephemeral-storage
/// requests and is zero when absent.
fn pod_requests(pod: &Pod) -> Resources {
    let mut total = Resources::default();
    let Some(spec) = pod.spec.as_ref() else {
        return total;
    };
    for container in &spec.containers {
        if let Some(requests) = container
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
        {
            total = total.add(&resources_from_quantities(requests, 0));
        }
    }
    total
}

fn resources_from_quantities(
    quantities: &BTreeMap<String, Quantity>,
    default_disk_mb: u64,
) -> Resources {
    let get = |key: &str| quantities.get(key).map(|q| q.0.as_str());
    Resources {
        cpu: get("cpu").and_then(parse_cpu_cores).unwrap_or(0.0),
        mem_mb: get("memory").and_then(parse_quantity_mb).unwrap_or(0),
        disk_mb: get("ephemeral-storage")
            .and_then(parse_quantity_mb)
            .unwrap_or(default_disk_mb),
        gpu: get(GPU_RESOURCE_KEY)
            .and_then(parse_quantity_count)
            .unwrap_or(0.0),
        custom: BTreeMap::new(),
    }
}

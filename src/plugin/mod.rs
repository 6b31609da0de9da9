//! Cluster backend plugins: the contract the cache consumes events through,
//! plus the built-in backends (Kubernetes informer, in-process channels).
//!
//! A plugin owns list-then-watch semantics; the cache makes no assumptions
//! about the backend protocol beyond the event types.

pub mod channel;
pub mod k8s;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::events::{HostEvent, PodEvent};

/// The receiving halves of a backend's event channels.
pub struct EventStreams {
    pub host_events: UnboundedReceiver<HostEvent>,
    pub pod_events: UnboundedReceiver<PodEvent>,
}

#[cfg_attr(test, mockall::automock)]
pub trait Plugin: Send {
    /// Hand over the backend's event channels. Called exactly once, when
    /// the cache starts; a backend may begin streaming from this point.
    fn event_streams(&mut self) -> EventStreams;

    /// Trigger a backend re-list. Re-emitted AddHost events merge into the
    /// index through the resource-version check.
    fn reconcile(&mut self) -> anyhow::Result<()>;
}

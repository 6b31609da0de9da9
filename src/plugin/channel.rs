//! In-process plugin fed by the caller. Used by tests and by Mesos-style
//! offer pipelines that already speak the cache's event types.

use log::warn;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::events::{HostEvent, PodEvent};
use crate::plugin::{EventStreams, Plugin};

/// The sending halves kept by whoever feeds the plugin.
#[derive(Clone)]
pub struct ChannelFeed {
    pub host_events: UnboundedSender<HostEvent>,
    pub pod_events: UnboundedSender<PodEvent>,
}

pub struct ChannelPlugin {
    streams: Option<EventStreams>,
}

impl ChannelPlugin {
    pub fn new() -> (Self, ChannelFeed) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (pod_tx, pod_rx) = mpsc::unbounded_channel();
        (
            Self {
                streams: Some(EventStreams {
                    host_events: host_rx,
                    pod_events: pod_rx,
                }),
            },
            ChannelFeed {
                host_events: host_tx,
                pod_events: pod_tx,
            },
        )
    }
}

impl Plugin for ChannelPlugin {
    fn event_streams(&mut self) -> EventStreams {
        match self.streams.take() {
            Some(streams) => streams,
            None => {
                warn!("channel plugin event streams taken twice; returning closed channels");
                closed_streams()
            }
        }
    }

    fn reconcile(&mut self) -> anyhow::Result<()> {
        // The feeder owns the event source; nothing to re-list here.
        Ok(())
    }
}

fn closed_streams() -> EventStreams {
    let (_host_tx, host_rx) = mpsc::unbounded_channel();
    let (_pod_tx, pod_rx) = mpsc::unbounded_channel();
    EventStreams {
        host_events: host_rx,
        pod_events: pod_rx,
    }
}

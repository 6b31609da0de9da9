//! Closed error set returned by the host cache to the RPC handler layer.
//! Handlers map these onto standard RPC codes; the cache never panics on
//! externally-caused conditions.

use thiserror::Error;

use crate::host::types::HostStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Hostname absent from the index, or pod id absent from the hold index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Presented lease id does not match the current lease, or the host is
    /// not in Placing status.
    #[error("invalid lease {lease_id} for host {hostname}")]
    InvalidLease { hostname: String, lease_id: String },

    /// Requested pod resources exceed the host's free capacity.
    #[error("insufficient resources on host {0}")]
    InsufficientResources(String),

    /// Operation not permitted in the host's current status.
    #[error("host {hostname} is {status:?}")]
    ConflictingStatus {
        hostname: String,
        status: HostStatus,
    },

    /// Ingest-side only: event carries an older resource version than the
    /// summary. Dropped with a metric, never surfaced to callers.
    #[error("stale event for host {hostname}: version {event_version} < {current_version}")]
    OldEventVersion {
        hostname: String,
        event_version: String,
        current_version: String,
    },

    /// Invariant violation. Surfaced to callers as opaque.
    #[error("internal: {0}")]
    Internal(String),
}

//! Types shared by the per-host summary state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// Operational status of a host w.r.t. placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    /// No active lease or holds; eligible for placement.
    Ready,
    /// An exclusive lease is outstanding.
    Placing,
    /// Reserved on behalf of one or more pod ids; still matchable.
    Held,
}

/// Which backend flavor owns the host. Determines whether free capacity is
/// derived (`Kubelet`: capacity − allocated) or backend-supplied (`Mesos`:
/// the available field from UpdateHostAvailableRes events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostKind {
    Kubelet,
    Mesos,
}

/// Short-lived exclusive claim on a host's free capacity, handed to the
/// placement engine. Opaque to callers beyond `lease_id`, which must be
/// presented verbatim to complete or terminate the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub hostname: String,
    pub lease_id: String,
    /// Snapshot of the host's free resources at acquisition time.
    pub offered: Resources,
    pub expires_at: DateTime<Utc>,
}

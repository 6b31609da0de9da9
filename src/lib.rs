//! In-memory host cache for a cluster workload manager: the authoritative,
//! process-local index of every worker machine known to the manager, used by
//! a placement engine to reserve capacity for pods via short-lived exclusive
//! leases.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod k8s;
pub mod matcher;
pub mod plugin;
pub mod resources;
pub mod utils;

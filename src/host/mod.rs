pub mod summary;
pub mod types;

pub use summary::HostSummary;
pub use types::{HostKind, HostStatus, Lease};

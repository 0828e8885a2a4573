//! Network Module
//!
//! Node identity resolution and the reachability probe used to detect
//! stale seed records.

pub mod identity;
pub mod probe;

pub use identity::NodeIdentity;
pub use probe::{PingProbe, ReachabilityProbe};

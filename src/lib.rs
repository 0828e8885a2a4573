//! SeedPilot - Seed Election for Self-Organizing Cassandra Clusters
//!
//! Identical nodes started at the same time agree on exactly one
//! bootstrap seed through a Consul-like coordination store, then
//! configure themselves to join it. Every entry point is a short-lived
//! lifecycle hook run by an external process supervisor.
//!
//! # Architecture
//!
//! - `coordination`: key/value, session and lock primitives (Consul HTTP
//!   API, plus an in-process store)
//! - `network`: node identity and the reachability probe
//! - `state`: seed election and the `pre_start` / `pre_stop` / `health`
//!   hooks
//! - `executor`: the clustered service the hooks configure and query
//!
//! # Guarantees
//!
//! - The seed claim uses the store's conditional acquire, so concurrent
//!   first starters produce a single seed
//! - A seed leaving cleanly frees the slot; a seed found unreachable by a
//!   departing node is cleared so the next starter can claim it
//! - A crashed seed's lock is released by session TTL expiry

pub mod config;
pub mod error;
pub mod coordination;
pub mod network;
pub mod state;
pub mod executor;

pub use config::SeedPilotConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SeedPilotConfig;
    pub use crate::error::{Error, Result};
    pub use crate::coordination::{ConsulClient, CoordinationStore, MemoryStore, SessionCache};
    pub use crate::network::{NodeIdentity, PingProbe, ReachabilityProbe};
    pub use crate::state::{HookContext, HookOutcome, LifecycleCommand, LifecycleNode, SeedState};
    pub use crate::executor::{CassandraService, ClusterService, NodeStatus, SeedList};
}

//! Clustered Service Module
//!
//! The lifecycle hooks drive the clustered service (Cassandra) through
//! the `ClusterService` trait: hand it a seed list, have it rewrite its
//! persistent configuration, and ask it for a node's status.

mod cassandra;
mod config_file;

pub use cassandra::{parse_status_output, CassandraService};
pub use config_file::CassandraYaml;

use crate::error::Result;

/// Seeds a node is configured with
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeedList {
    /// This node is the seed
    #[default]
    Own,
    /// Join through these seeds
    Join(Vec<String>),
}

impl SeedList {
    /// Seed addresses as written into the configuration
    pub fn addresses(&self, own_address: &str) -> Vec<String> {
        match self {
            SeedList::Own => vec![own_address.to_string()],
            SeedList::Join(seeds) => seeds.clone(),
        }
    }

    pub fn is_joining(&self) -> bool {
        matches!(self, SeedList::Join(_))
    }
}

/// Gossip state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Up,
    Down,
}

/// Ring operation a node is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    Normal,
    Leaving,
    Joining,
    Moving,
}

/// Status of one node as reported by the service, e.g. `UN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    pub mode: NodeMode,
}

impl NodeStatus {
    /// Parse a two-letter status code (`UN`, `DL`, ...)
    pub fn parse(code: &str) -> Option<Self> {
        let mut chars = code.chars();
        let state = match chars.next()? {
            'U' => NodeState::Up,
            'D' => NodeState::Down,
            _ => return None,
        };
        let mode = match chars.next()? {
            'N' => NodeMode::Normal,
            'L' => NodeMode::Leaving,
            'J' => NodeMode::Joining,
            'M' => NodeMode::Moving,
            _ => return None,
        };
        if chars.next().is_some() {
            return None;
        }
        Some(Self { state, mode })
    }

    /// Up and Normal is the only healthy status
    pub fn is_healthy(&self) -> bool {
        self.state == NodeState::Up && self.mode == NodeMode::Normal
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            NodeState::Up => 'U',
            NodeState::Down => 'D',
        };
        let mode = match self.mode {
            NodeMode::Normal => 'N',
            NodeMode::Leaving => 'L',
            NodeMode::Joining => 'J',
            NodeMode::Moving => 'M',
        };
        write!(f, "{}{}", state, mode)
    }
}

/// Capabilities of the clustered service used by the lifecycle hooks
#[async_trait::async_trait]
pub trait ClusterService: Send + Sync {
    /// Seeds to write on the next `update_config`
    fn set_seeds(&mut self, seeds: SeedList);

    /// Rewrite the service's persistent configuration with the current
    /// seeds and `listen_address`, preserving unrelated content
    async fn update_config(&mut self, listen_address: &str) -> Result<()>;

    /// Status of the node at `address`, `None` when the service does not
    /// list it
    async fn node_status(&self, address: &str) -> Result<Option<NodeStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let un = NodeStatus::parse("UN").unwrap();
        assert!(un.is_healthy());
        assert_eq!(un.to_string(), "UN");

        for code in ["DN", "UJ", "UL", "UM", "DL"] {
            let status = NodeStatus::parse(code).unwrap();
            assert!(!status.is_healthy(), "{} must not be healthy", code);
            assert_eq!(status.to_string(), code);
        }

        assert!(NodeStatus::parse("").is_none());
        assert!(NodeStatus::parse("U").is_none());
        assert!(NodeStatus::parse("UNX").is_none());
        assert!(NodeStatus::parse("--").is_none());
    }

    #[test]
    fn test_seed_list_addresses() {
        assert_eq!(SeedList::Own.addresses("10.0.0.1"), vec!["10.0.0.1"]);
        let join = SeedList::Join(vec!["10.0.0.1".to_string()]);
        assert_eq!(join.addresses("10.0.0.2"), vec!["10.0.0.1"]);
        assert!(join.is_joining());
        assert!(!SeedList::Own.is_joining());
    }
}

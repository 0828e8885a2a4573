//! Coordination Store Module
//!
//! Typed key/value, session and lock operations against an external
//! linearizable store (Consul). This layer carries no election logic and
//! never retries: a failed request is returned to the hook, and the
//! supervisor re-runs the hook.

mod consul;
mod memory;
mod session;

pub use consul::ConsulClient;
pub use memory::MemoryStore;
pub use session::SessionCache;

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shortest session TTL the store accepts
pub const MIN_SESSION_TTL_SECS: u64 = 1;

/// Longest session TTL the store accepts
pub const MAX_SESSION_TTL_SECS: u64 = 3600;

/// Opaque session identifier issued by the store
pub type SessionId = String;

/// What the store does with a session's locks when it is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Locks are released, keys stay
    #[default]
    Release,
    /// Locked keys are deleted
    Delete,
}

impl std::fmt::Display for SessionBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionBehavior::Release => write!(f, "release"),
            SessionBehavior::Delete => write!(f, "delete"),
        }
    }
}

/// Parameters for creating a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: String,
    pub ttl: Duration,
    pub behavior: SessionBehavior,
    /// Time the store refuses to re-grant a lock after this session is
    /// invalidated
    pub lock_delay: Duration,
}

impl SessionRequest {
    /// Build a release-on-invalidate session request with no lock delay;
    /// the TTL is clamped to what the store accepts.
    pub fn new(name: impl Into<String>, ttl_secs: u64) -> Self {
        let clamped = clamp_ttl(ttl_secs);
        if clamped != ttl_secs {
            tracing::warn!(
                "Session TTL {}s outside [{}, {}], using {}s",
                ttl_secs,
                MIN_SESSION_TTL_SECS,
                MAX_SESSION_TTL_SECS,
                clamped
            );
        }
        Self {
            name: name.into(),
            ttl: Duration::from_secs(clamped),
            behavior: SessionBehavior::Release,
            lock_delay: Duration::ZERO,
        }
    }

    pub fn with_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// Clamp a TTL in seconds to `[MIN_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS]`
pub fn clamp_ttl(ttl_secs: u64) -> u64 {
    ttl_secs.clamp(MIN_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS)
}

/// Raw view of a stored key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvEntry {
    /// Stored bytes (empty when the key carries no value)
    pub value: Vec<u8>,
    /// Session holding the key's lock, if any
    pub session: Option<SessionId>,
}

/// Lock holder and stored value of a key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockState {
    pub session: Option<SessionId>,
    pub value: Option<Vec<u8>>,
}

/// Operations the lifecycle hooks need from the coordination store
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Fetch a key with its lock metadata; `None` when absent
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>>;

    /// Unconditional upsert
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key; deleting an absent key succeeds
    async fn delete(&self, key: &str) -> Result<()>;

    /// Create a session and return its id
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionId>;

    /// Extend a session's TTL
    async fn renew_session(&self, session: &str) -> Result<()>;

    /// Invalidate a session, applying its behavior to held locks
    async fn destroy_session(&self, session: &str) -> Result<()>;

    /// Write `value` and take the lock if it is free or already ours
    async fn acquire_lock(&self, key: &str, value: &[u8], session: &str) -> Result<bool>;

    /// Drop the lock held by `session` and clear the stored value
    async fn release_lock(&self, key: &str, session: &str) -> Result<bool>;

    /// Value stored under `key`; absent is not an error
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entry(key).await?.map(|e| e.value))
    }

    /// Session currently holding the lock on `key`
    async fn lock_holder(&self, key: &str) -> Result<Option<SessionId>> {
        Ok(self.entry(key).await?.and_then(|e| e.session))
    }

    /// Lock holder and value of `key`; both `None` when the key is absent
    /// or carries no value
    async fn read_lock(&self, key: &str) -> Result<LockState> {
        match self.entry(key).await? {
            Some(entry) if !entry.value.is_empty() => Ok(LockState {
                session: entry.session,
                value: Some(entry.value),
            }),
            _ => Ok(LockState::default()),
        }
    }
}

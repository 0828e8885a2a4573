//! In-process coordination store
//!
//! Implements the same contract as the Consul client behind a single
//! mutex, so every operation is linearizable. Session TTLs are checked
//! lazily on each call; an expired session is invalidated exactly as
//! the store would do it, releasing (or deleting) the keys it locked.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CoordinationStore, KvEntry, SessionBehavior, SessionId, SessionRequest};
use crate::error::{Error, Result};

struct SessionRecord {
    name: String,
    ttl: Duration,
    behavior: SessionBehavior,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, KvEntry>,
    sessions: HashMap<SessionId, SessionRecord>,
    sessions_created: u64,
}

impl Inner {
    /// Invalidate every session whose TTL has lapsed
    fn reap(&mut self, now: Instant) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            tracing::debug!("Session {} expired", id);
            self.invalidate(&id);
        }
    }

    fn invalidate(&mut self, id: &str) {
        let Some(session) = self.sessions.remove(id) else {
            return;
        };

        match session.behavior {
            SessionBehavior::Release => {
                for entry in self.kv.values_mut() {
                    if entry.session.as_deref() == Some(id) {
                        entry.session = None;
                    }
                }
            }
            SessionBehavior::Delete => {
                self.kv.retain(|_, entry| entry.session.as_deref() != Some(id));
            }
        }
    }

    fn require_session(&self, id: &str) -> Result<()> {
        if self.sessions.contains_key(id) {
            Ok(())
        } else {
            Err(Error::InvalidSession(id.to_string()))
        }
    }
}

/// Linearizable in-memory implementation of [`CoordinationStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions created over the store's lifetime
    pub async fn sessions_created(&self) -> u64 {
        self.inner.lock().await.sessions_created
    }

    /// Check whether a session is still live
    pub async fn session_exists(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        inner.sessions.contains_key(id)
    }

    /// Name a live session was created with
    pub async fn session_name(&self, id: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        inner.sessions.get(id).map(|s| s.name.clone())
    }

    /// Invalidate a session as if its TTL had lapsed
    pub async fn expire_session(&self, id: &str) {
        self.inner.lock().await.invalidate(id);
    }

    /// All keys currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut keys: Vec<String> = inner.kv.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>> {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        Ok(inner.kv.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        let entry = inner.kv.entry(key.to_string()).or_default();
        entry.value = value.to_vec();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        Ok(())
    }

    async fn create_session(&self, request: &SessionRequest) -> Result<SessionId> {
        let mut inner = self.inner.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        inner.sessions.insert(
            id.clone(),
            SessionRecord {
                name: request.name.clone(),
                ttl: request.ttl,
                behavior: request.behavior,
                expires_at: Instant::now() + request.ttl,
            },
        );
        inner.sessions_created += 1;
        Ok(id)
    }

    async fn renew_session(&self, session: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.reap(now);
        match inner.sessions.get_mut(session) {
            Some(record) => {
                record.expires_at = now + record.ttl;
                Ok(())
            }
            None => Err(Error::InvalidSession(session.to_string())),
        }
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        self.inner.lock().await.invalidate(session);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        inner.require_session(session)?;

        let entry = inner.kv.entry(key.to_string()).or_default();
        match entry.session.as_deref() {
            Some(holder) if holder != session => Ok(false),
            _ => {
                entry.session = Some(session.to_string());
                entry.value = value.to_vec();
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str, session: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.reap(Instant::now());
        inner.require_session(session)?;

        match inner.kv.get_mut(key) {
            Some(entry) if entry.session.as_deref() == Some(session) => {
                entry.session = None;
                entry.value.clear();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

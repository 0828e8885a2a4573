//! Seed Election
//!
//! Decides which node bootstraps the cluster. The claim goes through the
//! store's conditional acquire on `<seed_key>_lock`; only the lock winner
//! writes the seed record. The record itself is a plain key, so it
//! outlives the winner's session and keeps pointing joiners at the seed
//! until the seed leaves or another node finds it unreachable.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SeedPilotConfig;
use crate::coordination::{CoordinationStore, SessionCache};
use crate::error::{Error, Result};

/// Canonical address of the cluster's seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord(String);

impl SeedRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Parse a stored value; empty or non-UTF-8 values are no record
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.trim();
        if text.is_empty() {
            None
        } else {
            Some(Self(text.to_string()))
        }
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// Check whether the record names `address`
    pub fn names(&self, address: &str) -> bool {
        self.0 == address
    }
}

impl std::fmt::Display for SeedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Election {
    /// This node is the seed
    Claimed,
    /// Another node is the seed; join it
    Join(SeedRecord),
}

/// Claims, reads and clears the seed record
pub struct SeedElection {
    store: Arc<dyn CoordinationStore>,
    sessions: SessionCache,
    seed_key: String,
    lock_key: String,
    claim_attempts: u32,
    claim_retry: Duration,
}

impl SeedElection {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &SeedPilotConfig) -> Self {
        Self {
            store,
            sessions: SessionCache::from_config(&config.session),
            seed_key: config.cluster.seed_key.clone(),
            lock_key: config.seed_lock_key(),
            claim_attempts: config.cluster.claim_attempts.max(1),
            claim_retry: Duration::from_millis(config.cluster.claim_retry_millis),
        }
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Current seed record, if any
    pub async fn current_seed(&self) -> Result<Option<SeedRecord>> {
        Ok(self
            .store
            .get(&self.seed_key)
            .await?
            .and_then(|value| SeedRecord::parse(&value)))
    }

    /// Claim the seed role for `address`, or find the seed to join
    pub async fn claim_or_join(&self, address: &str) -> Result<Election> {
        for attempt in 1..=self.claim_attempts {
            if let Some(seed) = self.current_seed().await? {
                if seed.names(address) {
                    tracing::info!("Seed record already names this node ({})", address);
                    return Ok(Election::Claimed);
                }
                return Ok(Election::Join(seed));
            }

            if self.acquire(address).await? {
                self.store.put(&self.seed_key, address.as_bytes()).await?;
                tracing::info!("Claimed seed role: {} = {}", self.seed_key, address);
                return Ok(Election::Claimed);
            }

            tracing::info!("Lost seed claim race (attempt {})", attempt);

            if let Some(seed) = self.current_seed().await? {
                return Ok(Election::Join(seed));
            }

            // The winner holds the lock but has not written the record yet
            if let Some(seed) = self.lock_owner().await? {
                if seed.names(address) {
                    // Held by an earlier session of this node
                    self.store.put(&self.seed_key, address.as_bytes()).await?;
                    return Ok(Election::Claimed);
                }
                return Ok(Election::Join(seed));
            }

            if attempt < self.claim_attempts {
                tracing::warn!(
                    "Seed lock refused but no holder visible, retrying claim in {:?}",
                    self.claim_retry
                );
                tokio::time::sleep(self.claim_retry).await;
            }
        }

        Err(Error::Election(format!(
            "no seed visible after {} claim attempts",
            self.claim_attempts
        )))
    }

    /// Conditional acquire of the seed lock; a stale cached session is
    /// replaced once
    async fn acquire(&self, address: &str) -> Result<bool> {
        let session = self.sessions.get_or_create(self.store.as_ref(), true).await?;
        match self
            .store
            .acquire_lock(&self.lock_key, address.as_bytes(), &session)
            .await
        {
            Err(e) if e.is_invalid_session() => {
                tracing::warn!("Cached session {} no longer exists, creating a new one", session);
                let session = self.sessions.get_or_create(self.store.as_ref(), false).await?;
                self.store
                    .acquire_lock(&self.lock_key, address.as_bytes(), &session)
                    .await
            }
            other => other,
        }
    }

    /// Address written under the lock by its live holder
    async fn lock_owner(&self) -> Result<Option<SeedRecord>> {
        let lock = self.store.read_lock(&self.lock_key).await?;
        if lock.session.is_none() {
            return Ok(None);
        }
        Ok(lock.value.and_then(|value| SeedRecord::parse(&value)))
    }

    /// Give up the seed role: drop the record and our hold on the lock
    pub async fn relinquish(&self) -> Result<()> {
        self.store.delete(&self.seed_key).await?;
        tracing::info!("Removed seed record {}", self.seed_key);

        if let Some(session) = self.sessions.load().await {
            match self.store.release_lock(&self.lock_key, &session).await {
                Ok(true) => tracing::info!("Released seed lock {}", self.lock_key),
                Ok(false) => tracing::debug!("Seed lock {} not held by {}", self.lock_key, session),
                Err(e) => tracing::warn!("Could not release seed lock {}: {}", self.lock_key, e),
            }
        }
        Ok(())
    }

    /// Delete a record that names an unreachable seed
    pub async fn clear_stale(&self, seed: &SeedRecord) -> Result<()> {
        self.store.delete(&self.seed_key).await?;
        tracing::warn!("Removed stale seed record pointing at unreachable {}", seed);
        Ok(())
    }

    /// Destroy this node's cached session and forget it
    pub async fn retire_session(&self) {
        if let Some(session) = self.sessions.load().await {
            match self.store.destroy_session(&session).await {
                Ok(()) => tracing::debug!("Destroyed session {}", session),
                Err(e) => tracing::warn!("Could not destroy session {}: {}", session, e),
            }
        }
        if let Err(e) = self.sessions.invalidate().await {
            tracing::warn!("Could not remove session cache {:?}: {}", self.sessions.path(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{MemoryStore, SessionRequest};
    use tempfile::tempdir;

    fn election(store: Arc<MemoryStore>, cache: &std::path::Path) -> SeedElection {
        let mut config = SeedPilotConfig::default();
        config.session.cache_file = cache.to_path_buf();
        config.cluster.claim_retry_millis = 0;
        SeedElection::new(store, &config)
    }

    #[test]
    fn test_seed_record_parse() {
        assert_eq!(SeedRecord::parse(b" 10.0.0.1\n"), Some(SeedRecord::new("10.0.0.1")));
        assert_eq!(SeedRecord::parse(b""), None);
        assert_eq!(SeedRecord::parse(b"   "), None);
        assert_eq!(SeedRecord::parse(&[0xff, 0xfe]), None);
        assert!(SeedRecord::new("10.0.0.1").names("10.0.0.1"));
        assert!(!SeedRecord::new("10.0.0.10").names("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_claim_on_empty_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let e = election(store.clone(), &dir.path().join("s"));

        assert_eq!(e.claim_or_join("10.0.0.1").await.unwrap(), Election::Claimed);
        assert_eq!(store.get("cluster_seeds").await.unwrap(), Some(b"10.0.0.1".to_vec()));
        assert!(store.lock_holder("cluster_seeds_lock").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_join_existing_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("cluster_seeds", b"10.0.0.1").await.unwrap();

        let e = election(store.clone(), &dir.path().join("s"));
        assert_eq!(
            e.claim_or_join("10.0.0.2").await.unwrap(),
            Election::Join(SeedRecord::new("10.0.0.1"))
        );
        // Joiners never need a session
        assert_eq!(store.sessions_created().await, 0);
    }

    #[tokio::test]
    async fn test_lost_race_before_record_written() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let winner = store.create_session(&SessionRequest::new("other", 25)).await.unwrap();
        assert!(store.acquire_lock("cluster_seeds_lock", b"10.0.0.9", &winner).await.unwrap());

        let e = election(store.clone(), &dir.path().join("s"));
        assert_eq!(
            e.claim_or_join("10.0.0.2").await.unwrap(),
            Election::Join(SeedRecord::new("10.0.0.9"))
        );
        assert_eq!(store.get("cluster_seeds").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_held_by_earlier_session_of_this_node() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let earlier = store
            .create_session(&SessionRequest::new("before-restart", 25))
            .await
            .unwrap();
        assert!(store.acquire_lock("cluster_seeds_lock", b"10.0.0.1", &earlier).await.unwrap());

        let e = election(store.clone(), &dir.path().join("s"));
        assert_eq!(e.claim_or_join("10.0.0.1").await.unwrap(), Election::Claimed);
        assert_eq!(store.get("cluster_seeds").await.unwrap(), Some(b"10.0.0.1".to_vec()));
        assert_eq!(store.lock_holder("cluster_seeds_lock").await.unwrap(), Some(earlier));
    }

    #[tokio::test]
    async fn test_claim_attempts_exhausted() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        // Held, but the holder never wrote an address
        let other = store.create_session(&SessionRequest::new("other", 25)).await.unwrap();
        assert!(store.acquire_lock("cluster_seeds_lock", b"", &other).await.unwrap());

        let e = election(store.clone(), &dir.path().join("s"));
        let err = e.claim_or_join("10.0.0.2").await.unwrap_err();
        assert!(matches!(err, Error::Election(ref msg) if msg.contains("3 claim attempts")));
        assert_eq!(store.get("cluster_seeds").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_cached_session_replaced() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("s");
        std::fs::write(&cache, "expired-session").unwrap();
        let store = Arc::new(MemoryStore::new());

        let e = election(store.clone(), &cache);
        assert_eq!(e.claim_or_join("10.0.0.1").await.unwrap(), Election::Claimed);

        let cached = std::fs::read_to_string(&cache).unwrap();
        assert_ne!(cached, "expired-session");
        assert_eq!(store.lock_holder("cluster_seeds_lock").await.unwrap(), Some(cached));
    }

    #[tokio::test]
    async fn test_relinquish_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let e = election(store.clone(), &dir.path().join("s"));
        e.claim_or_join("10.0.0.1").await.unwrap();

        e.relinquish().await.unwrap();
        assert_eq!(store.get("cluster_seeds").await.unwrap(), None);
        assert_eq!(store.lock_holder("cluster_seeds_lock").await.unwrap(), None);

        e.relinquish().await.unwrap();
        assert_eq!(store.get("cluster_seeds").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retire_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let e = election(store.clone(), &dir.path().join("s"));
        e.claim_or_join("10.0.0.1").await.unwrap();

        let session = e.sessions().load().await.unwrap();
        e.retire_session().await;

        assert!(!store.session_exists(&session).await);
        assert!(e.sessions().load().await.is_none());
        // Lock went with the session
        assert_eq!(store.lock_holder("cluster_seeds_lock").await.unwrap(), None);
    }
}

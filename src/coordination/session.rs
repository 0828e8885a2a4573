//! Session id cache
//!
//! Hooks run as separate processes, so the session holding the seed lock
//! cannot live in memory. Its id is kept in a local file, one file per
//! logical session name. The cached id is trusted as-is: if the session
//! has since expired, the next lock operation fails and the caller
//! creates a fresh one.

use std::path::{Path, PathBuf};

use super::{CoordinationStore, SessionId, SessionRequest};
use crate::config::SessionConfig;
use crate::error::Result;

/// Durable single-value cache of a session id
#[derive(Debug, Clone)]
pub struct SessionCache {
    name: String,
    ttl_secs: u64,
    path: PathBuf,
}

impl SessionCache {
    pub fn new(name: impl Into<String>, ttl_secs: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            ttl_secs,
            path: path.into(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.name.clone(), config.ttl_secs, config.cache_file.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached session id, if the file is readable and non-empty.
    /// Any read failure is a cache miss.
    pub async fn load(&self) -> Option<SessionId> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let id = content.trim();
                if id.is_empty() {
                    None
                } else {
                    Some(id.to_string())
                }
            }
            Err(e) => {
                tracing::debug!("Session cache {:?} unavailable: {}", self.path, e);
                None
            }
        }
    }

    /// Return the cached session id, or create a session and cache it.
    /// With `use_cache == false` a new session is always created and
    /// overwrites the cache.
    pub async fn get_or_create(
        &self,
        store: &dyn CoordinationStore,
        use_cache: bool,
    ) -> Result<SessionId> {
        if use_cache {
            if let Some(id) = self.load().await {
                tracing::debug!("Using cached session {} ({})", id, self.name);
                return Ok(id);
            }
        }

        let request = SessionRequest::new(self.name.clone(), self.ttl_secs);
        let id = store.create_session(&request).await?;
        tracing::info!(
            "Created session {} ({}, ttl {}s, {})",
            id,
            self.name,
            request.ttl.as_secs(),
            request.behavior
        );

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, id.as_bytes()).await?;
        Ok(id)
    }

    /// Renew the cached session; returns the renewed id, or `None` when
    /// nothing is cached.
    pub async fn renew(&self, store: &dyn CoordinationStore) -> Result<Option<SessionId>> {
        match self.load().await {
            Some(id) => {
                store.renew_session(&id).await?;
                tracing::debug!("Renewed session {}", id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Forget the cached id
    pub async fn invalidate(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Consul HTTP API client
//!
//! Thin typed wrapper over `/v1/kv` and `/v1/session`. Absence is
//! reported as `None`; every transport or protocol failure is returned
//! to the caller without retrying.

use std::time::Duration;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{CoordinationStore, KvEntry, SessionId, SessionRequest};
use crate::config::SeedPilotConfig;
use crate::error::{Error, Result};

/// One element of a `GET /v1/kv/<key>` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    /// Base64 encoded value, null when empty
    #[serde(default)]
    value: Option<String>,
    /// Lock holder
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreateBody<'a> {
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: String,
    lock_delay: String,
}

impl<'a> SessionCreateBody<'a> {
    fn from_request(request: &'a SessionRequest) -> Self {
        Self {
            name: &request.name,
            ttl: format!("{}s", request.ttl.as_secs()),
            behavior: request.behavior.to_string(),
            lock_delay: format!("{}s", request.lock_delay.as_secs()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

/// Client for a Consul agent or server
pub struct ConsulClient {
    base_url: String,
    http: reqwest::Client,
}

impl ConsulClient {
    /// Create a client for the API at `base_url` (e.g. `http://consul:8500`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(config: &SeedPilotConfig) -> Result<Self> {
        Self::new(config.consul_url(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn session_url(&self, action: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/v1/session/{}/{}", self.base_url, action, id),
            None => format!("{}/v1/session/{}", self.base_url, action),
        }
    }
}

/// Turn non-2xx responses into errors carrying the status and body
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::StoreStatus {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

/// Map "unknown session" responses onto `Error::InvalidSession`
fn session_error(err: Error, session: &str) -> Error {
    match &err {
        Error::StoreStatus { status, body }
            if *status == 404 || body.to_lowercase().contains("invalid session") =>
        {
            Error::InvalidSession(session.to_string())
        }
        _ => err,
    }
}

fn parse_bool(body: &str) -> Result<bool> {
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::Store(format!("expected true/false, got '{}'", other))),
    }
}

fn decode_entry(pairs: Vec<KvPair>) -> Result<Option<KvEntry>> {
    let Some(pair) = pairs.into_iter().next() else {
        return Ok(None);
    };
    let value = match pair.value {
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Store(format!("invalid base64 value: {}", e)))?,
        None => Vec::new(),
    };
    Ok(Some(KvEntry {
        value,
        session: pair.session.filter(|s| !s.is_empty()),
    }))
}

#[async_trait::async_trait]
impl CoordinationStore for ConsulClient {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>> {
        let response = self.http.get(self.kv_url(key)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let pairs: Vec<KvPair> = check(response).await?.json().await?;
        decode_entry(pairs)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let response = self
            .http
            .put(self.kv_url(key))
            .body(value.to_vec())
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        if parse_bool(&body)? {
            Ok(())
        } else {
            Err(Error::Store(format!("write of '{}' was rejected", key)))
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.http.delete(self.kv_url(key)).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn create_session(&self, request: &SessionRequest) -> Result<SessionId> {
        let body = SessionCreateBody::from_request(request);
        let response = self
            .http
            .put(self.session_url("create", None))
            .json(&body)
            .send()
            .await?;
        let created: SessionCreated = check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn renew_session(&self, session: &str) -> Result<()> {
        let response = self
            .http
            .put(self.session_url("renew", Some(session)))
            .send()
            .await?;
        check(response).await.map_err(|e| session_error(e, session))?;
        Ok(())
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        let response = self
            .http
            .put(self.session_url("destroy", Some(session)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        let response = self
            .http
            .put(self.kv_url(key))
            .query(&[("acquire", session)])
            .body(value.to_vec())
            .send()
            .await?;
        let body = check(response)
            .await
            .map_err(|e| session_error(e, session))?
            .text()
            .await?;
        parse_bool(&body)
    }

    async fn release_lock(&self, key: &str, session: &str) -> Result<bool> {
        let response = self
            .http
            .put(self.kv_url(key))
            .query(&[("release", session)])
            .send()
            .await?;
        let body = check(response)
            .await
            .map_err(|e| session_error(e, session))?
            .text()
            .await?;
        parse_bool(&body)
    }
}

// src/sync.rs
//! HTTP mirror of the credential collection.
//!
//! The remote exposes a single collection endpoint:
//!
//! | Request | Meaning |
//! |---------|---------|
//! | `GET <base>?searchQuery=<q>` | list, optionally filtered |
//! | `POST <base>` | create |
//! | `PUT <base>/<id>` | partial update |
//! | `DELETE <base>/<id>` | delete |
//!
//! Records travel with snake_case keys (`created_at`, `updated_at`) and are
//! translated to [`PasswordEntry`] here. The client never retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SyncError, SyncResult, VaultResult};
use crate::models::{EntryPatch, NewEntry, PasswordEntry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Best-effort remote copy of the records.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_all(&self, query: Option<&str>) -> SyncResult<Vec<PasswordEntry>>;

    /// Creates a record remotely. `id` carries the local id when mirroring so a
    /// cooperating server can keep the two copies addressable by the same key.
    async fn insert(&self, fields: &NewEntry, id: Option<&str>) -> SyncResult<PasswordEntry>;

    async fn update(&self, id: &str, patch: &EntryPatch) -> SyncResult<PasswordEntry>;

    async fn delete(&self, id: &str) -> SyncResult<()>;
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

#[derive(Deserialize, Debug)]
struct WireEntry {
    id: WireId,
    service: String,
    username: String,
    password: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WireEntry> for PasswordEntry {
    fn from(wire: WireEntry) -> Self {
        let id = match wire.id {
            WireId::Text(id) => id,
            WireId::Number(id) => id.to_string(),
        };
        PasswordEntry {
            id,
            service: wire.service,
            username: wire.username,
            password: wire.password,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        }
    }
}

#[derive(Serialize, Debug)]
struct CreateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    service: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    client: Client,
    base_url: Url,
}

impl HttpSyncClient {
    pub fn new(base_url: &str, timeout: Duration) -> VaultResult<Self> {
        let base_url = parse_base_url(base_url)?;
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            log::error!("Failed to create HTTP client: {}", e);
            SyncError::Network(format!("Failed to create HTTP client: {}", e))
        })?;
        log::debug!("Remote sync client targeting {} (timeout {:?})", base_url, timeout);
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn item_url(&self, id: &str) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }
}

/// Validates a remote collection URL: absolute `http`/`https` that can carry path segments.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidRemoteUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::InvalidRemoteUrl(raw.to_string()));
    }
    Ok(url)
}

async fn ensure_success(resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteStore for HttpSyncClient {
    async fn fetch_all(&self, query: Option<&str>) -> SyncResult<Vec<PasswordEntry>> {
        let mut url = self.base_url.clone();
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair("searchQuery", query);
        }
        log::debug!("GET {}", url);
        let resp = ensure_success(self.client.get(url).send().await?).await?;
        let records: Vec<WireEntry> = resp.json().await?;
        Ok(records.into_iter().map(PasswordEntry::from).collect())
    }

    async fn insert(&self, fields: &NewEntry, id: Option<&str>) -> SyncResult<PasswordEntry> {
        let body = CreateBody {
            id,
            service: &fields.service,
            username: &fields.username,
            password: &fields.password,
        };
        log::debug!("POST {}", self.base_url);
        let resp = self.client.post(self.base_url.clone()).json(&body).send().await?;
        let record: WireEntry = ensure_success(resp).await?.json().await?;
        Ok(record.into())
    }

    async fn update(&self, id: &str, patch: &EntryPatch) -> SyncResult<PasswordEntry> {
        let url = self.item_url(id)?;
        log::debug!("PUT {}", url);
        let resp = self.client.put(url).json(patch).send().await?;
        let record: WireEntry = ensure_success(resp).await?.json().await?;
        Ok(record.into())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let url = self.item_url(id)?;
        log::debug!("DELETE {}", url);
        ensure_success(self.client.delete(url).send().await?).await?;
        Ok(())
    }
}

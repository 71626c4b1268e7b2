// src/backend.rs
use std::fmt;
use std::sync::{Arc, Mutex};

use log;

use crate::config::{Config, SyncSettings};
use crate::error::{ConfigError, VaultResult};
use crate::redb_store::RedbStore;
use crate::service::{Backends, PersistenceService};
use crate::store::{LocalStore, MemoryStore};
use crate::sync::{parse_base_url, HttpSyncClient, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    LocalOnly,
    RemoteOnly,
    Hybrid,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendMode::LocalOnly => "local-only",
            BackendMode::RemoteOnly => "remote-only",
            BackendMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Decides the backend combination from sync settings alone.
///
/// `force_remote` or `disable_local` select remote-only, which needs a URL.
/// Otherwise any URL selects hybrid, and no URL means local-only. `enabled` is
/// not an input: it only seeds the service's runtime sync flag.
/// A configured URL is always validated here, so a bad one fails at startup.
pub fn resolve_mode(settings: &SyncSettings) -> Result<BackendMode, ConfigError> {
    let url = settings.remote_url();
    if let Some(url) = url {
        parse_base_url(url)?;
    }

    if settings.force_remote || settings.disable_local {
        return match url {
            Some(_) => Ok(BackendMode::RemoteOnly),
            None => Err(ConfigError::MissingRemoteUrl { mode: "remote-only" }),
        };
    }

    match url {
        Some(_) => Ok(BackendMode::Hybrid),
        None => Ok(BackendMode::LocalOnly),
    }
}

fn open_local(config: &Config) -> VaultResult<Arc<dyn LocalStore>> {
    if config.local.in_memory {
        log::warn!("Using an in-memory local store; entries will not survive this process");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = config.database_path()?;
    Ok(Arc::new(RedbStore::open(&path)?))
}

fn open_remote(settings: &SyncSettings) -> VaultResult<Arc<dyn RemoteStore>> {
    let url = settings
        .remote_url()
        .ok_or(ConfigError::MissingRemoteUrl { mode: "sync" })?;
    Ok(Arc::new(HttpSyncClient::new(url, settings.timeout())?))
}

/// Wires concrete backends into a fresh [`PersistenceService`].
pub fn build_service(config: &Config) -> VaultResult<PersistenceService> {
    let mode = resolve_mode(&config.sync)?;
    log::info!("Resolved backend mode: {}", mode);

    let backends = match mode {
        BackendMode::LocalOnly => Backends::Local(open_local(config)?),
        BackendMode::RemoteOnly => Backends::Remote(open_remote(&config.sync)?),
        BackendMode::Hybrid => Backends::Hybrid {
            local: open_local(config)?,
            remote: open_remote(&config.sync)?,
        },
    };
    Ok(PersistenceService::new(backends, config.sync.enabled))
}

enum SelectorState {
    Unconfigured,
    Resolved(Arc<PersistenceService>),
}

/// Resolves the backend once and hands out the same service afterwards.
///
/// The local database handle is opened a single time through here; redb refuses
/// a second open of the same file within one process.
pub struct BackendSelector {
    state: Mutex<SelectorState>,
}

static GLOBAL: BackendSelector = BackendSelector::new();

impl BackendSelector {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SelectorState::Unconfigured),
        }
    }

    pub fn global() -> &'static BackendSelector {
        &GLOBAL
    }

    /// Returns the cached service, resolving it from `config` on first use.
    /// Later calls ignore `config` until [`reset`](Self::reset).
    pub fn service(&self, config: &Config) -> VaultResult<Arc<PersistenceService>> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let SelectorState::Resolved(service) = &*state {
            return Ok(service.clone());
        }
        let service = Arc::new(build_service(config).map_err(|e| {
            log::error!("Backend resolution failed: {}", e);
            e
        })?);
        *state = SelectorState::Resolved(service.clone());
        Ok(service)
    }

    pub fn resolved_mode(&self) -> Option<BackendMode> {
        match &*self.state.lock().unwrap_or_else(|p| p.into_inner()) {
            SelectorState::Resolved(service) => Some(service.mode()),
            SelectorState::Unconfigured => None,
        }
    }

    /// Drops the cached service so the next call re-evaluates.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = SelectorState::Unconfigured;
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

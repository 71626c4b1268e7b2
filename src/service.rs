// src/service.rs
//! The single entry point the UI layer talks to.
//!
//! Writes go to the local store first and that result alone decides success.
//! When remote sync is on, the same write is then queued for the remote. One
//! detached worker task drains that queue in order, so mirrors reach the remote
//! in the same order the local writes happened. The caller never awaits it, a
//! failure is only logged, and queued work keeps running after the service is
//! dropped.
//! Reads go to the local store and fall back to the remote only when the local
//! store fails and remote sync is on.
//!
//! Two writes to the same id that race each other are last-write-wins at the
//! storage layer; no per-id locking happens here.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log;
use tokio::sync::{mpsc, oneshot};

use crate::backend::BackendMode;
use crate::error::{SyncError, VaultError, VaultResult};
use crate::models::{sort_by_recency, EntryPatch, NewEntry, PasswordEntry, VaultStats};
use crate::store::LocalStore;
use crate::sync::RemoteStore;

/// The concrete backend combination chosen at startup.
#[derive(Clone)]
pub enum Backends {
    Local(Arc<dyn LocalStore>),
    Remote(Arc<dyn RemoteStore>),
    Hybrid {
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    },
}

impl Backends {
    pub fn mode(&self) -> BackendMode {
        match self {
            Backends::Local(_) => BackendMode::LocalOnly,
            Backends::Remote(_) => BackendMode::RemoteOnly,
            Backends::Hybrid { .. } => BackendMode::Hybrid,
        }
    }
}

type MirrorCall = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;

enum MirrorJob {
    Write {
        op: &'static str,
        id: String,
        call: MirrorCall,
    },
    Flush(oneshot::Sender<()>),
}

async fn run_mirror_worker(mut jobs: mpsc::UnboundedReceiver<MirrorJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            MirrorJob::Write { op, id, call } => match call.await {
                Ok(()) => log::debug!("Mirrored {} of entry {} to remote", op, id),
                Err(e) => log::warn!("Remote mirror {} of entry {} failed: {}", op, id, e),
            },
            MirrorJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("Remote mirror queue closed");
}

pub struct PersistenceService {
    backends: Backends,
    remote_sync: AtomicBool,
    // Started on the first mirror so constructing a service needs no runtime.
    mirror_queue: Mutex<Option<mpsc::UnboundedSender<MirrorJob>>>,
}

impl PersistenceService {
    pub fn new(backends: Backends, enable_remote_sync: bool) -> Self {
        Self {
            backends,
            remote_sync: AtomicBool::new(enable_remote_sync),
            mirror_queue: Mutex::new(None),
        }
    }

    pub fn local_only(local: Arc<dyn LocalStore>) -> Self {
        Self::new(Backends::Local(local), false)
    }

    pub fn hybrid(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        enable_remote_sync: bool,
    ) -> Self {
        Self::new(Backends::Hybrid { local, remote }, enable_remote_sync)
    }

    pub fn remote_only(remote: Arc<dyn RemoteStore>) -> Self {
        Self::new(Backends::Remote(remote), true)
    }

    pub fn mode(&self) -> BackendMode {
        self.backends.mode()
    }

    /// Flips remote mirroring/fallback at runtime. Operations already running
    /// keep the value they started with.
    pub fn set_remote_sync(&self, enabled: bool) {
        let previous = self.remote_sync.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            log::info!("Remote sync {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn remote_sync_enabled(&self) -> bool {
        self.remote_sync.load(Ordering::SeqCst)
    }

    /// The remote to mirror to / fall back on for an operation starting now.
    fn sync_target(&self) -> Option<Arc<dyn RemoteStore>> {
        match &self.backends {
            Backends::Hybrid { remote, .. } if self.remote_sync_enabled() => Some(remote.clone()),
            _ => None,
        }
    }

    pub async fn get_all(&self) -> VaultResult<Vec<PasswordEntry>> {
        match &self.backends {
            Backends::Remote(remote) => Ok(sorted(remote.fetch_all(None).await?)),
            Backends::Local(local) => Ok(local.get_all().await?),
            Backends::Hybrid { local, .. } => {
                let fallback = self.sync_target();
                match local.get_all().await {
                    Ok(entries) => Ok(entries),
                    Err(err) => match fallback {
                        Some(remote) => {
                            log::warn!("Local store read failed ({}); falling back to remote", err);
                            Ok(sorted(remote.fetch_all(None).await.map_err(read_failed)?))
                        }
                        None => Err(err.into()),
                    },
                }
            }
        }
    }

    pub async fn search(&self, query: &str) -> VaultResult<Vec<PasswordEntry>> {
        match &self.backends {
            Backends::Remote(remote) => Ok(sorted(remote.fetch_all(Some(query)).await?)),
            Backends::Local(local) => Ok(local.search(query).await?),
            Backends::Hybrid { local, .. } => {
                let fallback = self.sync_target();
                match local.search(query).await {
                    Ok(entries) => Ok(entries),
                    Err(err) => match fallback {
                        Some(remote) => {
                            log::warn!("Local store search failed ({}); falling back to remote", err);
                            Ok(sorted(remote.fetch_all(Some(query)).await.map_err(read_failed)?))
                        }
                        None => Err(err.into()),
                    },
                }
            }
        }
    }

    pub async fn add(&self, fields: NewEntry) -> VaultResult<PasswordEntry> {
        fields.validate()?;
        match &self.backends {
            Backends::Remote(remote) => Ok(remote.insert(&fields, None).await?),
            Backends::Local(local) => local.insert(fields).await,
            Backends::Hybrid { local, .. } => {
                let mirror_to = self.sync_target();
                let entry = local.insert(fields.clone()).await?;
                log::info!("Saved entry {} locally", entry.id);
                if let Some(remote) = mirror_to {
                    let id = entry.id.clone();
                    self.mirror("insert", id.clone(), async move {
                        remote.insert(&fields, Some(&id)).await.map(|_| ())
                    });
                }
                Ok(entry)
            }
        }
    }

    pub async fn update(&self, id: &str, patch: EntryPatch) -> VaultResult<PasswordEntry> {
        patch.validate()?;
        match &self.backends {
            Backends::Remote(remote) => remote.update(id, &patch).await.map_err(|e| {
                if e.is_not_found() {
                    VaultError::NotFound(id.to_string())
                } else {
                    e.into()
                }
            }),
            Backends::Local(local) => local.update(id, patch).await,
            Backends::Hybrid { local, .. } => {
                let mirror_to = self.sync_target();
                let entry = local.update(id, patch.clone()).await?;
                log::info!("Updated entry {} locally", entry.id);
                if let Some(remote) = mirror_to {
                    let id = entry.id.clone();
                    self.mirror("update", id.clone(), async move {
                        remote.update(&id, &patch).await.map(|_| ())
                    });
                }
                Ok(entry)
            }
        }
    }

    /// Deleting an id that does not exist is a no-op, in every mode.
    pub async fn delete(&self, id: &str) -> VaultResult<()> {
        match &self.backends {
            Backends::Remote(remote) => match remote.delete(id).await {
                Err(e) if e.is_not_found() => {
                    log::debug!("Entry {} already absent on remote", id);
                    Ok(())
                }
                other => Ok(other?),
            },
            Backends::Local(local) => {
                local.delete(id).await?;
                Ok(())
            }
            Backends::Hybrid { local, .. } => {
                let mirror_to = self.sync_target();
                if !local.delete(id).await? {
                    log::debug!("Entry {} not present locally; nothing to delete", id);
                    return Ok(());
                }
                log::info!("Deleted entry {} locally", id);
                if let Some(remote) = mirror_to {
                    let id = id.to_string();
                    self.mirror("delete", id.clone(), async move { remote.delete(&id).await });
                }
                Ok(())
            }
        }
    }

    /// Administrative wipe of the authoritative store. In hybrid mode the remote
    /// mirror is left alone; in remote-only mode every remote record is deleted.
    pub async fn clear_all(&self) -> VaultResult<()> {
        match &self.backends {
            Backends::Local(local) | Backends::Hybrid { local, .. } => {
                local.clear_all().await?;
            }
            Backends::Remote(remote) => {
                for entry in remote.fetch_all(None).await? {
                    match remote.delete(&entry.id).await {
                        Err(e) if !e.is_not_found() => return Err(e.into()),
                        _ => {}
                    }
                }
            }
        }
        log::warn!("All entries cleared ({:?})", self.mode());
        Ok(())
    }

    pub async fn get_stats(&self) -> VaultResult<VaultStats> {
        Ok(VaultStats::from_count(self.get_all().await?.len()))
    }

    /// Waits until every mirror queued so far has run. Callers' results never
    /// depend on this; it exists so a short-lived process can let mirrors finish.
    pub async fn flush_mirrors(&self) {
        let queue = self.mirror_queue.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let Some(queue) = queue else {
            return;
        };
        let (done, finished) = oneshot::channel();
        if queue.send(MirrorJob::Flush(done)).is_err() {
            log::warn!("Remote mirror worker is gone; nothing to flush");
            return;
        }
        if finished.await.is_err() {
            log::warn!("Remote mirror worker stopped before the flush completed");
        }
    }

    fn mirror<F>(&self, op: &'static str, id: String, call: F)
    where
        F: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let mut queue = self.mirror_queue.lock().unwrap_or_else(|p| p.into_inner());
        let sender = queue.get_or_insert_with(|| {
            let (sender, jobs) = mpsc::unbounded_channel();
            tokio::spawn(run_mirror_worker(jobs));
            sender
        });
        let job = MirrorJob::Write { op, id, call: Box::pin(call) };
        if let Err(mpsc::error::SendError(MirrorJob::Write { op, id, .. })) = sender.send(job) {
            log::warn!("Remote mirror {} of entry {} dropped: worker is gone", op, id);
        }
    }
}

fn sorted(mut entries: Vec<PasswordEntry>) -> Vec<PasswordEntry> {
    sort_by_recency(&mut entries);
    entries
}

fn read_failed(e: SyncError) -> VaultError {
    log::error!("Remote fallback read failed: {}", e);
    VaultError::Sync(e)
}

// src/lib.rs
//! Credential persistence for a password manager: an embedded local store that
//! is always authoritative, an optional HTTP mirror, and the service that ties
//! them together behind one API.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod redb_store;
pub mod service;
pub mod store;
pub mod sync;

pub use backend::{build_service, resolve_mode, BackendMode, BackendSelector};
pub use error::{ConfigError, StoreError, SyncError, VaultError, VaultResult};
pub use models::{EntryPatch, NewEntry, PasswordEntry, VaultStats};
pub use redb_store::RedbStore;
pub use service::{Backends, PersistenceService};
pub use store::{LocalStore, MemoryStore};
pub use sync::{HttpSyncClient, RemoteStore};

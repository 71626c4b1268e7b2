// src/redb_store.rs
//! Durable [`LocalStore`] backed by a redb database file.
//!
//! Rows are bincode-encoded [`PasswordEntry`] values keyed by id. Three derived
//! tables are kept in step with the rows inside every write transaction:
//!
//! | Table | Key | Used for |
//! |-------|-----|----------|
//! | `passwords_by_updated` | `(u64::MAX - updated_at micros, id)` | newest-first listing |
//! | `passwords_by_service` | `(lowercased service, id)` | search without decoding rows |
//! | `passwords_by_username` | `(lowercased username, id)` | search without decoding rows |
//!
//! redb calls block, so every operation runs on the blocking thread pool.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition,
    WriteTransaction,
};

use crate::error::{StoreError, StoreResult, VaultError, VaultResult};
use crate::models::{EntryPatch, NewEntry, PasswordEntry};
use crate::store::{normalize_query, LocalStore};

const PASSWORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("passwords");
const BY_UPDATED: TableDefinition<(u64, &str), ()> = TableDefinition::new("passwords_by_updated");
const BY_SERVICE: TableDefinition<(&str, &str), ()> = TableDefinition::new("passwords_by_service");
const BY_USERNAME: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("passwords_by_username");

pub struct RedbStore {
    path: PathBuf,
    db: RwLock<Option<Arc<Database>>>,
}

impl RedbStore {
    /// Opens (or creates) the database at `path` and makes sure all tables exist.
    pub fn open(path: &Path) -> StoreResult<Self> {
        log::info!("Opening local store at {:?}", path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    log::error!("Failed to create store directory {:?}: {}", parent, e);
                    StoreError::Io(e)
                })?;
            }
        }

        let db = Database::create(path).map_err(|e| {
            log::error!("Failed to open redb database {:?}: {}", path, e);
            StoreError::from(e)
        })?;

        let txn = db.begin_write()?;
        txn.open_table(PASSWORDS)?;
        txn.open_table(BY_UPDATED)?;
        txn.open_table(BY_SERVICE)?;
        txn.open_table(BY_USERNAME)?;
        txn.commit()?;

        Ok(Self {
            path: path.to_path_buf(),
            db: RwLock::new(Some(Arc::new(db))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the database handle. Later operations fail with [`StoreError::NotOpen`].
    pub fn close(&self) {
        let mut slot = self.db.write().unwrap_or_else(|p| p.into_inner());
        if slot.take().is_some() {
            log::info!("Closed local store at {:?}", self.path);
        }
    }

    pub fn is_open(&self) -> bool {
        self.db.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    fn handle(&self) -> StoreResult<Arc<Database>> {
        self.db
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(StoreError::NotOpen)
    }

    async fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let db = self.handle()?;
        match tokio::task::spawn_blocking(move || op(db.as_ref())).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Local store worker failed: {}", e);
                Err(StoreError::Task(e.to_string()).into())
            }
        }
    }
}

#[async_trait]
impl LocalStore for RedbStore {
    async fn get_all(&self) -> StoreResult<Vec<PasswordEntry>> {
        self.run(|db| {
            let txn = db.begin_read()?;
            collect_by_recency(&txn, None)
        })
        .await
    }

    async fn search(&self, query: &str) -> StoreResult<Vec<PasswordEntry>> {
        let needle = normalize_query(query);
        self.run(move |db| {
            let txn = db.begin_read()?;
            if needle.is_empty() {
                return collect_by_recency(&txn, None);
            }

            let mut hits = HashSet::new();
            for index in [BY_SERVICE, BY_USERNAME] {
                let table = txn.open_table(index)?;
                for item in table.iter()? {
                    let (key, _) = item?;
                    let (text, id) = key.value();
                    if text.contains(needle.as_str()) {
                        hits.insert(id.to_string());
                    }
                }
            }
            if hits.is_empty() {
                return Ok(Vec::new());
            }
            collect_by_recency(&txn, Some(&hits))
        })
        .await
    }

    async fn insert(&self, fields: NewEntry) -> VaultResult<PasswordEntry> {
        fields.validate()?;
        self.run(move |db| {
            let entry = PasswordEntry::create(fields, Utc::now());
            let txn = db.begin_write().map_err(StoreError::from)?;
            write_row(&txn, &entry, None)?;
            txn.commit().map_err(StoreError::from)?;
            log::debug!("Inserted entry {} into local store", entry.id);
            Ok::<_, VaultError>(entry)
        })
        .await
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> VaultResult<PasswordEntry> {
        patch.validate()?;
        let id = id.to_string();
        self.run(move |db| {
            let txn = db.begin_write().map_err(StoreError::from)?;
            let previous = read_row(&txn, &id)?.ok_or_else(|| VaultError::NotFound(id.clone()))?;
            let mut entry = previous.clone();
            entry.apply(&patch, Utc::now());
            write_row(&txn, &entry, Some(&previous))?;
            txn.commit().map_err(StoreError::from)?;
            log::debug!("Updated entry {} in local store", entry.id);
            Ok::<_, VaultError>(entry)
        })
        .await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.run(move |db| {
            let txn = db.begin_write()?;
            let removed = match read_row(&txn, &id)? {
                Some(entry) => {
                    remove_row(&txn, &entry)?;
                    true
                }
                None => false,
            };
            txn.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.run(|db| {
            let txn = db.begin_write()?;
            txn.delete_table(PASSWORDS)?;
            txn.delete_table(BY_UPDATED)?;
            txn.delete_table(BY_SERVICE)?;
            txn.delete_table(BY_USERNAME)?;
            txn.open_table(PASSWORDS)?;
            txn.open_table(BY_UPDATED)?;
            txn.open_table(BY_SERVICE)?;
            txn.open_table(BY_USERNAME)?;
            txn.commit()?;
            log::info!("Cleared all entries from local store");
            Ok(())
        })
        .await
    }
}

fn recency_key(updated_at: DateTime<Utc>) -> u64 {
    u64::MAX - updated_at.timestamp_micros().max(0) as u64
}

fn encode_row(entry: &PasswordEntry) -> StoreResult<Vec<u8>> {
    bincode::serialize(entry).map_err(|e| {
        let msg = format!("Bincode serialization failed: {}", e);
        log::error!("encode_row: {}", msg);
        StoreError::Serialization(msg)
    })
}

fn decode_row(bytes: &[u8]) -> StoreResult<PasswordEntry> {
    bincode::deserialize(bytes).map_err(|e| {
        let msg = format!("Bincode deserialization failed: {}", e);
        log::error!("decode_row: {}", msg);
        StoreError::Deserialization(msg)
    })
}

fn read_row(txn: &WriteTransaction, id: &str) -> StoreResult<Option<PasswordEntry>> {
    let rows = txn.open_table(PASSWORDS)?;
    let found = match rows.get(id)? {
        Some(guard) => Some(decode_row(guard.value())?),
        None => None,
    };
    Ok(found)
}

/// Writes `entry` and its index keys, dropping the keys of `previous` first.
fn write_row(
    txn: &WriteTransaction,
    entry: &PasswordEntry,
    previous: Option<&PasswordEntry>,
) -> StoreResult<()> {
    let encoded = encode_row(entry)?;
    let mut rows = txn.open_table(PASSWORDS)?;
    let mut by_updated = txn.open_table(BY_UPDATED)?;
    let mut by_service = txn.open_table(BY_SERVICE)?;
    let mut by_username = txn.open_table(BY_USERNAME)?;

    let id = entry.id.as_str();
    if let Some(old) = previous {
        by_updated.remove((recency_key(old.updated_at), id))?;
        by_service.remove((old.service.to_lowercase().as_str(), id))?;
        by_username.remove((old.username.to_lowercase().as_str(), id))?;
    }

    rows.insert(id, encoded.as_slice())?;
    by_updated.insert((recency_key(entry.updated_at), id), ())?;
    by_service.insert((entry.service.to_lowercase().as_str(), id), ())?;
    by_username.insert((entry.username.to_lowercase().as_str(), id), ())?;
    Ok(())
}

fn remove_row(txn: &WriteTransaction, entry: &PasswordEntry) -> StoreResult<()> {
    let mut rows = txn.open_table(PASSWORDS)?;
    let mut by_updated = txn.open_table(BY_UPDATED)?;
    let mut by_service = txn.open_table(BY_SERVICE)?;
    let mut by_username = txn.open_table(BY_USERNAME)?;

    let id = entry.id.as_str();
    rows.remove(id)?;
    by_updated.remove((recency_key(entry.updated_at), id))?;
    by_service.remove((entry.service.to_lowercase().as_str(), id))?;
    by_username.remove((entry.username.to_lowercase().as_str(), id))?;
    Ok(())
}

/// Walks the recency index newest first, optionally keeping only ids in `only`.
fn collect_by_recency(
    txn: &ReadTransaction,
    only: Option<&HashSet<String>>,
) -> StoreResult<Vec<PasswordEntry>> {
    let by_updated = txn.open_table(BY_UPDATED)?;
    let rows = txn.open_table(PASSWORDS)?;
    let mut entries = Vec::new();

    for item in by_updated.iter()? {
        let (key, _) = item?;
        let (_, id) = key.value();
        if let Some(only) = only {
            if !only.contains(id) {
                continue;
            }
        }
        let row = rows.get(id)?;
        match row {
            Some(guard) => entries.push(decode_row(guard.value())?),
            None => log::warn!("Recency index points at missing entry {}", id),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, RedbStore) {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = RedbStore::open(&dir.path().join("passwords.redb")).expect("Failed to open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_add_then_read() {
        let (_dir, store) = open_temp();
        let created = store.insert(NewEntry::new("X", "y", "z")).await.unwrap();
        assert!(!created.id.is_empty());

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], created);
    }

    #[tokio::test]
    async fn test_get_all_orders_by_updated_desc() {
        let (_dir, store) = open_temp();
        let first = store.insert(NewEntry::new("first", "u", "p")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.insert(NewEntry::new("second", "u", "p")).await.unwrap();

        let ids: Vec<String> = store.get_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        // Touching the older record moves it to the front.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.update(&first.id, EntryPatch::password("newer")).await.unwrap();
        let ids: Vec<String> = store.get_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_search_semantics() {
        let (_dir, store) = open_temp();
        let github = store.insert(NewEntry::new("GitHub", "dev", "p1")).await.unwrap();
        store.insert(NewEntry::new("Gmail", "dev2", "p2")).await.unwrap();

        assert_eq!(store.search("git").await.unwrap(), vec![github]);
        assert_eq!(store.search("GIT").await.unwrap().len(), 1);
        assert_eq!(store.search("dev").await.unwrap().len(), 2);
        assert_eq!(store.search("").await.unwrap().len(), 2);
        assert!(store.search("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_follows_renamed_fields() {
        let (_dir, store) = open_temp();
        let entry = store.insert(NewEntry::new("Old Name", "someone", "p")).await.unwrap();
        store
            .update(
                &entry.id,
                EntryPatch {
                    service: Some("Fresh".to_string()),
                    ..EntryPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(store.search("old").await.unwrap().is_empty());
        assert_eq!(store.search("fresh").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_partial_fields() {
        let (_dir, store) = open_temp();
        let created = store.insert(NewEntry::new("svc", "user", "old")).await.unwrap();
        let updated = store.update(&created.id, EntryPatch::password("newpass")).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.service, "svc");
        assert_eq!(updated.username, "user");
        assert_eq!(updated.password, "newpass");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_updated_at_is_monotonic() {
        let (_dir, store) = open_temp();
        let created = store.insert(NewEntry::new("svc", "user", "p0")).await.unwrap();
        let mut last = created.updated_at;
        for i in 1..10 {
            let updated = store
                .update(&created.id, EntryPatch::password(format!("p{}", i)))
                .await
                .unwrap();
            assert!(updated.updated_at >= last);
            assert!(updated.updated_at >= updated.created_at);
            last = updated.updated_at;
        }
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_dir, store) = open_temp();
        let result = store.update("nope", EntryPatch::password("x")).await;
        assert!(matches!(result, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validation_blocks_write() {
        let (_dir, store) = open_temp();
        let result = store.insert(NewEntry::new("", "u", "p")).await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
        assert!(store.get_all().await.unwrap().is_empty());

        let entry = store.insert(NewEntry::new("s", "u", "p")).await.unwrap();
        let result = store.update(&entry.id, EntryPatch::password("")).await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
        assert_eq!(store.get_all().await.unwrap()[0].password, "p");
    }

    #[tokio::test]
    async fn test_delete_then_read() {
        let (_dir, store) = open_temp();
        let keep = store.insert(NewEntry::new("keep", "u", "p")).await.unwrap();
        let gone = store.insert(NewEntry::new("gone", "u", "p")).await.unwrap();

        assert!(store.delete(&gone.id).await.unwrap());
        assert!(!store.delete(&gone.id).await.unwrap());

        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![keep]);
        assert!(store.search("gone").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (_dir, store) = open_temp();
        for i in 0..5 {
            store.insert(NewEntry::new(format!("s{}", i), "u", "p")).await.unwrap();
        }
        store.clear_all().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.search("s").await.unwrap().is_empty());

        // Still usable afterwards.
        store.insert(NewEntry::new("again", "u", "p")).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("passwords.redb");
        let created = {
            let store = RedbStore::open(&path).unwrap();
            let created = store.insert(NewEntry::new("durable", "u", "p")).await.unwrap();
            store.close();
            created
        };

        let reopened = RedbStore::open(&path).unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn test_closed_store_fails_with_not_open() {
        let (_dir, store) = open_temp();
        store.close();
        assert!(!store.is_open());
        assert!(matches!(store.get_all().await, Err(StoreError::NotOpen)));
        assert!(matches!(
            store.insert(NewEntry::new("a", "b", "c")).await,
            Err(VaultError::Storage(StoreError::NotOpen))
        ));
    }

    #[tokio::test]
    async fn test_unique_ids_over_many_inserts() {
        let (_dir, store) = open_temp();
        for i in 0..100 {
            store.insert(NewEntry::new(format!("svc{}", i), "u", "p")).await.unwrap();
        }
        let ids: HashSet<String> = store.get_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_recency_key_orders_newest_first() {
        let now = Utc::now();
        assert!(recency_key(now + Duration::seconds(1)) < recency_key(now));
    }
}

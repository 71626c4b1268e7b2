// src/store.rs
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use log;

use crate::error::{StoreResult, VaultError, VaultResult};
use crate::models::{sort_by_recency, EntryPatch, NewEntry, PasswordEntry};

/// The authoritative, on-device record store.
///
/// Every I/O failure is surfaced as a [`crate::error::StoreError`]; implementations
/// never retry and never fall back to anything else.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// All records, most recently updated first.
    async fn get_all(&self) -> StoreResult<Vec<PasswordEntry>>;

    /// Case-insensitive substring match on service and username, most recent first.
    /// An empty (or blank) query returns everything.
    async fn search(&self, query: &str) -> StoreResult<Vec<PasswordEntry>>;

    async fn insert(&self, fields: NewEntry) -> VaultResult<PasswordEntry>;

    async fn update(&self, id: &str, patch: EntryPatch) -> VaultResult<PasswordEntry>;

    /// Removes the record if present. Returns whether anything was deleted;
    /// a missing id is not an error.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn clear_all(&self) -> StoreResult<()>;
}

/// Lowercased, trimmed search needle.
pub(crate) fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Ephemeral store kept entirely in memory. Search is a linear scan plus sort.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, PasswordEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_all(&self) -> StoreResult<Vec<PasswordEntry>> {
        self.search("").await
    }

    async fn search(&self, query: &str) -> StoreResult<Vec<PasswordEntry>> {
        let needle = normalize_query(query);
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut found: Vec<PasswordEntry> = entries
            .values()
            .filter(|entry| entry.matches(&needle))
            .cloned()
            .collect();
        sort_by_recency(&mut found);
        Ok(found)
    }

    async fn insert(&self, fields: NewEntry) -> VaultResult<PasswordEntry> {
        fields.validate()?;
        let entry = PasswordEntry::create(fields, Utc::now());
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(entry.id.clone(), entry.clone());
        log::debug!("MemoryStore: inserted entry {}", entry.id);
        Ok(entry)
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> VaultResult<PasswordEntry> {
        patch.validate()?;
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        entry.apply(&patch, Utc::now());
        Ok(entry.clone())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        Ok(entries.remove(id).is_some())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.entries.write().unwrap_or_else(|p| p.into_inner()).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_insert_then_get_all() {
        let store = MemoryStore::new();
        let created = store.insert(NewEntry::new("X", "y", "z")).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![created]);
    }

    #[tokio::test]
    async fn test_search_semantics() {
        let store = MemoryStore::new();
        let github = store.insert(NewEntry::new("GitHub", "dev", "p1")).await.unwrap();
        store.insert(NewEntry::new("Gmail", "dev2", "p2")).await.unwrap();

        let hits = store.search("git").await.unwrap();
        assert_eq!(hits, vec![github]);
        assert_eq!(store.search("").await.unwrap().len(), 2);
        assert!(store.search("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let result = store.update("missing", EntryPatch::password("x")).await;
        assert!(matches!(result, Err(VaultError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let entry = store.insert(NewEntry::new("a", "b", "c")).await.unwrap();
        assert!(store.delete(&entry.id).await.unwrap());
        assert!(!store.delete(&entry.id).await.unwrap());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_fields() {
        let store = MemoryStore::new();
        let result = store.insert(NewEntry::new("a", "", "c")).await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_unique_across_inserts() {
        let store = MemoryStore::new();
        for i in 0..50 {
            store.insert(NewEntry::new(format!("s{}", i), "u", "p")).await.unwrap();
        }
        let ids: HashSet<String> = store.get_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 50);
    }
}

// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// A stored credential. `id` and `created_at` never change after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordEntry {
    pub id: String,
    pub service: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PasswordEntry {
    /// Builds a fresh record from validated fields, assigning id and timestamps.
    pub fn create(fields: NewEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service: fields.service,
            username: fields.username,
            password: fields.password,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges `patch` onto this record and bumps `updated_at`.
    ///
    /// The new timestamp is clamped so it never goes below the previous one,
    /// even if the wall clock stepped backwards.
    pub fn apply(&mut self, patch: &EntryPatch, now: DateTime<Utc>) {
        if let Some(service) = &patch.service {
            self.service = service.clone();
        }
        if let Some(username) = &patch.username {
            self.username = username.clone();
        }
        if let Some(password) = &patch.password {
            self.password = password.clone();
        }
        self.updated_at = now.max(self.updated_at);
    }

    /// Case-insensitive substring match on service and username.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.service.to_lowercase().contains(needle)
            || self.username.to_lowercase().contains(needle)
    }
}

/// Caller-supplied fields for an insert.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub service: String,
    pub username: String,
    pub password: String,
}

impl NewEntry {
    pub fn new(
        service: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        require_non_empty("service", &self.service)?;
        require_non_empty("username", &self.username)?;
        require_non_empty("password", &self.password)
    }
}

/// A partial update. `None` leaves the field untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl EntryPatch {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.username.is_none() && self.password.is_none()
    }

    /// Supplied fields must still be non-empty; omitted ones are fine.
    pub fn validate(&self) -> VaultResult<()> {
        if let Some(service) = &self.service {
            require_non_empty("service", service)?;
        }
        if let Some(username) = &self.username {
            require_non_empty("username", username)?;
        }
        if let Some(password) = &self.password {
            require_non_empty("password", password)?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultStats {
    pub total: usize,
    pub has_passwords: bool,
}

impl VaultStats {
    pub fn from_count(total: usize) -> Self {
        Self {
            total,
            has_passwords: total > 0,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> VaultResult<()> {
    if value.trim().is_empty() {
        return Err(VaultError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Orders records most recently touched first; ties fall back to id for a stable order.
pub fn sort_by_recency(entries: &mut [PasswordEntry]) {
    entries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

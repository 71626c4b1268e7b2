// src/error.rs
use thiserror::Error;

/// Failures of the local embedded store. Always fatal for the operation at hand.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Local store is not open")]
    NotOpen,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Store worker failed: {0}")]
    Task(String),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Failures talking to the remote collection endpoint.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Could not decode remote response: {0}")]
    Decode(String),
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{mode} mode requires a remote URL but none is configured")]
    MissingRemoteUrl { mode: &'static str },
    #[error("Invalid remote URL '{0}'")]
    InvalidRemoteUrl(String),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Could not determine a data directory for the local store")]
    NoDataDir,
}

/// Everything the persistence service can hand back to its caller.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("No entry with id '{0}'")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Vault(#[from] VaultError),
    #[error("CLI error: {0}")]
    Cli(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type SyncResult<T> = Result<T, SyncError>;
pub type VaultResult<T> = Result<T, VaultError>;
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = SyncError::Status { status: 404, body: String::new() };
        assert!(err.is_not_found());
        let err = SyncError::Status { status: 500, body: "boom".to_string() };
        assert!(!err.is_not_found());
        assert!(!SyncError::Timeout.is_not_found());
    }

    #[test]
    fn test_vault_error_wraps_layers() {
        let err: VaultError = StoreError::NotOpen.into();
        assert!(matches!(err, VaultError::Storage(StoreError::NotOpen)));
        assert_eq!(err.to_string(), "Storage error: Local store is not open");

        let err: VaultError = SyncError::Timeout.into();
        assert!(matches!(err, VaultError::Sync(SyncError::Timeout)));
    }
}

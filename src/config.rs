// src/config.rs
use serde::{Serialize, Deserialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use directories::ProjectDirs;
use log::{info, warn};
use toml;

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "passman_sync.toml";
const DATABASE_FILE_NAME: &str = "passwords.redb";

pub const ENV_DB_PATH: &str = "PASSMAN_DB_PATH";
pub const ENV_IN_MEMORY: &str = "PASSMAN_IN_MEMORY";
pub const ENV_REMOTE_URL: &str = "PASSMAN_REMOTE_URL";
pub const ENV_SYNC_ENABLED: &str = "PASSMAN_SYNC_ENABLED";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "PASSMAN_SYNC_TIMEOUT_SECS";
pub const ENV_FORCE_REMOTE: &str = "PASSMAN_FORCE_REMOTE";
pub const ENV_DISABLE_LOCAL: &str = "PASSMAN_DISABLE_LOCAL";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LocalSettings {
    /// Defaults to `<data dir>/passwords.redb` when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Keep records in memory only (nothing survives the process).
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncSettings {
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Initial value of the service's remote-sync flag.
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub force_remote: bool,
    #[serde(default)]
    pub disable_local: bool,
}

fn default_sync_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    8
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            remote_url: None,
            enabled: default_sync_enabled(),
            timeout_secs: default_timeout_secs(),
            force_remote: false,
            disable_local: false,
        }
    }
}

impl SyncSettings {
    /// Request timeout; a file value of 0 is raised to one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// The configured URL, ignoring blank strings.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Config {
    /// Layers environment variables over the file values. `lookup` is
    /// `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.local.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_IN_MEMORY) {
            self.local.in_memory = parse_flag(ENV_IN_MEMORY, &raw)?;
        }
        if let Some(url) = lookup(ENV_REMOTE_URL) {
            self.sync.remote_url = Some(url);
        }
        if let Some(raw) = lookup(ENV_SYNC_ENABLED) {
            self.sync.enabled = parse_flag(ENV_SYNC_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SYNC_TIMEOUT_SECS) {
            self.sync.timeout_secs = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_SYNC_TIMEOUT_SECS.to_string(),
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_FORCE_REMOTE) {
            self.sync.force_remote = parse_flag(ENV_FORCE_REMOTE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DISABLE_LOCAL) {
            self.sync.disable_local = parse_flag(ENV_DISABLE_LOCAL, &raw)?;
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.local.database_path {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
            .ok_or(ConfigError::NoDataDir)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "PassmanSync", "PassmanSync")
}

pub fn get_config_path() -> Option<PathBuf> {
    project_dirs().map(|proj_dirs| proj_dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn save_default_config(config_path: &Path, config: &Config) -> Result<(), String> {
    info!("Attempting to save default config to {:?}", config_path);
    if let Some(parent_dir) = config_path.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)
                .map_err(|e| format!("Failed to create config directory {:?}: {}", parent_dir, e))?;
            info!("Created config directory: {:?}", parent_dir);
        }
    }

    let toml_string = toml::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize default config to TOML: {}", e))?;

    let mut file = fs::File::create(config_path)
        .map_err(|e| format!("Failed to create default config file {:?}: {}", config_path, e))?;

    file.write_all(toml_string.as_bytes())
        .map_err(|e| format!("Failed to write default config to {:?}: {}", config_path, e))?;

    info!("Saved default configuration to {:?}", config_path);
    Ok(())
}

/// Reads the config at `config_path`, writing defaults there if it does not exist.
/// Unreadable or malformed files fall back to defaults with a warning.
pub fn load_config_from(config_path: &Path) -> Config {
    if !config_path.exists() {
        info!(
            "Config file not found at {:?}. Creating and using default configuration.",
            config_path
        );
        let default_config = Config::default();
        if let Err(e) = save_default_config(config_path, &default_config) {
            warn!("Failed to save default configuration: {}", e);
        }
        return default_config;
    }

    info!("Loading configuration from {:?}", config_path);
    match fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(loaded_config) => {
                info!("Configuration loaded successfully.");
                loaded_config
            }
            Err(e) => {
                warn!(
                    "Failed to parse config file at {:?}: {}. Using default configuration.",
                    config_path, e
                );
                Config::default()
            }
        },
        Err(e) => {
            warn!(
                "Failed to read config file at {:?}: {}. Using default configuration.",
                config_path, e
            );
            Config::default()
        }
    }
}

pub fn load_config() -> Config {
    match get_config_path() {
        Some(config_path) => load_config_from(&config_path),
        None => {
            warn!("Could not determine config directory. Using default configuration.");
            Config::default()
        }
    }
}

/// File config (explicit path or the platform default) with environment overrides on top.
pub fn load_effective_config(explicit_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match explicit_path {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

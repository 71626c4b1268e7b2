// src/cli.rs
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use log;
use rpassword;

use crate::backend::BackendSelector;
use crate::config::{self, Config};
use crate::error::{AppError, AppResult, VaultError};
use crate::models::{EntryPatch, NewEntry, PasswordEntry};
use crate::service::PersistenceService;

/// Stores credentials locally and mirrors them to a remote collection when configured.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a config file (defaults to the platform config directory)
    #[clap(long, value_parser, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the local database file
    #[clap(long, value_parser, global = true)]
    pub db: Option<PathBuf>,

    /// Remote collection URL, e.g. https://host/api/passwords
    #[clap(long, global = true)]
    pub remote_url: Option<String>,

    /// Start with remote mirroring and fallback switched off
    #[clap(long, global = true)]
    pub no_sync: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all entries, most recently updated first
    List {
        #[clap(long)]
        show_passwords: bool,
    },
    /// Find entries whose service or username contains QUERY (case-insensitive)
    Search {
        query: String,
        #[clap(long)]
        show_passwords: bool,
    },
    /// Add an entry; prompts for the password when --password is omitted
    Add {
        #[clap(short, long)]
        service: String,
        #[clap(short, long)]
        username: String,
        #[clap(short, long)]
        password: Option<String>,
    },
    /// Change some fields of an entry
    Update {
        id: String,
        #[clap(short, long)]
        service: Option<String>,
        #[clap(short, long)]
        username: Option<String>,
        #[clap(short, long)]
        password: Option<String>,
        /// Prompt for a new password instead of passing it on the command line
        #[clap(long, conflicts_with = "password")]
        prompt_password: bool,
    },
    /// Delete an entry (deleting an unknown id is not an error)
    Delete { id: String },
    /// Show how many entries are stored
    Stats,
    /// Delete every entry from the authoritative store
    Clear {
        #[clap(long)]
        yes: bool,
    },
}

/// Command-line flags win over environment and file settings.
pub fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(db) = &cli.db {
        config.local.database_path = Some(db.clone());
    }
    if let Some(url) = &cli.remote_url {
        config.sync.remote_url = Some(url.clone());
    }
    if cli.no_sync {
        config.sync.enabled = false;
    }
}

pub async fn handle_cli_command(cli: Cli) -> AppResult<()> {
    log::debug!("Handling CLI command: {:?}", cli.command);
    let mut config = config::load_effective_config(cli.config.as_deref()).map_err(VaultError::from)?;
    apply_overrides(&cli, &mut config);

    let service = BackendSelector::global().service(&config)?;
    let mut stdout = io::stdout();
    let result = run_command(&service, cli.command, &mut stdout).await;
    service.flush_mirrors().await;
    result
}

fn read_password(prompt: &str) -> AppResult<String> {
    rpassword::prompt_password(prompt).map_err(|e| {
        log::error!("Failed to read password: {}", e);
        AppError::Cli(format!("Failed to read password: {}", e))
    })
}

fn confirm(prompt: &str) -> AppResult<bool> {
    print!("{} (y/N): ", prompt);
    io::stdout().flush().map_err(|e| AppError::Cli(format!("Failed to flush stdout: {}", e)))?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .map_err(|e| AppError::Cli(format!("Failed to read confirmation: {}", e)))?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn print_entries<W: Write>(out: &mut W, entries: &[PasswordEntry], show_passwords: bool) -> AppResult<()> {
    if entries.is_empty() {
        writeln!(out, "No entries found.").map_err(write_failed)?;
        return Ok(());
    }
    for entry in entries {
        let line = if show_passwords {
            format!(
                "  - [{}] Service: {}, Username: {}, Password: {}",
                entry.id, entry.service, entry.username, entry.password
            )
        } else {
            format!("  - [{}] Service: {}, Username: {}", entry.id, entry.service, entry.username)
        };
        writeln!(out, "{}", line).map_err(write_failed)?;
    }
    Ok(())
}

fn write_failed(e: io::Error) -> AppError {
    AppError::Cli(format!("Failed to write output: {}", e))
}

/// Executes one command against `service`, writing human-readable output to `out`.
pub async fn run_command<W: Write>(
    service: &PersistenceService,
    command: Commands,
    out: &mut W,
) -> AppResult<()> {
    match command {
        Commands::List { show_passwords } => {
            let entries = service.get_all().await?;
            log::info!("Listed {} entries", entries.len());
            print_entries(out, &entries, show_passwords)
        }
        Commands::Search { query, show_passwords } => {
            let entries = service.search(&query).await?;
            log::info!("Search matched {} entries", entries.len());
            print_entries(out, &entries, show_passwords)
        }
        Commands::Add { service: name, username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password("Password: ")?,
            };
            let entry = service.add(NewEntry::new(name, username, password)).await?;
            writeln!(out, "Added entry {} ({})", entry.id, entry.service).map_err(write_failed)
        }
        Commands::Update { id, service: name, username, password, prompt_password } => {
            let password = if prompt_password {
                Some(read_password("New password: ")?)
            } else {
                password
            };
            let patch = EntryPatch { service: name, username, password };
            if patch.is_empty() {
                log::warn!("Update for {} carries no field changes", id);
            }
            let entry = service.update(&id, patch).await?;
            writeln!(out, "Updated entry {} ({})", entry.id, entry.service).map_err(write_failed)
        }
        Commands::Delete { id } => {
            service.delete(&id).await?;
            writeln!(out, "Deleted entry {}", id).map_err(write_failed)
        }
        Commands::Stats => {
            let stats = service.get_stats().await?;
            writeln!(out, "Entries: {}", stats.total).map_err(write_failed)?;
            writeln!(out, "Backend: {}", service.mode()).map_err(write_failed)?;
            writeln!(
                out,
                "Remote sync: {}",
                if service.remote_sync_enabled() { "on" } else { "off" }
            )
            .map_err(write_failed)
        }
        Commands::Clear { yes } => {
            if !yes && !confirm("Delete every stored entry?")? {
                writeln!(out, "Clear cancelled.").map_err(write_failed)?;
                return Ok(());
            }
            service.clear_all().await?;
            writeln!(out, "All entries deleted.").map_err(write_failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn service() -> PersistenceService {
        PersistenceService::local_only(Arc::new(MemoryStore::new()))
    }

    async fn run(service: &PersistenceService, args: &[&str]) -> AppResult<String> {
        let mut argv = vec!["passman"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).expect("arguments should parse");
        let mut out = Vec::new();
        run_command(service, cli.command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "passman", "stats", "--db", "/tmp/x.redb", "--remote-url", "http://h/p", "--no-sync",
        ])
        .unwrap();
        let mut config = Config::default();
        apply_overrides(&cli, &mut config);
        assert_eq!(config.local.database_path, Some(PathBuf::from("/tmp/x.redb")));
        assert_eq!(config.sync.remote_url(), Some("http://h/p"));
        assert!(!config.sync.enabled);
    }

    #[test]
    fn test_update_password_flags_conflict() {
        let result = Cli::try_parse_from(["passman", "update", "id", "-p", "x", "--prompt-password"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_add_list_search_delete() {
        let service = service();
        let output = run(&service, &["add", "-s", "GitHub", "-u", "dev", "-p", "secret"]).await.unwrap();
        assert!(output.starts_with("Added entry "));

        let listing = run(&service, &["list"]).await.unwrap();
        assert!(listing.contains("Service: GitHub, Username: dev"));
        assert!(!listing.contains("secret"));

        let shown = run(&service, &["search", "GIT", "--show-passwords"]).await.unwrap();
        assert!(shown.contains("Password: secret"));
        assert_eq!(run(&service, &["search", "zzz"]).await.unwrap(), "No entries found.\n");

        let id = service.get_all().await.unwrap()[0].id.clone();
        run(&service, &["update", id.as_str(), "-p", "rotated"]).await.unwrap();
        assert_eq!(service.get_all().await.unwrap()[0].password, "rotated");

        run(&service, &["delete", id.as_str()]).await.unwrap();
        run(&service, &["delete", id.as_str()]).await.unwrap();
        let stats = run(&service, &["stats"]).await.unwrap();
        assert!(stats.contains("Entries: 0"));
        assert!(stats.contains("Backend: local-only"));
    }

    #[tokio::test]
    async fn test_errors_surface_as_app_errors() {
        let service = service();
        let result = run(&service, &["update", "ghost", "-u", "x"]).await;
        assert!(matches!(result, Err(AppError::Vault(VaultError::NotFound(_)))));

        let result = run(&service, &["add", "-s", "", "-u", "dev", "-p", "x"]).await;
        assert!(matches!(result, Err(AppError::Vault(VaultError::Validation(_)))));
    }

    #[tokio::test]
    async fn test_clear_with_yes() {
        let service = service();
        run(&service, &["add", "-s", "a", "-u", "b", "-p", "c"]).await.unwrap();
        let output = run(&service, &["clear", "--yes"]).await.unwrap();
        assert_eq!(output, "All entries deleted.\n");
        assert!(service.get_all().await.unwrap().is_empty());
    }
}

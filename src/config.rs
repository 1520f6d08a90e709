//! Configuration management for Activity Sync

use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub local: DatabaseConfig,
    pub central: DatabaseConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Sync cycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Current local user; the owner identity used for conflict detection
    pub user: String,
    /// Scopes synced by the periodic task
    pub projects: Vec<String>,
    /// Seconds between periodic cycles; 0 disables the task
    pub interval_secs: u64,
    /// Resolve split ownership automatically during a cycle
    pub auto_resolve_conflicts: bool,
    /// Maximum identifiers bound into one `IN (...)` query
    pub batch_size: usize,
}

impl SyncSettings {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            user: "local".to_string(),
            projects: Vec::new(),
            interval_secs: 0,
            auto_resolve_conflicts: false,
            batch_size: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3070,
            },
            local: DatabaseConfig {
                url: "sqlite:./activity-sync.db".to_string(),
            },
            central: DatabaseConfig {
                url: "sqlite:./activity-central.db".to_string(),
            },
            sync: SyncSettings::default(),
        }
    }
}

/// A required variable is missing or empty
#[derive(Debug, thiserror::Error)]
#[error("Missing required environment variable {0}")]
pub struct MissingVar(pub &'static str);

impl Config {
    pub fn from_env() -> Result<Self, MissingVar> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. `CENTRAL_DATABASE_URL`
    /// and `SYNC_USER` have no defaults.
    pub fn from_lookup<F>(var: F) -> Result<Self, MissingVar>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            var(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(MissingVar(key))
        };

        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: var("SERVER_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3070),
            },
            local: DatabaseConfig {
                url: var("LOCAL_DATABASE_URL")
                    .unwrap_or_else(|| "sqlite:./activity-sync.db".to_string()),
            },
            central: DatabaseConfig {
                url: required("CENTRAL_DATABASE_URL")?,
            },
            sync: SyncSettings {
                user: required("SYNC_USER")?,
                projects: parse_list(&var("SYNC_PROJECTS").unwrap_or_default()),
                interval_secs: var("SYNC_INTERVAL_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                auto_resolve_conflicts: var("SYNC_AUTO_RESOLVE")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(false),
                batch_size: var("SYNC_BATCH_SIZE")
                    .and_then(|v| v.parse().ok())
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(500),
            },
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

//! Server configuration
//!
//! Loaded from a TOML file. The path is the first CLI argument, else
//! `FOCUSROOM_CONFIG`, else `config.toml` in the platform config directory.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use argon2::password_hash::PasswordHash;
use directories::ProjectDirs;
use serde::Deserialize;
use uuid::Uuid;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "FOCUSROOM_CONFIG";

/// Longest sweep period accepted (one day)
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Longest staleness accepted (one year)
pub const MAX_STALE_AFTER_MINUTES: u64 = 365 * 24 * 60;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine the platform {0} directory")]
    NoPlatformDir(&'static str),
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], focusroom_net::DEFAULT_PORT))
}

fn default_max_connections() -> usize {
    focusroom_net::server::DEFAULT_MAX_CONNECTIONS
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_stale_after_minutes() -> u64 {
    720
}

/// Top-level `config.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Defaults to `focusroom.db` in the platform data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Keys the per-session identity hashes; changing it orphans every room
    pub identity_secret: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// Stale-session sweeper
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u64,
}

impl SweeperConfig {
    /// Age after which a room that never started is cancelled
    pub fn stale_after(&self) -> chrono::Duration {
        let minutes = self.stale_after_minutes.min(MAX_STALE_AFTER_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

/// A user allowed to connect
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// argon2 PHC string of the bearer token
    pub token_hash: String,
}

impl ServerConfig {
    /// Read and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("identity_secret must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive".into()));
        }
        if self.sweeper.interval_secs == 0 || self.sweeper.stale_after_minutes == 0 {
            return Err(ConfigError::Invalid(
                "sweeper interval and staleness must be positive".into(),
            ));
        }
        if self.sweeper.interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "sweeper interval_secs must be at most {}",
                MAX_SWEEP_INTERVAL_SECS
            )));
        }
        if self.sweeper.stale_after_minutes > MAX_STALE_AFTER_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "sweeper stale_after_minutes must be at most {}",
                MAX_STALE_AFTER_MINUTES
            )));
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.user_id) {
                return Err(ConfigError::Invalid(format!(
                    "user {} is listed twice",
                    user.user_id
                )));
            }
            PasswordHash::new(&user.token_hash).map_err(|e| {
                ConfigError::Invalid(format!("token_hash for {}: {}", user.user_id, e))
            })?;
        }
        Ok(())
    }

    /// Database location, explicit or platform default
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("focusroom.db")),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("dev", "focusroom", "focusroom").ok_or(ConfigError::NoPlatformDir("home"))
}

/// Pick the config file: CLI argument, then environment, then platform default
pub fn resolve_path(arg: Option<String>) -> Result<PathBuf, ConfigError> {
    if let Some(arg) = arg {
        return Ok(PathBuf::from(arg));
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

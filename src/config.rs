// ABOUTME: JSON configuration - source/target credentials, sync tuning and table inventory
// ABOUTME: Read once at startup; a missing file or malformed JSON is a fatal error

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::inventory::{TableInventory, TableSpec};

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// TLS negotiation for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP
    #[default]
    Disable,
    /// TLS when the server offers it
    Prefer,
    /// Fail unless TLS is negotiated
    Require,
}

/// Credentials and retry settings for one database endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Connect attempts in total, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub tls: TlsMode,
}

impl ConnectionConfig {
    /// `user@host:port/database`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("{} host must not be empty", role);
        }
        if self.database.trim().is_empty() {
            bail!("{} database must not be empty", role);
        }
        if self.user.trim().is_empty() {
            bail!("{} user must not be empty", role);
        }
        Ok(())
    }
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("tls", &self.tls)
            .finish()
    }
}

fn default_chunk_size() -> usize {
    5_000
}

fn default_max_chunk_retries() -> u32 {
    3
}

fn default_chunk_retry_delay_secs() -> u64 {
    10
}

fn default_drift_threshold() -> u64 {
    100
}

/// Tuning knobs for the sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rows per extract/load chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Attempts at one chunk, including the first, before the table fails
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    #[serde(default = "default_chunk_retry_delay_secs")]
    pub chunk_retry_delay_secs: u64,
    /// Pause between committed chunks
    #[serde(default)]
    pub chunk_pause_ms: u64,
    /// Row delta at which a table counts as diverged
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunk_retries: default_max_chunk_retries(),
            chunk_retry_delay_secs: default_chunk_retry_delay_secs(),
            chunk_pause_ms: 0,
            drift_threshold: default_drift_threshold(),
        }
    }
}

/// Top-level configuration file.
///
/// ```json
/// {
///   "source": { "host": "db1", "database": "airflow_db", "user": "sync", "password": "..." },
///   "target": { "host": "db2", "database": "documentacio_tecnica", "user": "sync", "password": "..." }
/// }
/// ```
///
/// `secondary` and `primary` are accepted as aliases for `source` and `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(alias = "secondary")]
    pub source: ConnectionConfig,
    #[serde(alias = "primary")]
    pub target: ConnectionConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    /// Overrides the built-in inventory when present
    #[serde(default)]
    pub tables: Option<Vec<TableSpec>>,
}

impl AppConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_json(&contents).with_context(|| format!("Invalid config in {:?}", path))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.target.validate("target")?;
        validate_source_target_different(&self.source, &self.target)?;

        if self.sync.chunk_size == 0 {
            bail!("sync.chunk_size must be greater than 0");
        }
        if self.sync.drift_threshold == 0 {
            bail!("sync.drift_threshold must be greater than 0");
        }
        Ok(())
    }

    /// Build the table inventory: configured tables, or the built-in list.
    pub fn inventory(&self) -> Result<TableInventory> {
        match &self.tables {
            Some(tables) => Ok(TableInventory::new(tables.clone())?),
            None => Ok(TableInventory::quality_measurements()),
        }
    }
}

/// Refuse to sync a database onto itself.
///
/// Host names are compared case-insensitively, and `localhost` is treated as
/// the same host as `127.0.0.1` and `::1`.
pub fn validate_source_target_different(
    source: &ConnectionConfig,
    target: &ConnectionConfig,
) -> Result<()> {
    fn normalize(host: &str) -> String {
        let host = host.trim().to_ascii_lowercase();
        match host.as_str() {
            "localhost" | "127.0.0.1" | "::1" => "localhost".to_string(),
            _ => host,
        }
    }

    if normalize(&source.host) == normalize(&target.host)
        && source.port == target.port
        && source.database == target.database
    {
        bail!(
            "Source and target point to the same database ({}:{}/{})",
            source.host,
            source.port,
            source.database
        );
    }
    Ok(())
}

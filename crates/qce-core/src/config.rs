use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 40653;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default message batch size per bridge call.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Per-RPC deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Pause between successive history calls, yields to other tasks and keeps
/// the bridge from rate-limiting us.
pub const INTER_CALL_DELAY_MS: u64 = 100;

pub const DOWNLOAD_TIMEOUT_MS: u64 = 60_000;
pub const MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 600;
pub const HEALTH_CACHE_TTL_SECS: u64 = 300;
pub const CACHE_CLEANUP_DAYS: i64 = 30;

/// Consecutive failures before the download circuit opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
pub const CIRCUIT_RECOVERY_MS: u64 = 300_000;

/// Orchestrator watchdog: abort the download wait when no resource finishes
/// for this long.
pub const DOWNLOAD_STALL_SECS: u64 = 60;

/// Reply-resolution LRU capacity.
pub const REPLY_INDEX_CAPACITY: usize = 50_000;

/// Top-level config (`config.toml` + `QCE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QceConfig {
    pub gateway: GatewayConfig,
    pub bridge: BridgeConfig,
    pub storage: StorageConfig,
    pub resources: ResourcesConfig,
}

impl Default for QceConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            bridge: BridgeConfig::default(),
            storage: StorageConfig::default(),
            resources: ResourcesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Where and how to reach the chat bridge RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:6099".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of all persisted state; defaults to `~/.qq-chat-exporter`.
    pub root: String,
    /// SQLite file; defaults to `<root>/tasks.db`.
    pub db_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub download_timeout_ms: u64,
    pub max_concurrent_downloads: usize,
    pub health_check_interval_secs: u64,
    pub cache_cleanup_days: i64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            download_timeout_ms: DOWNLOAD_TIMEOUT_MS,
            max_concurrent_downloads: MAX_CONCURRENT_DOWNLOADS,
            health_check_interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            cache_cleanup_days: CACHE_CLEANUP_DAYS,
        }
    }
}

fn default_storage_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.qq-chat-exporter")
}

impl QceConfig {
    /// Load config from a TOML file with `QCE_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then
    /// `~/.qq-chat-exporter/config.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| format!("{}/config.toml", default_storage_root()));

        let config: QceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("QCE_").split("_"))
            .extract()
            .map_err(|e| crate::error::QceError::Validation(e.to_string()))?;

        Ok(config)
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.root)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.storage_root().join("exports")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.storage_root().join("resources")
    }

    pub fn scheduled_exports_dir(&self) -> PathBuf {
        self.storage_root().join("scheduled-exports")
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.storage.db_path {
            Some(p) => PathBuf::from(p),
            None => self.storage_root().join("tasks.db"),
        }
    }
}

//! TOML service configuration.
//!
//! ```toml
//! [api]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [cache]
//! backend = "sqlite"          # or "memory"
//! path = "/var/lib/portmesh/cache.db"
//!
//! [durable]
//! path = "/var/lib/portmesh/widgets.db"
//!
//! [reconciler]
//! batch_size = 1000
//! idle_pause_ms = 1000
//! error_pause_ms = 1000
//! failure_policy = "requeue"  # or "drop"
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiOptions;
use crate::cache::{ConnectionCache, FastStore, SqliteBackend};
use crate::durable::{DurableStore, SqliteDurableStore};
use crate::error::PortmeshError;
use crate::reconciler::{FailurePolicy, ReconcilerConfig, DEFAULT_BATCH_SIZE};

/// Shortest reconciler pause a config file may request.
pub const MIN_PAUSE: Duration = Duration::from_secs(1);

/// Errors raised while loading the configuration or opening the stores it
/// names.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// `backend = "sqlite"` without a `path`.
    #[error("cache backend 'sqlite' requires [cache] path")]
    MissingCachePath,
    /// A configured store could not be opened.
    #[error("failed to open {store} store: {source}")]
    Store {
        /// `cache` or `durable`.
        store: &'static str,
        /// Underlying error.
        source: PortmeshError,
    },
}

/// Which [`KvBackend`](crate::cache::KvBackend) the cache runs on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Process-local memory; contents are lost on exit.
    #[default]
    Memory,
    /// A SQLite file.
    Sqlite,
}

/// Parsed configuration file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener.
    pub api: ApiSection,
    /// Fast store.
    pub cache: CacheSection,
    /// Durable store.
    pub durable: DurableSection,
    /// Reconciler tuning.
    pub reconciler: ReconcilerSection,
}

/// `[api]`
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSection {
    /// Interface to bind.
    pub host: IpAddr,
    /// Port to bind.
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

/// `[cache]`
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    /// Backend kind.
    pub backend: CacheBackendKind,
    /// Database file for the SQLite backend.
    pub path: Option<PathBuf>,
}

/// `[durable]`
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DurableSection {
    /// Database file.
    pub path: PathBuf,
}

impl Default for DurableSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("portmesh.db"),
        }
    }
}

/// `[reconciler]`
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerSection {
    /// Owners drained per cycle.
    pub batch_size: usize,
    /// Pause after an empty cycle, in milliseconds.
    pub idle_pause_ms: u64,
    /// Pause after a failed cycle, in milliseconds.
    pub error_pause_ms: u64,
    /// Handling of batches that could not be persisted.
    pub failure_policy: FailurePolicy,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_pause_ms: MIN_PAUSE.as_millis() as u64,
            error_pause_ms: MIN_PAUSE.as_millis() as u64,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl ServiceConfig {
    /// Loads `explicit`, or the default path when `None`. A missing file
    /// yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit.or_else(default_config_path) {
            Some(path) if path.exists() => read_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses TOML text; `origin` is only used in error messages.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Listener options.
    pub fn api_options(&self) -> ApiOptions {
        ApiOptions {
            host: self.api.host,
            port: self.api.port,
        }
    }

    /// Reconciler options, with pauses raised to [`MIN_PAUSE`].
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let section = &self.reconciler;
        ReconcilerConfig::default()
            .batch_size(section.batch_size)
            .idle_pause(Duration::from_millis(section.idle_pause_ms).max(MIN_PAUSE))
            .error_pause(Duration::from_millis(section.error_pause_ms).max(MIN_PAUSE))
            .failure_policy(section.failure_policy)
    }

    /// Opens the configured fast store.
    pub fn open_fast_store(&self) -> Result<Arc<dyn FastStore>, ConfigError> {
        match self.cache.backend {
            CacheBackendKind::Memory => Ok(Arc::new(ConnectionCache::in_memory())),
            CacheBackendKind::Sqlite => {
                let path = self.cache.path.as_ref().ok_or(ConfigError::MissingCachePath)?;
                let backend = SqliteBackend::open(path).map_err(|source| ConfigError::Store {
                    store: "cache",
                    source,
                })?;
                Ok(Arc::new(ConnectionCache::new(backend)))
            }
        }
    }

    /// Opens the configured durable store.
    pub fn open_durable_store(&self) -> Result<Arc<dyn DurableStore>, ConfigError> {
        let store =
            SqliteDurableStore::open(&self.durable.path).map_err(|source| ConfigError::Store {
                store: "durable",
                source,
            })?;
        Ok(Arc::new(store))
    }
}

fn read_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ServiceConfig::from_toml(&contents, path)
}

/// `<config dir>/portmesh/portmesh.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("portmesh").join("portmesh.toml"))
}

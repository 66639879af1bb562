//! Daemon configuration
//!
//! All knobs live in one [`BridgeConfig`] value that is passed explicitly to
//! each component at construction; there is no ambient global configuration.
//! Loaded from a JSON file, with defaults for everything except the two
//! remote endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Registry group class holding purchased-product groups, as shipped by the
/// upstream CRM when nothing else is configured.
pub const DEFAULT_PURCHASED_PRODUCTS_CLASS_ID: &str = "E88E66B1-9516-47F9-88DC-E2EB8A3EF13E";

/// Top-level configuration for the sync daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path of the trigger channel socket.
    pub socket_path: PathBuf,
    /// Path of the staleness cache database.
    pub cache_db_path: PathBuf,
    /// Cache TTLs.
    pub cache: CacheConfig,
    /// Registry endpoint.
    pub registry: RegistryConfig,
    /// LMS endpoint.
    pub lms: LmsConfig,
    /// Worker pool and scheduling.
    pub daemon: DaemonConfig,
}

/// TTLs for the staleness store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Group-to-course map TTL (minutes).
    pub panel_cache_time: u64,
    /// Per-user debounce TTL (seconds).
    pub user_cache_time: u64,
    /// Minimum interval between full syncs (minutes).
    pub full_sync_interval: u64,
}

/// Registry (membership CRM) endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry API.
    pub base_url: String,
    /// Bearer token for registry queries.
    pub access_token: String,
    /// Group class id whose groups represent purchased products.
    pub purchased_products_class_id: String,
    /// Name of the report/query pairing registry group codes with LMS course codes.
    pub panel_source_query: String,
    /// Page size for registry iteration.
    pub page_size: u32,
    /// Per-request timeout (seconds).
    pub request_timeout: u64,
}

/// LMS (course platform) endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmsConfig {
    /// Base URL of the LMS.
    pub url: String,
    /// Web-service token shared by all sync RPCs.
    pub sync_token: String,
    /// Role id assigned on enrollment.
    pub student_role_id: u32,
    /// Per-request timeout (seconds).
    pub request_timeout: u64,
}

/// Worker pool sizing and full-sync scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interactive worker count.
    pub workers: usize,
    /// Dedicated full-sync worker count; defaults to `workers` when absent.
    pub full_sync_workers: Option<usize>,
    /// Wall-clock hour of day (0-23) at which a full sync becomes eligible.
    pub fullsync_hour: u32,
    /// Run length of one daemon invocation (minutes).
    pub worker_duration: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("./instance/socket"),
            cache_db_path: PathBuf::from("./instance/cache.sqlite"),
            cache: CacheConfig::default(),
            registry: RegistryConfig::default(),
            lms: LmsConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            panel_cache_time: 10,
            user_cache_time: 30,
            full_sync_interval: 120,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            purchased_products_class_id: DEFAULT_PURCHASED_PRODUCTS_CLASS_ID.to_string(),
            panel_source_query: String::new(),
            page_size: 100,
            request_timeout: 30,
        }
    }
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            sync_token: String::new(),
            student_role_id: 5,
            request_timeout: 30,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            full_sync_workers: None,
            fullsync_hour: 4,
            worker_duration: 2,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref()).map_err(|e| {
            BridgeError::Config(format!("reading {}: {}", path.as_ref().display(), e))
        })?;
        let config: BridgeConfig = serde_json::from_slice(&data)?;
        Ok(config)
    }

    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Panel map TTL, minus the 10 second write-time guard.
    pub fn panel_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache.panel_cache_time as i64)
            - chrono::Duration::seconds(10)
    }

    pub fn user_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache.user_cache_time as i64)
    }

    pub fn full_sync_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache.full_sync_interval as i64)
    }

    /// Total run length of one daemon invocation, including the fixed grace
    /// window for in-flight work.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.daemon.worker_duration * 60 + 10)
    }

    pub fn full_sync_workers(&self) -> usize {
        self.daemon.full_sync_workers.unwrap_or(self.daemon.workers)
    }
}

/// Builder-style construction, mainly for tests and embedding.
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
        }
    }

    pub fn socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn cache_db_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.cache_db_path = path.as_ref().to_path_buf();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.daemon.workers = workers;
        self
    }

    pub fn full_sync_workers(mut self, workers: usize) -> Self {
        self.config.daemon.full_sync_workers = Some(workers);
        self
    }

    pub fn fullsync_hour(mut self, hour: u32) -> Self {
        self.config.daemon.fullsync_hour = hour;
        self
    }

    pub fn worker_duration(mut self, minutes: u64) -> Self {
        self.config.daemon.worker_duration = minutes;
        self
    }

    pub fn user_cache_time(mut self, seconds: u64) -> Self {
        self.config.cache.user_cache_time = seconds;
        self
    }

    pub fn panel_cache_time(mut self, minutes: u64) -> Self {
        self.config.cache.panel_cache_time = minutes;
        self
    }

    pub fn full_sync_interval(mut self, minutes: u64) -> Self {
        self.config.cache.full_sync_interval = minutes;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn lms(mut self, lms: LmsConfig) -> Self {
        self.config.lms = lms;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.cache.panel_cache_time, 10);
        assert_eq!(config.cache.user_cache_time, 30);
        assert_eq!(config.cache.full_sync_interval, 120);
        assert_eq!(config.daemon.workers, 2);
        assert_eq!(config.daemon.fullsync_hour, 4);
        assert_eq!(config.lms.student_role_id, 5);
        assert_eq!(config.full_sync_workers(), 2);
        assert_eq!(
            config.registry.purchased_products_class_id,
            DEFAULT_PURCHASED_PRODUCTS_CLASS_ID
        );
    }

    #[test]
    fn test_run_duration_includes_grace() {
        let config = BridgeConfig::builder().worker_duration(2).build();
        assert_eq!(config.run_duration(), Duration::from_secs(130));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"daemon": {"workers": 4}}"#).unwrap();
        assert_eq!(config.daemon.workers, 4);
        assert_eq!(config.daemon.fullsync_hour, 4);
        assert_eq!(config.cache.user_cache_time, 30);
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::builder()
            .workers(3)
            .full_sync_workers(1)
            .fullsync_hour(6)
            .user_cache_time(5)
            .build();
        assert_eq!(config.daemon.workers, 3);
        assert_eq!(config.full_sync_workers(), 1);
        assert_eq!(config.daemon.fullsync_hour, 6);
        assert_eq!(config.cache.user_cache_time, 5);
    }
}

//! Configuration for the IndexSync daemon.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Data directory holding the index, content cache and PID file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Index snapshot file (default: `<data_dir>/index.msgpack`)
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Content cache directory (default: `<data_dir>/content`)
    #[serde(default)]
    pub content_store_dir: Option<PathBuf>,

    /// Repository export read by the daemon (default: `<data_dir>/repository.json`)
    #[serde(default)]
    pub repository_spool: Option<PathBuf>,

    /// Additional schema models (YAML list of models)
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// PID file path
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Repository commit visibility lag in milliseconds
    #[serde(default = "default_lag_ms")]
    pub lag_ms: i64,

    /// Window in which a missing transaction may still arrive, in milliseconds
    #[serde(default = "default_hole_retention_ms")]
    pub hole_retention_ms: i64,

    /// Extract text content; when false documents are marked clean without extraction
    #[serde(default = "default_transform_content")]
    pub transform_content: bool,

    /// Locale used for localised text when a node carries none
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// Tracker scheduling
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Tracker scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_metadata_interval_ms")]
    pub metadata_interval_ms: u64,

    #[serde(default = "default_acl_interval_ms")]
    pub acl_interval_ms: u64,

    #[serde(default = "default_content_interval_ms")]
    pub content_interval_ms: u64,

    /// Transactions requested per page
    #[serde(default = "default_max_transactions")]
    pub max_transactions_per_cycle: usize,

    /// Change sets requested per page
    #[serde(default = "default_max_change_sets")]
    pub max_change_sets_per_cycle: usize,

    /// Nodes sent to the indexer in one bulk call
    #[serde(default = "default_node_batch_size")]
    pub node_batch_size: usize,

    /// Unclean documents refreshed per content cycle
    #[serde(default = "default_content_batch_size")]
    pub content_batch_size: usize,

    /// Recently cascaded nodes remembered to skip redundant cascades
    #[serde(default = "default_cascade_cache_size")]
    pub cascade_cache_size: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("indexsync")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/indexsync.pid")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lag_ms() -> i64 {
    1_000
}

fn default_hole_retention_ms() -> i64 {
    3_600_000 // 1 hour
}

fn default_transform_content() -> bool {
    true
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_metadata_interval_ms() -> u64 {
    15_000
}

fn default_acl_interval_ms() -> u64 {
    15_000
}

fn default_content_interval_ms() -> u64 {
    30_000
}

fn default_max_transactions() -> usize {
    500
}

fn default_max_change_sets() -> usize {
    500
}

fn default_node_batch_size() -> usize {
    50
}

fn default_content_batch_size() -> usize {
    100
}

fn default_cascade_cache_size() -> usize {
    1024
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            metadata_interval_ms: default_metadata_interval_ms(),
            acl_interval_ms: default_acl_interval_ms(),
            content_interval_ms: default_content_interval_ms(),
            max_transactions_per_cycle: default_max_transactions(),
            max_change_sets_per_cycle: default_max_change_sets(),
            node_batch_size: default_node_batch_size(),
            content_batch_size: default_content_batch_size(),
            cascade_cache_size: default_cascade_cache_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_path: None,
            content_store_dir: None,
            repository_spool: None,
            model_path: None,
            pid_file: default_pid_file(),
            log_level: default_log_level(),
            lag_ms: default_lag_ms(),
            hole_retention_ms: default_hole_retention_ms(),
            transform_content: default_transform_content(),
            default_locale: default_locale(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the data directory, falling back to defaults
    pub fn load() -> Self {
        let config_path = default_data_dir().join("config.yaml");

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index.msgpack"))
    }

    pub fn content_store_dir(&self) -> PathBuf {
        self.content_store_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("content"))
    }

    pub fn repository_spool(&self) -> PathBuf {
        self.repository_spool
            .clone()
            .unwrap_or_else(|| self.data_dir.join("repository.json"))
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.content_store_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.hole_retention_ms, 3_600_000);
        assert_eq!(config.lag_ms, 1_000);
        assert!(config.transform_content);
        assert_eq!(config.tracker.node_batch_size, 50);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SyncConfig = serde_yaml::from_str(
            r#"
data_dir: /var/lib/indexsync
transform_content: false
tracker:
  node_batch_size: 10
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/indexsync"));
        assert!(!config.transform_content);
        assert_eq!(config.tracker.node_batch_size, 10);
        assert_eq!(config.tracker.max_transactions_per_cycle, 500);
        assert_eq!(
            config.index_path(),
            PathBuf::from("/var/lib/indexsync/index.msgpack")
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = SyncConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.pid_file, parsed.pid_file);
    }
}

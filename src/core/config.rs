use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::error::Result;

/// Node-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    pub address: String,
    pub storage_path: PathBuf,

    // Router
    pub remote_request_timeout_ms: u64,     // Bound on every process_external call

    // Maintenance
    pub maintenance_interval_secs: u64,     // Idle commit / warming check period

    pub default_index_settings: IndexSettings,
}

/// Per-index settings, mutable at runtime through update_index_settings()
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub ram_buffer_mb: usize,                    // Writer buffer size, 0 = engine default
    pub shard_commit_interval: u64,              // Mutations between advisory commits
    pub idle_time_without_commit_secs: u64,      // Quiet period before an idle commit
    pub post_commit_warm_delay_secs: Option<u64>, // Falls back to idle_time_without_commit_secs
    pub shard_query_cache_size: usize,           // Cached results per shard reader
    pub default_search_fields: Vec<String>,
    pub warming_searches: Vec<String>,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn remote_request_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_request_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl IndexSettings {
    pub fn idle_commit_threshold_ms(&self) -> u64 {
        self.idle_time_without_commit_secs * 1000
    }

    pub fn warm_delay_ms(&self) -> u64 {
        self.post_commit_warm_delay_secs
            .unwrap_or(self.idle_time_without_commit_secs) * 1000
    }

    /// Zero would make the modulo trigger meaningless, treat it as "every write".
    pub fn commit_interval(&self) -> u64 {
        self.shard_commit_interval.max(1)
    }

    pub fn effective_ram_buffer_mb(&self) -> usize {
        if self.ram_buffer_mb != 0 { self.ram_buffer_mb } else { 128 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: uuid::Uuid::new_v4().to_string(),
            address: "127.0.0.1:32191".to_string(),
            storage_path: PathBuf::from("./data"),
            remote_request_timeout_ms: 5_000,
            maintenance_interval_secs: 1,
            default_index_settings: IndexSettings::default(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            number_of_shards: 1,
            ram_buffer_mb: 128,
            shard_commit_interval: 3200,
            idle_time_without_commit_secs: 30,
            post_commit_warm_delay_secs: None,
            shard_query_cache_size: 512,
            default_search_fields: Vec::new(),
            warming_searches: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = Config::from_json_str(
            r#"{"node_id": "node-a", "default_index_settings": {"number_of_shards": 4}}"#,
        ).unwrap();

        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.remote_request_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_index_settings.number_of_shards, 4);
        assert_eq!(config.default_index_settings.shard_commit_interval, 3200);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"address": "10.0.0.5:32191", "maintenance_interval_secs": 7}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.address, "10.0.0.5:32191");
        assert_eq!(config.maintenance_interval(), Duration::from_secs(7));
    }

    #[test]
    fn warm_delay_defaults_to_idle_threshold() {
        let mut settings = IndexSettings {
            idle_time_without_commit_secs: 10,
            ..IndexSettings::default()
        };
        assert_eq!(settings.warm_delay_ms(), 10_000);

        settings.post_commit_warm_delay_secs = Some(2);
        assert_eq!(settings.warm_delay_ms(), 2_000);
        assert_eq!(settings.idle_commit_threshold_ms(), 10_000);
    }

    #[test]
    fn zero_ram_buffer_uses_engine_default() {
        let settings = IndexSettings { ram_buffer_mb: 0, ..IndexSettings::default() };
        assert_eq!(settings.effective_ram_buffer_mb(), 128);
    }
}

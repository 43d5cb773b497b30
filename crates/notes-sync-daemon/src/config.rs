//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notes_sync_core::SyncConfig;
use serde::{Deserialize, Serialize};

/// Main configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the backend (REST endpoints live under `/rest/v1`)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Public API key sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Signed-in user's token; requests use the API key when unset
    pub access_token: Option<String>,

    /// Realtime WebSocket endpoint (derived from `api_url` if not set)
    pub realtime_url: Option<String>,

    /// User whose records are synced
    pub owner_id: Option<String>,

    /// Where local copies and the notification log are kept
    /// (defaults to the config directory)
    pub data_dir: Option<PathBuf>,

    /// Open realtime change feeds in addition to polling
    #[serde(default = "default_true")]
    pub realtime: bool,

    /// Sync timing
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_api_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            access_token: None,
            realtime_url: None,
            owner_id: None,
            data_dir: None,
            realtime: true,
            sync: SyncConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: DaemonConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = DaemonConfig::default();

            std::fs::create_dir_all(config_dir).with_context(|| {
                format!("Failed to create config directory: {:?}", config_dir)
            })?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    /// Realtime endpoint, falling back to `ws(s)://<api host>/realtime/v1/websocket`.
    pub fn realtime_endpoint(&self) -> String {
        if let Some(url) = &self.realtime_url {
            return url.clone();
        }

        let base = self.api_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.api_key
        )
    }

    pub fn data_dir_or(&self, config_dir: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| config_dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_writes_default_config() {
        let dir = TempDir::new().unwrap();

        let config = DaemonConfig::load(dir.path()).unwrap();

        assert_eq!(config.api_url, "http://localhost:54321");
        assert!(config.realtime);
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn test_load_reads_existing_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"api_url": "https://example.test", "owner_id": "user-1", "sync": {"poll_interval_ms": 30000}}"#,
        )
        .unwrap();

        let config = DaemonConfig::load(dir.path()).unwrap();

        assert_eq!(config.owner_id.as_deref(), Some("user-1"));
        assert_eq!(config.sync.poll_interval_ms, 30_000);
        assert_eq!(config.sync.debounce_ms, 500);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ nope").unwrap();

        assert!(DaemonConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_rejects_zero_poll_interval() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"sync": {"poll_interval_ms": 0}}"#,
        )
        .unwrap();

        let err = DaemonConfig::load(dir.path()).unwrap_err();

        assert!(format!("{:#}", err).contains("period must be at least 1ms"));
    }

    #[test]
    fn test_realtime_endpoint_derived_from_api_url() {
        let config = DaemonConfig {
            api_url: "https://example.test/".into(),
            api_key: "key".into(),
            ..Default::default()
        };
        assert_eq!(
            config.realtime_endpoint(),
            "wss://example.test/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );

        let explicit = DaemonConfig {
            realtime_url: Some("ws://localhost:4000/socket".into()),
            ..config
        };
        assert_eq!(explicit.realtime_endpoint(), "ws://localhost:4000/socket");
    }
}

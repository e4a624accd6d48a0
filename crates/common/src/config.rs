//! Application configuration.
//!
//! The original deployment drove everything from module-level constants
//! (server address, staging paths, process client id). Here that state is
//! one explicit [`EngineConfig`] constructed once and passed by reference
//! into every subsystem constructor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Render engine address as `host:port`.
    pub server_address: String,

    /// Process-wide client identifier sent with every job submission.
    pub client_id: String,

    /// Render engine input (staging) directory.
    pub input_dir: PathBuf,

    /// Render engine output directory.
    pub output_dir: PathBuf,

    /// Nested subfolder of the output directory where rendered videos land.
    pub video_subfolder: String,

    /// Directory holding job template JSON files.
    pub templates_dir: PathBuf,

    /// SQLite database file path.
    pub database_path: PathBuf,

    /// Optional deadline in seconds for the engine event stream. `None`
    /// blocks until a completion signal or disconnect.
    pub event_deadline_secs: Option<u64>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "medley=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            server_address: "127.0.0.1:8188".to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            input_dir: data_dir.join("engine").join("input"),
            output_dir: data_dir.join("engine").join("output"),
            video_subfolder: "video".to_string(),
            templates_dir: data_dir.join("templates"),
            database_path: data_dir.join("media_tree.db"),
            event_deadline_secs: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load config from `MEDLEY_CONFIG` or the standard location, falling
    /// back to defaults. A fresh client id is generated when the file does
    /// not provide one.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Base HTTP URL of the render engine.
    pub fn http_base(&self) -> String {
        format!("http://{}", self.server_address)
    }

    /// Websocket URL of the render engine event stream for this client.
    pub fn event_stream_url(&self) -> String {
        format!("ws://{}/ws?clientId={}", self.server_address, self.client_id)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("MEDLEY_CONFIG") {
        return PathBuf::from(explicit);
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("medley").join("config.json")
}

/// Default data directory.
fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("medley")
}

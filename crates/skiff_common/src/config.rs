//! Skiff configuration.
//!
//! One TOML file holds everything the daemon needs: the HTTP bind address,
//! delivery backend endpoints and credentials, the self-update source, and
//! the persisted device token. Configuration lives in
//! /etc/skiff/config.toml; runtime data (resource database, update scripts)
//! lives under /var/lib/skiff.
//!
//! The daemon owns the loaded value behind a lock and hands each request a
//! snapshot; writers replace the whole value and persist it atomically
//! (temp file + rename), so concurrent updates are last-writer-wins without
//! torn reads.

use crate::device::DeviceToken;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// System configuration directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/skiff";
const CONFIG_FILE: &str = "config.toml";

/// Skiff data directory (resource database, update staging).
pub const DATA_DIR: &str = "/var/lib/skiff";

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address for the JSON API. Loopback only by default.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7931".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Delivery backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Cloud-drive backend endpoint (backend A, magnet submissions).
    #[serde(default = "default_drive_api_url")]
    pub drive_api_url: String,

    /// Stored session credential for the cloud-drive backend. Without it,
    /// magnet items are skipped rather than failed.
    #[serde(default)]
    pub drive_session: Option<String>,

    /// Stream-download backend endpoint (backend B, HTTP URL submissions).
    #[serde(default = "default_stream_api_url")]
    pub stream_api_url: String,

    /// API key passed to the stream backend, if it requires one.
    #[serde(default)]
    pub stream_api_key: Option<String>,

    /// Fixed pause between items in a push batch (milliseconds). Keeps the
    /// outbound call rate inside backend limits.
    #[serde(default = "default_push_delay_ms")]
    pub push_delay_ms: u64,

    /// Timeout applied to every backend delivery call (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_drive_api_url() -> String {
    "http://127.0.0.1:9115/offline/add".to_string()
}

fn default_stream_api_url() -> String {
    "http://127.0.0.1:9180/api/task".to_string()
}

fn default_push_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            drive_api_url: default_drive_api_url(),
            drive_session: None,
            stream_api_url: default_stream_api_url(),
            stream_api_key: None,
            push_delay_ms: default_push_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Self-update settings.
///
/// Both URLs are deliberately plain configuration values so operators can
/// audit exactly where the daemon fetches executable content from. Empty
/// means "not configured" and the update endpoint refuses to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Allow-list document URL (plain text, one device token per line).
    #[serde(default)]
    pub allowlist_url: String,

    /// Update script URL (shell text with a `# VERSION = x.y.z` marker).
    #[serde(default)]
    pub script_url: String,

    /// Timeout for the allow-list fetch and the script download (seconds).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Pause between a successful install response and script execution
    /// (milliseconds), so the HTTP response reaches the caller first.
    #[serde(default = "default_exec_delay_ms")]
    pub exec_delay_ms: u64,

    /// Download destination while a candidate is being inspected.
    #[serde(default = "default_temp_script_path")]
    pub temp_script_path: PathBuf,

    /// Final installed script path; the rename onto it is the point of no
    /// return.
    #[serde(default = "default_install_script_path")]
    pub install_script_path: PathBuf,
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_exec_delay_ms() -> u64 {
    1000
}

fn default_temp_script_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("update_temp.sh")
}

fn default_install_script_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("update.sh")
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            allowlist_url: String::new(),
            script_url: String::new(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            exec_delay_ms: default_exec_delay_ms(),
            temp_script_path: default_temp_script_path(),
            install_script_path: default_install_script_path(),
        }
    }
}

/// Complete skiff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkiffConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,

    #[serde(default)]
    pub update: UpdateSettings,

    /// Forward proxy for outbound fetches (http://host:port), if any.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Persisted device token; generated on first start.
    #[serde(default)]
    pub device_token: Option<String>,

    /// Resource database location.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("resources.db")
}

impl Default for SkiffConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            delivery: DeliverySettings::default(),
            update: UpdateSettings::default(),
            proxy: None,
            device_token: None,
            db_path: default_db_path(),
        }
    }
}

impl SkiffConfig {
    /// Load from the system config path, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load from an explicit path (tests point this at a temp dir).
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(config) = toml::from_str(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Save to the system config path.
    pub fn save(&self) -> io::Result<()> {
        self.save_to(&config_path())
    }

    /// Save to an explicit path, atomically (temp file + rename).
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        atomic_write(path, &content)
    }

    /// Make sure a device token exists, generating one if needed.
    ///
    /// Returns true when a token was generated; the caller persists the
    /// config afterwards. An existing token is never replaced.
    pub fn ensure_device_token(&mut self) -> bool {
        if self
            .device_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
        {
            return false;
        }
        let token = DeviceToken::generate();
        info!("new device token generated: {}", token);
        self.device_token = Some(token.as_str().to_string());
        true
    }

    /// Current device token, if one has been generated.
    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Merge a partial JSON patch onto this config, returning the merged
    /// value. Untouched fields keep their current values.
    pub fn merged_with(&self, patch: &serde_json::Value) -> serde_json::Result<SkiffConfig> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, patch);
        serde_json::from_value(base)
    }
}

/// Recursive JSON object merge; non-object patch values replace the base.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(
                    base_map
                        .entry(key.clone())
                        .or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value.clone(),
    }
}

/// Write a file atomically: temp file in the same directory, then rename.
fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
}

/// Get the config file path.
pub fn config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}

/// Get the data directory.
pub fn data_dir() -> PathBuf {
    PathBuf::from(DATA_DIR)
}

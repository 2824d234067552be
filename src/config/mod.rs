//! Configuration for the session worker
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/hwproxy-session/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::models::ServerProfile;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod serialization;
mod servers;
mod timing;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use servers::{BackendConfig, FileBackend, FileHwproxy, HwproxyConfig};
pub use timing::{FileTiming, TimingConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory name under the platform config/data roots
const APP_DIR: &str = "hwproxy-session";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    /// Server profile persisted on first start when none is stored yet
    pub profile: ServerProfile,

    /// Directory holding the durable storage scope
    pub data_dir: PathBuf,

    /// REST backend hosts per profile
    pub backend: BackendConfig,

    /// Per-server HWProxy instances (auth probes and login flows)
    pub hwproxy: HwproxyConfig,

    /// Poll intervals, timeouts and retry bounds
    pub timing: TimingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: ServerProfile::Prod,
            data_dir: default_data_dir(),
            backend: BackendConfig::default(),
            hwproxy: HwproxyConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure; every field optional so partial files work
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub profile: Option<String>,
    pub data_dir: Option<String>,

    /// Optional [backend] section
    pub backend: Option<FileBackend>,

    /// Optional [hwproxy] section
    pub hwproxy: Option<FileHwproxy>,

    /// Optional [timing] section
    pub timing: Option<FileTiming>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/hwproxy-session/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join(APP_DIR).join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // config is optional
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load file config if it exists
    ///
    /// A file that exists but cannot be read or parsed is an error: a broken
    /// config should fail loudly, not silently fall back to defaults.
    fn load_file_config() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file {}", path.display())),
        }
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn load() -> Result<Self> {
        let file = Self::load_file_config()?;
        Ok(Self::resolve(file, |name| std::env::var(name).ok()))
    }

    /// Combine a parsed file with environment lookups
    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        // Profile: env > file > default
        let profile = env("HWPROXY_PROFILE")
            .or(file.profile)
            .map(|p| ServerProfile::from_flag(&p))
            .unwrap_or(defaults.profile);

        // Data directory: env > file > default
        let data_dir = env("HWPROXY_DATA_DIR")
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let backend = BackendConfig::from_file(file.backend);

        // Host template: env > file > default
        let mut hwproxy = HwproxyConfig::from_file(file.hwproxy);
        if let Some(template) = env("HWPROXY_HOST_TEMPLATE") {
            hwproxy.host_template = template;
        }

        let timing = TimingConfig::from_file(file.timing);

        // Log level: env > file > default (RUST_LOG still wins at filter time)
        let mut logging = LoggingConfig::from_file(file.logging);
        if let Some(level) = env("HWPROXY_LOG_LEVEL") {
            logging.level = level;
        }

        Self {
            profile,
            data_dir,
            backend,
            hwproxy,
            timing,
            logging,
        }
    }
}

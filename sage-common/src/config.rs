//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration is a single TOML file. Every field has a built-in
//! default, so a missing or partial file never prevents startup.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SAGE_ROOT_FOLDER` environment variable
//! 3. `root_folder` key of the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "SAGE_ROOT_FOLDER";

/// Environment variable overriding the search provider API key
pub const SEARCH_API_KEY_ENV: &str = "SAGE_SEARCH_API_KEY";

/// Environment variable overriding the scoring service API key
pub const SCORING_API_KEY_ENV: &str = "SAGE_SCORING_API_KEY";

/// Bootstrap configuration loaded from TOML
///
/// These settings are read once at startup. Pipeline tuning sections
/// (`[pipeline]`, `[prefilter]`) live in the same file but are parsed by the
/// research crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for session files and the SQLite database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session store backend
    #[serde(default)]
    pub store: StoreBackend,

    /// Search provider endpoint
    #[serde(default)]
    pub search: ProviderEndpoint,

    /// Scoring service endpoint
    #[serde(default)]
    pub scoring: ProviderEndpoint,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Where session files are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON document per session under `<root>/sessions`
    #[default]
    File,
    /// One row per session in `<root>/sage.db`
    Sqlite,
}

/// HTTP endpoint of an external collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Base URL (no trailing slash required)
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client-side request rate limit
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Total request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            store: StoreBackend::default(),
            search: ProviderEndpoint::default(),
            scoring: ProviderEndpoint::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderEndpoint {
    /// API key with the environment variable taking priority over TOML
    pub fn resolve_api_key(&self, env_var_name: &str) -> Option<String> {
        match std::env::var(env_var_name) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            _ => self.api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }
}

/// Load TOML config from `path`
///
/// A missing file yields defaults with a warning; a malformed file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Write TOML config to `path`, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location (`<config_dir>/sage/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sage").join("config.toml"))
}

/// Root folder resolution with CLI → ENV → TOML → default priority
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml_config(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, path = %path.display(), "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, path = %path, "Root folder from environment");
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, path = %path.display(), "Root folder from config file");
            return path.clone();
        }

        let path = default_root_folder();
        info!(module = %self.module_name, path = %path.display(), "Root folder from compiled default");
        path
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("sage"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sage"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("sage"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sage"))
    } else {
        // ~/.local/share/sage (or /var/lib/sage for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("sage"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sage"))
    }
}

/// Creates the root folder layout on startup
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.sessions_dir())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Directory holding `session_<uuid>.json` files
    pub fn sessions_dir(&self) -> PathBuf {
        self.root_folder.join("sessions")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("sage.db")
    }
}

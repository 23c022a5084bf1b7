//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/commitscope/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/commitscope/` (~/.config/commitscope/)
//! - Data: `$XDG_DATA_HOME/commitscope/` (~/.local/share/commitscope/)
//! - State/Logs: `$XDG_STATE_HOME/commitscope/` (~/.local/state/commitscope/)
//!
//! The GitHub token is never written to the config file in our own
//! deployments; `GITHUB_TOKEN` in the environment takes precedence over
//! any `github.token` value.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// GitHub API configuration
    #[serde(default)]
    pub github: GitHubConfig,

    /// Fetch/backoff configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub API access configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// Bearer token; `GITHUB_TOKEN` env var takes precedence
    pub token: Option<String>,

    /// GraphQL endpoint (overridable for tests)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default repository owner when a request omits one
    #[serde(default = "default_repo_owner")]
    pub default_owner: String,

    /// Default repository name when a request omits one
    #[serde(default = "default_repo_name")]
    pub default_name: String,

    /// Commits requested per page (GitHub caps history pages at 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            default_owner: default_repo_owner(),
            default_name: default_repo_name(),
            page_size: default_page_size(),
            timeout_secs: default_github_timeout(),
        }
    }
}

impl GitHubConfig {
    /// Resolve the effective token: env var first, then config file.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.resolved_token().is_none() {
            return Err(Error::Config(
                "github token is required; set GITHUB_TOKEN or github.token".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > 100 {
            return Err(Error::Config(
                "github.page_size must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_api_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_repo_owner() -> String {
    "OpenRA".to_string()
}

fn default_repo_name() -> String {
    "OpenRA".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_github_timeout() -> u64 {
    30
}

/// Backoff policy knobs for transient source failures
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Max retry attempts per page before surfacing failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff delay ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Apply +/-10% random jitter to each delay
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the API server binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/commitscope/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("commitscope").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/commitscope/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("commitscope")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/commitscope/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("commitscope")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/commitscope/data.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/commitscope/commitscope.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("commitscope.log")
    }
}

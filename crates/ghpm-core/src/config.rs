//! Configuration management for ghpm-tools.
//!
//! Handles loading and saving configuration from TOML files.
//! Config files are stored in platform-specific locations:
//!
//! - **macOS/Linux**: `~/.config/ghpm-tools/config.toml`
//! - **Windows**: `%APPDATA%\ghpm-tools\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use ghpm_core::config::Config;
//!
//! let mut config = Config::load()?;
//! config.set("github.owner", "octocat")?;
//! config.set("cache.eviction_policy", "lfu")?;
//! config.save()?;
//! ```
//!
//! The token is never stored here; see `ghpm-storage`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheConfig, EvictionPolicy};
use crate::{Error, Result};

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory name.
const CONFIG_DIR_NAME: &str = "ghpm-tools";

/// Default GitHub REST/GraphQL base URL.
pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com";

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = "ghpm-tools";

// =============================================================================
// Configuration structures
// =============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Target repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubConfig>,

    /// Retry and timeout settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// GraphQL batching settings
    #[serde(default)]
    pub batch: BatchConfig,
}

/// GitHub repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// API base URL (for GitHub Enterprise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// User-Agent header override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl GitHubConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_GITHUB_URL)
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// Request executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Attempts per logical request, first attempt included
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base * 2^(n-1)` plus jitter
    pub base_retry_delay_ms: u64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 1000,
            timeout_ms: 30_000,
        }
    }
}

impl ApiConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// GraphQL batching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    /// How long the first query of a batch waits for company
    pub window_ms: u64,
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 100,
            max_batch_size: 10,
        }
    }
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

// =============================================================================
// Config implementation
// =============================================================================

impl Config {
    /// Get the configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(CONFIG_DIR_NAME))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location.
    ///
    /// Returns a default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;

        info!(path = ?path, "Config loaded");
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!(path = ?path, "Config saved");
        Ok(())
    }

    /// Apply `GITHUB_OWNER`, `GITHUB_REPO` and `GITHUB_API_URL` on top of the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let owner = lookup("GITHUB_OWNER");
        let repo = lookup("GITHUB_REPO");
        let url = lookup("GITHUB_API_URL");

        if owner.is_none() && repo.is_none() && url.is_none() {
            return;
        }

        let github = self.github_mut();
        if let Some(owner) = owner {
            github.owner = owner;
        }
        if let Some(repo) = repo {
            github.repo = repo;
        }
        if let Some(url) = url {
            github.base_url = Some(url);
        }
    }

    /// The repository section, if owner and repo are both set.
    pub fn repository(&self) -> Result<&GitHubConfig> {
        match &self.github {
            Some(gh) if !gh.owner.is_empty() && !gh.repo.is_empty() => Ok(gh),
            _ => Err(Error::Config(
                "GitHub repository not configured (set github.owner and github.repo)"
                    .to_string(),
            )),
        }
    }

    fn github_mut(&mut self) -> &mut GitHubConfig {
        self.github.get_or_insert_with(|| GitHubConfig {
            owner: String::new(),
            repo: String::new(),
            base_url: None,
            user_agent: None,
        })
    }

    /// Reject values the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(Error::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.cache.cleanup_interval_ms == 0 {
            return Err(Error::Config(
                "cache.cleanup_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Set a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `github.owner`, `cache.max_entries`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = split_key(key)?;

        match (section, field) {
            ("github", "owner") => self.github_mut().owner = value.to_string(),
            ("github", "repo") => self.github_mut().repo = value.to_string(),
            ("github", "base_url" | "url") => self.github_mut().base_url = Some(value.to_string()),
            ("github", "user_agent") => self.github_mut().user_agent = Some(value.to_string()),

            ("api", "max_retries") => self.api.max_retries = parse_value(key, value)?,
            ("api", "base_retry_delay_ms") => {
                self.api.base_retry_delay_ms = parse_value(key, value)?
            }
            ("api", "timeout_ms") => self.api.timeout_ms = parse_value(key, value)?,

            ("cache", "max_entries") => self.cache.max_entries = parse_nonzero(key, value)?,
            ("cache", "default_ttl_ms") => self.cache.default_ttl_ms = parse_value(key, value)?,
            ("cache", "eviction_policy") => {
                self.cache.eviction_policy = value
                    .parse::<EvictionPolicy>()
                    .map_err(Error::Config)?
            }
            ("cache", "max_memory_bytes") => {
                self.cache.max_memory_bytes = parse_value(key, value)?
            }
            ("cache", "cleanup_interval_ms") => {
                self.cache.cleanup_interval_ms = parse_nonzero(key, value)?
            }
            ("cache", "list_ttl_ms") => self.cache.list_ttl_ms = parse_value(key, value)?,
            ("cache", "entity_ttl_ms") => self.cache.entity_ttl_ms = parse_value(key, value)?,
            ("cache", "search_ttl_ms") => self.cache.search_ttl_ms = parse_value(key, value)?,

            ("batch", "enabled") => self.batch.enabled = parse_value(key, value)?,
            ("batch", "window_ms") => self.batch.window_ms = parse_value(key, value)?,
            ("batch", "max_batch_size") => self.batch.max_batch_size = parse_value(key, value)?,

            ("github" | "api" | "cache" | "batch", _) => {
                return Err(Error::Config(format!(
                    "Unknown {} config field: {}",
                    section, field
                )))
            }
            _ => return Err(Error::Config(format!("Unknown config section: {}", section))),
        }

        Ok(())
    }

    /// Get a configuration value by key path.
    ///
    /// Returns `Ok(None)` for unset optional values.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let (section, field) = split_key(key)?;

        let value = match (section, field) {
            ("github", _) => {
                let Some(gh) = &self.github else {
                    return Ok(None);
                };
                match field {
                    "owner" => Some(gh.owner.clone()),
                    "repo" => Some(gh.repo.clone()),
                    "base_url" | "url" => gh.base_url.clone(),
                    "user_agent" => gh.user_agent.clone(),
                    _ => {
                        return Err(Error::Config(format!(
                            "Unknown github config field: {}",
                            field
                        )))
                    }
                }
            }
            ("api", "max_retries") => Some(self.api.max_retries.to_string()),
            ("api", "base_retry_delay_ms") => Some(self.api.base_retry_delay_ms.to_string()),
            ("api", "timeout_ms") => Some(self.api.timeout_ms.to_string()),

            ("cache", "max_entries") => Some(self.cache.max_entries.to_string()),
            ("cache", "default_ttl_ms") => Some(self.cache.default_ttl_ms.to_string()),
            ("cache", "eviction_policy") => Some(
                format!("{:?}", self.cache.eviction_policy).to_lowercase(),
            ),
            ("cache", "max_memory_bytes") => Some(self.cache.max_memory_bytes.to_string()),
            ("cache", "cleanup_interval_ms") => Some(self.cache.cleanup_interval_ms.to_string()),
            ("cache", "list_ttl_ms") => Some(self.cache.list_ttl_ms.to_string()),
            ("cache", "entity_ttl_ms") => Some(self.cache.entity_ttl_ms.to_string()),
            ("cache", "search_ttl_ms") => Some(self.cache.search_ttl_ms.to_string()),

            ("batch", "enabled") => Some(self.batch.enabled.to_string()),
            ("batch", "window_ms") => Some(self.batch.window_ms.to_string()),
            ("batch", "max_batch_size") => Some(self.batch.max_batch_size.to_string()),

            ("api" | "cache" | "batch", _) => {
                return Err(Error::Config(format!(
                    "Unknown {} config field: {}",
                    section, field
                )))
            }
            _ => return Err(Error::Config(format!("Unknown config section: {}", section))),
        };

        Ok(value)
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if !field.contains('.') => Ok((section, field)),
        _ => Err(Error::Config(format!(
            "Invalid config key '{}'. Expected format: section.field",
            key
        ))),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value '{}' for {}: {}", value, key, e)))
}

fn parse_nonzero<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let parsed: T = parse_value(key, value)?;
    if parsed == T::default() {
        return Err(Error::Config(format!("{} must be greater than 0", key)));
    }
    Ok(parsed)
}

// =============================================================================
// Tests
// =============================================================================

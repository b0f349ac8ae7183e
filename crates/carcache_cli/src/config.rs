//! Configuration file support for carcache.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `CARCACHE_`, sections split by `__`,
//!    e.g. `CARCACHE_SYNC__CONCURRENCY`), plus the shorthands
//!    `CARCACHE_DATABASE_URL`, `CARCACHE_API_BASE_URL` and `CARCACHE_API_KEY`
//! 3. Config file (./carcache.toml, then ~/.config/carcache/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/carcache/carcache.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/carcache/carcache.db"  # optional, this is the default
//!
//! [api]
//! base_url = "https://auction-api.example.com/v2"
//! api_key = "..."  # or use CARCACHE_API_KEY env var
//! per_page = 25
//! timeout_secs = 30
//! source_site = "copart"
//!
//! [sync]
//! stream = "main"
//! concurrency = 4
//! requests_per_second = 5
//! empty_page_threshold = 25
//! last_page_buffer = 5
//! max_retries = 5
//! estimated_total_records = 150000
//!
//! [watchdog]
//! activity_timeout_secs = 600
//! interval_secs = 60
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use carcache::remote::{AuctionApiConfig, DEFAULT_PER_PAGE};
use carcache::sync::{StuckPolicy, SyncOptions};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Remote listing API.
    pub api: ApiConfig,
    /// Default sync options.
    pub sync: SyncConfig,
    pub watchdog: WatchdogConfig,
    pub server: ServerConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/carcache/carcache.db` if not specified.
    pub url: Option<String>,
}

/// Remote listing API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    /// Sent as `x-api-key`.
    /// Can also be set via CARCACHE_API_KEY environment variable.
    pub api_key: Option<String>,
    pub per_page: u32,
    pub timeout_secs: u64,
    /// Stored on every listing.
    pub source_site: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            per_page: DEFAULT_PER_PAGE,
            timeout_secs: 30,
            source_site: "auction".to_string(),
        }
    }
}

/// Default sync options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub stream: String,
    /// Page workers.
    pub concurrency: usize,
    pub requests_per_second: u32,
    pub empty_page_threshold: u32,
    pub last_page_buffer: u32,
    pub max_retries: u32,
    /// Progress estimate until the remote discloses its size.
    pub estimated_total_records: Option<u64>,
    pub max_pages: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let defaults = SyncOptions::default();
        Self {
            stream: defaults.stream,
            concurrency: defaults.concurrency,
            requests_per_second: defaults.requests_per_second,
            empty_page_threshold: defaults.empty_page_threshold,
            last_page_buffer: defaults.last_page_buffer,
            max_retries: defaults.max_retries,
            estimated_total_records: None,
            max_pages: None,
        }
    }
}

/// Stuck-run detection thresholds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub activity_timeout_secs: u64,
    pub max_run_duration_secs: u64,
    pub low_progress_ratio: f64,
    pub min_runtime_secs: u64,
    pub short_stall_window_secs: u64,
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let policy = StuckPolicy::default();
        Self {
            activity_timeout_secs: policy.activity_timeout.as_secs(),
            max_run_duration_secs: policy.max_run_duration.as_secs(),
            low_progress_ratio: policy.low_progress_ratio,
            min_runtime_secs: policy.min_runtime.as_secs(),
            short_stall_window_secs: policy.short_stall_window.as_secs(),
            interval_secs: carcache::sync::DEFAULT_WATCHDOG_INTERVAL.as_secs(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/carcache/config.toml)
    /// 3. Local config file (./carcache.toml)
    /// 4. Environment variables with CARCACHE_ prefix
    /// 5. Shorthand environment variables
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        // Add XDG config file if it exists
        if let Some(config_path) = Self::default_config_path()
            && config_path.exists()
        {
            tracing::debug!("Loading config from {:?}", config_path);
            builder = builder.add_source(
                File::from(config_path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Add local config file (higher priority than XDG)
        let local_config = PathBuf::from("carcache.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./carcache.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., CARCACHE_SYNC__REQUESTS_PER_SECOND -> sync.requests_per_second
        builder = builder.add_source(
            Environment::with_prefix("CARCACHE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config = match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        };
        config.apply_env_shorthands(|key| std::env::var(key).ok());
        config
    }

    /// Apply the single-underscore variables people reach for first.
    fn apply_env_shorthands(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("CARCACHE_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(base_url) = var("CARCACHE_API_BASE_URL") {
            self.api.base_url = Some(base_url);
        }
        if let Some(key) = var("CARCACHE_API_KEY") {
            self.api.api_key = Some(key);
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter enables read-write access and creates the file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("carcache.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Remote client settings, if a base URL is configured.
    pub fn api_client_config(&self) -> Option<AuctionApiConfig> {
        let base_url = self.api.base_url.as_deref()?.trim();
        if base_url.is_empty() {
            return None;
        }
        let mut config = AuctionApiConfig::new(base_url)
            .with_per_page(self.api.per_page)
            .with_source_site(self.api.source_site.clone());
        config.timeout = Duration::from_secs(self.api.timeout_secs.max(1));
        if let Some(key) = &self.api.api_key {
            config = config.with_api_key(key.clone());
        }
        Some(config)
    }

    /// Library sync options from the `[sync]` section.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            stream: self.sync.stream.clone(),
            concurrency: self.sync.concurrency,
            requests_per_second: self.sync.requests_per_second,
            empty_page_threshold: self.sync.empty_page_threshold,
            last_page_buffer: self.sync.last_page_buffer,
            max_pages: self.sync.max_pages,
            max_retries: self.sync.max_retries,
            fetch_timeout: Duration::from_secs(self.api.timeout_secs.max(1)),
            estimated_total_records: self.sync.estimated_total_records,
            ..SyncOptions::default()
        }
    }

    /// Watchdog policy from the `[watchdog]` section.
    pub fn stuck_policy(&self) -> StuckPolicy {
        StuckPolicy {
            activity_timeout: Duration::from_secs(self.watchdog.activity_timeout_secs),
            max_run_duration: Duration::from_secs(self.watchdog.max_run_duration_secs),
            low_progress_ratio: self.watchdog.low_progress_ratio,
            min_runtime: Duration::from_secs(self.watchdog.min_runtime_secs),
            short_stall_window: Duration::from_secs(self.watchdog.short_stall_window_secs),
        }
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog.interval_secs.max(1))
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "carcache").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/carcache` or `~/.local/state/carcache`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "carcache").map(|dirs| {
            // state_dir() returns None on macOS/Windows, fall back to data_dir
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(content: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(content, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert!(config.api.base_url.is_none());
        assert_eq!(config.api.per_page, 25);
        assert_eq!(config.sync.stream, "main");
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.empty_page_threshold, 25);
        assert_eq!(config.sync.last_page_buffer, 5);
        assert_eq!(config.watchdog.activity_timeout_secs, 600);
        assert_eq!(config.watchdog.max_run_duration_secs, 7_200);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_full_config_parsing() {
        let config = from_toml(
            r#"
            [database]
            url = "sqlite:///tmp/test.db"

            [api]
            base_url = "https://auction.example.com/v2"
            api_key = "secret"
            per_page = 50
            source_site = "copart"

            [sync]
            concurrency = 8
            requests_per_second = 20
            estimated_total_records = 150000

            [watchdog]
            activity_timeout_secs = 300

            [server]
            bind = "0.0.0.0:9000"
        "#,
        );

        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/test.db"));
        let api = config.api_client_config().expect("base url configured");
        assert_eq!(api.base_url, "https://auction.example.com/v2");
        assert_eq!(api.api_key.as_deref(), Some("secret"));
        assert_eq!(api.per_page, 50);
        assert_eq!(api.source_site, "copart");

        let options = config.sync_options();
        assert_eq!(options.concurrency, 8);
        assert_eq!(options.requests_per_second, 20);
        assert_eq!(options.estimated_total_records, Some(150_000));
        assert_eq!(options.empty_page_threshold, 25);

        assert_eq!(config.stuck_policy().activity_timeout, Duration::from_secs(300));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = from_toml(
            r#"
            [sync]
            concurrency = 2
        "#,
        );
        assert_eq!(config.sync.concurrency, 2);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.api.timeout_secs, 30);
    }

    #[test]
    fn test_api_client_config_requires_base_url() {
        let config = Config::default();
        assert!(config.api_client_config().is_none());

        let config = from_toml(
            r#"
            [api]
            base_url = "  "
        "#,
        );
        assert!(config.api_client_config().is_none());
    }

    #[test]
    fn test_env_shorthands_override_file_values() {
        let mut config = from_toml(
            r#"
            [database]
            url = "sqlite:///tmp/file.db"
        "#,
        );
        config.apply_env_shorthands(|key| match key {
            "CARCACHE_DATABASE_URL" => Some("postgres://localhost/carcache".to_string()),
            "CARCACHE_API_KEY" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/carcache"));
        assert_eq!(config.api.api_key.as_deref(), Some("from-env"));
        assert!(config.api.base_url.is_none());
    }

    #[test]
    fn test_database_url_defaults_to_state_dir() {
        let url = Config::default().database_url().expect("default url");
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("carcache.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str("[sync\nconcurrency = 4", FileFormat::Toml))
            .build();
        assert!(result.is_err());
    }
}

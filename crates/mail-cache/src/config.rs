//! Settings loading for the mail cache
//!
//! Supports loading settings from (in order of priority):
//! 1. JSON file in the Sift config directory (settings.json)
//! 2. Runtime environment variables (fallback, server credentials only)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::imap::{DEFAULT_BATCH_SIZE, DEFAULT_DEEP_LINK_BASE, DeepLinkTemplate, PoolSettings};
use crate::search::SearchOptions;

/// Settings filename in the Sift config directory
const SETTINGS_FILE: &str = "settings.json";

/// Default database filename in the Sift data directory
const DATABASE_FILE: &str = "mail-cache.sqlite";

/// Mail server connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ImapSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl fmt::Debug for ImapSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

fn default_host() -> String {
    "imap.gmail.com".to_string()
}

fn default_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// Cache, pool and fetch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Pooled sessions kept open
    pub workers: usize,
    /// Messages per header fetch
    pub batch_size: usize,
    pub checkout_timeout_secs: u64,
    pub checkin_timeout_secs: u64,
    /// NOOP idle sessions before reuse
    pub probe_idle: bool,
    /// Search window when the caller gives none
    ///
    /// Capped at `retention_days` when retention is on.
    pub default_lookback_days: u32,
    /// Drop cached data older than this many days; `None` keeps everything
    pub retention_days: Option<u32>,
    /// Database path; defaults to the Sift data directory
    pub database: Option<PathBuf>,
    /// Prefix for web-client links to messages
    pub deep_link_base: String,
    /// Fetch independent gaps concurrently
    pub parallel_gaps: bool,
    /// Mark gaps as covered even when the server had nothing in them
    pub record_empty_gaps: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            batch_size: DEFAULT_BATCH_SIZE,
            checkout_timeout_secs: 5,
            checkin_timeout_secs: 5,
            probe_idle: true,
            default_lookback_days: 365,
            retention_days: None,
            database: None,
            deep_link_base: DEFAULT_DEEP_LINK_BASE.to_string(),
            parallel_gaps: true,
            record_empty_gaps: false,
        }
    }
}

/// Everything needed to run the cache against one mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub imap: ImapSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Settings {
    /// Load settings from the config file, falling back to environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(SETTINGS_FILE) {
            return config::load_json(SETTINGS_FILE);
        }
        Self::from_env()
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse settings JSON")
    }

    /// Build settings from environment variables with default tuning
    ///
    /// Reads `SIFT_IMAP_USER` / `SIFT_IMAP_PASSWORD` (or `GMAIL_ADDRESS` /
    /// `GMAIL_APP_PASSWORD`) and an optional `SIFT_IMAP_HOST`.
    pub fn from_env() -> Result<Self> {
        let username = env_either("SIFT_IMAP_USER", "GMAIL_ADDRESS")
            .context("SIFT_IMAP_USER or GMAIL_ADDRESS environment variable not set")?;
        let password = env_either("SIFT_IMAP_PASSWORD", "GMAIL_APP_PASSWORD")
            .context("SIFT_IMAP_PASSWORD or GMAIL_APP_PASSWORD environment variable not set")?;
        let host = std::env::var("SIFT_IMAP_HOST").unwrap_or_else(|_| default_host());

        Ok(Self {
            imap: ImapSettings {
                host,
                port: default_port(),
                username,
                password,
                mailbox: default_mailbox(),
            },
            cache: CacheSettings::default(),
        })
    }

    /// Get the default settings file path (~/.config/sift/settings.json)
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }

    /// Resolve the database path, defaulting to the Sift data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.cache.database {
            Some(path) => Ok(path.clone()),
            None => {
                let dir = config::ensure_data_dir()?;
                Ok(dir.join(DATABASE_FILE))
            }
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            workers: self.cache.workers,
            checkout_timeout: Duration::from_secs(self.cache.checkout_timeout_secs),
            checkin_timeout: Duration::from_secs(self.cache.checkin_timeout_secs),
            probe_idle: self.cache.probe_idle,
        }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            default_lookback: chrono::Duration::days(i64::from(self.default_lookback_days())),
            batch_size: self.cache.batch_size,
            links: DeepLinkTemplate::new(self.cache.deep_link_base.clone()),
            parallel_gaps: self.cache.parallel_gaps,
            record_empty_gaps: self.cache.record_empty_gaps,
        }
    }

    /// Default search window in days, capped at the retention window
    pub fn default_lookback_days(&self) -> u32 {
        match self.cache.retention_days {
            Some(retention) => self.cache.default_lookback_days.min(retention),
            None => self.cache.default_lookback_days,
        }
    }

    /// Retention window, if one is configured
    pub fn retention(&self) -> Option<chrono::Duration> {
        self.cache
            .retention_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }
}

fn env_either(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .ok()
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_settings() {
        let json = r#"{
            "imap": {
                "username": "me@example.com",
                "password": "app-password"
            }
        }"#;

        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.imap.host, "imap.gmail.com");
        assert_eq!(settings.imap.port, 993);
        assert_eq!(settings.imap.mailbox, "INBOX");
        assert_eq!(settings.cache.workers, 5);
        assert_eq!(settings.cache.batch_size, 100);
        assert_eq!(settings.cache.default_lookback_days, 365);
        assert!(settings.retention().is_none());
    }

    #[test]
    fn test_parse_tuned_settings() {
        let json = r#"{
            "imap": {
                "host": "mail.example.com",
                "port": 1993,
                "username": "me",
                "password": "secret",
                "mailbox": "Archive"
            },
            "cache": {
                "workers": 2,
                "batch_size": 25,
                "retention_days": 90,
                "database": "/tmp/cache.sqlite",
                "parallel_gaps": false
            }
        }"#;

        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.imap.mailbox, "Archive");
        assert_eq!(settings.pool_settings().workers, 2);
        assert_eq!(settings.pool_settings().checkout_timeout, Duration::from_secs(5));
        assert_eq!(settings.search_options().batch_size, 25);
        assert!(!settings.search_options().parallel_gaps);
        assert_eq!(settings.retention(), Some(chrono::Duration::days(90)));
        assert_eq!(
            settings.database_path().unwrap(),
            PathBuf::from("/tmp/cache.sqlite")
        );
    }

    #[test]
    fn test_default_lookback_capped_by_retention() {
        let json = r#"{
            "imap": { "username": "me", "password": "secret" },
            "cache": { "default_lookback_days": 365, "retention_days": 30 }
        }"#;

        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.default_lookback_days(), 30);
        assert_eq!(
            settings.search_options().default_lookback,
            chrono::Duration::days(30)
        );

        let longer = Settings::from_json(
            r#"{ "imap": { "username": "me", "password": "secret" },
                 "cache": { "default_lookback_days": 7, "retention_days": 30 } }"#,
        )
        .unwrap();
        assert_eq!(longer.default_lookback_days(), 7);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let json = r#"{ "imap": { "host": "mail.example.com" } }"#;
        assert!(Settings::from_json(json).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = Settings::from_json(
            r#"{ "imap": { "username": "me", "password": "hunter2" } }"#,
        )
        .unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}

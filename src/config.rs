//! Configuration module for Meshbook
//!
//! Handles loading configuration from:
//! - The credentials file (`./api.conf` unless `--conf` points elsewhere)
//! - Environment variables
//!
//! `.conf` files (and any other extension not listed below) are INI:
//!
//! ```ini
//! [meshcentral-account]
//! hostname = mesh.example.com
//! username = admin
//! password = secret
//! totp_secret = JBSWY3DPEHPK3PXP
//!
//! [meshbook]
//! intertask_delay_secs = 1
//! history_dir = ./history
//! ```
//!
//! The same tables can be written as `.toml`, `.yml`/`.yaml` or `.json`.

use ini::{Ini, ParseOption};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::session::meshcentral::Credentials;

/// Default credentials file
pub const DEFAULT_CONFIG_PATH: &str = "./api.conf";

/// Name of the credentials table
pub const ACCOUNT_SECTION: &str = "meshcentral-account";

/// Name of the run defaults table
pub const RUN_SECTION: &str = "meshbook";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server account
    #[serde(rename = "meshcentral-account", default)]
    pub account: Credentials,

    /// Run defaults
    #[serde(rename = "meshbook", default)]
    pub run: RunDefaults,
}

/// Run defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Pause between tasks, in seconds
    pub intertask_delay_secs: u64,

    /// Budget for each batched command, in seconds
    pub command_timeout_secs: u64,

    /// Budget for the device listing, in seconds
    pub list_timeout_secs: u64,

    /// Countdown before the first task, in seconds
    pub grace_period_secs: u64,

    /// Where run logs are kept
    pub history_dir: PathBuf,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            intertask_delay_secs: 1,
            command_timeout_secs: 1800,
            list_timeout_secs: 10,
            grace_period_secs: 3,
            history_dir: PathBuf::from("./history"),
        }
    }
}

impl RunDefaults {
    /// Timeout for the device listing
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    /// Grace period before execution
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Config {
    /// Load the configuration file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }

        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let parse_error =
            |e: String| Error::Config(format!("failed to parse '{}': {}", path.display(), e));

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            "toml" => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            _ => Self::from_ini(&content).map_err(parse_error),
        }
    }

    /// Parse the INI layout of `api.conf`
    pub fn from_ini(content: &str) -> std::result::Result<Self, String> {
        // Backslashes in passwords are literal
        let options = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(content, options).map_err(|e| e.to_string())?;

        let mut config = Self::default();
        if let Some(account) = ini.section(Some(ACCOUNT_SECTION)) {
            for (key, value) in account.iter() {
                let value = value.to_string();
                match key.to_ascii_lowercase().as_str() {
                    "hostname" => config.account.hostname = value,
                    "username" => config.account.username = value,
                    "password" => config.account.password = value,
                    "token" => config.account.token = Some(value),
                    "totp_secret" => config.account.totp_secret = Some(value),
                    other => debug!("Ignoring key '{}' in [{}]", other, ACCOUNT_SECTION),
                }
            }
        }

        if let Some(run) = ini.section(Some(RUN_SECTION)) {
            for (key, value) in run.iter() {
                let seconds = || {
                    value.trim().parse::<u64>().map_err(|_| {
                        format!("'{}' in [{}] must be a number of seconds, got '{}'", key, RUN_SECTION, value)
                    })
                };
                match key.to_ascii_lowercase().as_str() {
                    "intertask_delay_secs" => config.run.intertask_delay_secs = seconds()?,
                    "command_timeout_secs" => config.run.command_timeout_secs = seconds()?,
                    "list_timeout_secs" => config.run.list_timeout_secs = seconds()?,
                    "grace_period_secs" => config.run.grace_period_secs = seconds()?,
                    "history_dir" => config.run.history_dir = PathBuf::from(value),
                    other => debug!("Ignoring key '{}' in [{}]", other, RUN_SECTION),
                }
            }
        }

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(hostname) = std::env::var("MESHBOOK_HOSTNAME") {
            self.account.hostname = hostname;
        }

        if let Ok(username) = std::env::var("MESHBOOK_USERNAME") {
            self.account.username = username;
        }

        if let Ok(password) = std::env::var("MESHBOOK_PASSWORD") {
            self.account.password = password;
        }

        if let Ok(token) = std::env::var("MESHBOOK_TOKEN") {
            self.account.token = Some(token);
        }

        if let Ok(secret) = std::env::var("MESHBOOK_TOTP_SECRET") {
            self.account.totp_secret = Some(secret);
        }

        if let Ok(delay) = std::env::var("MESHBOOK_INTERTASK_DELAY") {
            if let Ok(n) = delay.parse() {
                self.run.intertask_delay_secs = n;
            }
        }

        if let Ok(timeout) = std::env::var("MESHBOOK_COMMAND_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.run.command_timeout_secs = n;
            }
        }

        if let Ok(dir) = std::env::var("MESHBOOK_HISTORY_DIR") {
            self.run.history_dir = PathBuf::from(dir);
        }
    }

    /// Check that every required account value is present
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("hostname", &self.account.hostname),
            ("username", &self.account.username),
            ("password", &self.account.password),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::MissingConfig {
                    section: ACCOUNT_SECTION.to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Executor settings derived from the run defaults
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_intertask_delay(Duration::from_secs(self.run.intertask_delay_secs))
            .with_command_timeout(Duration::from_secs(self.run.command_timeout_secs))
    }
}

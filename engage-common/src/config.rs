//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::time::secs_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding the transport root URL
pub const ENV_BASE_URL: &str = "ENGAGE_BASE_URL";
/// Environment variable supplying the bearer token
pub const ENV_TOKEN: &str = "ENGAGE_TOKEN";
/// Environment variable pointing at the TOML config file
pub const ENV_CONFIG: &str = "ENGAGE_CONFIG";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transport root, e.g. `https://example.org/api`
    pub base_url: String,
    /// Age after which a cached record is refreshed on mount
    pub staleness_secs: u64,
    /// Upper bound on a single transport call
    pub request_timeout_secs: u64,
    /// How long an unsubscribed record stays cached
    pub retention_secs: u64,
    /// Broadcast capacity of the engine's EventBus
    pub event_bus_capacity: usize,
    /// Default tracing level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            staleness_secs: 30,
            request_timeout_secs: 10,
            retention_secs: 300,
            event_bus_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse configuration from TOML text; absent keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn staleness(&self) -> Duration {
        secs_to_duration(self.staleness_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs_to_duration(self.request_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        secs_to_duration(self.retention_secs)
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub config_path: Option<PathBuf>,
}

/// Resolve the effective configuration
///
/// A missing config file is not an error: a warning is logged and defaults
/// apply. A config file that exists but does not parse is an error.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<SyncConfig> {
    let mut config = match config_file_path(overrides.config_path.as_deref()) {
        Some(path) if path.exists() => {
            debug!("Loading config file {}", path.display());
            SyncConfig::load_file(&path)?
        }
        Some(path) => {
            warn!("Config file not found at {}, using defaults", path.display());
            SyncConfig::default()
        }
        None => {
            warn!("Could not determine config directory, using defaults");
            SyncConfig::default()
        }
    };

    // Priority 1: Command-line argument, Priority 2: Environment variable
    if let Some(url) = overrides.base_url.clone() {
        config.base_url = url;
    } else if let Ok(url) = std::env::var(ENV_BASE_URL) {
        config.base_url = url;
    }

    config.base_url = config.base_url.trim_end_matches('/').to_string();
    config.validate()?;
    Ok(config)
}

/// Resolve the bearer token: command line first, then environment
pub fn resolve_token(cli_arg: Option<&str>) -> Option<String> {
    cli_arg
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_TOKEN).ok())
        .filter(|t| !t.trim().is_empty())
}

/// Config file location: explicit path, then `ENGAGE_CONFIG`, then the
/// platform config directory (`~/.config/engage/config.toml` on Linux)
fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }
    default_config_path()
}

/// Platform default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("engage").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.staleness(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("staleness_secs = 5\n").unwrap();
        assert_eq!(config.staleness_secs, 5);
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let err = SyncConfig::from_toml_str("staleness_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SyncConfig {
            base_url: "ftp://example.org".to_string(),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            request_timeout_secs: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

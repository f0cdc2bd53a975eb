//! Layered configuration for the watcher core.
//!
//! Settings are resolved from defaults, an optional `dirpulse.toml` file
//! and environment variable overrides, in that order.
//!
//! # Environment Variables
//!
//! Variables must be prefixed with `DP_` and use double underscores to
//! separate nested levels:
//! - `DP_WATCHER__DEFAULT_POLL_MS=250` sets `watcher.default_poll_ms`
//! - `DP_LOGGING__DEFAULT=debug` sets `logging.default`
//! - `DP_PROVIDER__KIND=notify` sets `provider.kind`

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Watcher core settings.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Provider selection.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Pump sleep used when no active request names a positive rate.
    #[serde(default = "default_poll_ms")]
    pub default_poll_ms: u64,

    /// Outstanding dispatch handles kept before pruning finished ones.
    #[serde(default = "default_dispatch_high_water")]
    pub dispatch_high_water: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            default_poll_ms: default_poll_ms(),
            dispatch_high_water: default_dispatch_high_water(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    /// Which provider implementation the factory builds.
    #[serde(default = "default_provider_kind")]
    pub kind: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level filter.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `dirpulse.toml` (if present) layered over
    /// defaults, with `DP_` environment variables taking precedence.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from("dirpulse.toml")
    }

    /// Load settings from an explicit config file path.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DP_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }
}

fn default_poll_ms() -> u64 {
    100
}

fn default_dispatch_high_water() -> usize {
    1024
}

fn default_provider_kind() -> String {
    "notify".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.watcher.default_poll_ms, 100);
        assert_eq!(settings.watcher.dispatch_high_water, 1024);
        assert_eq!(settings.provider.kind, "notify");
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/nonexistent/dirpulse.toml").unwrap();
        assert_eq!(settings.watcher.default_poll_ms, 100);
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirpulse.toml");
        std::fs::write(&path, "[watcher]\ndefault_poll_ms = 250\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.watcher.default_poll_ms, 250);
        // untouched sections keep their defaults
        assert_eq!(settings.provider.kind, "notify");
    }
}

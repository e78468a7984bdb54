// Configuration module - loads and validates bridge settings
//
// This module is responsible for:
// 1. Providing sane defaults for every setting
// 2. Reading an optional JSON configuration file
// 3. Applying environment variable and command-line overrides
// 4. Validating the result before anything is started

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file format: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Bridge configuration
///
/// Every field has a default, so an empty JSON object is a valid file.
///
/// # Example Config File
/// ```json
/// {
///   "port": 3001,
///   "api_token": "change-me",
///   "cache_ttl_secs": 30,
///   "broadcast_interval_secs": 5,
///   "cors_origins": ["https://dashboard.example.com"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the HTTP server binds to
    pub host: IpAddr,

    /// Port the HTTP server listens on
    pub port: u16,

    /// Bearer token required on API and WebSocket requests
    /// Authentication is disabled when unset
    pub api_token: Option<String>,

    /// Default time-to-live for cached metric snapshots, in seconds
    pub cache_ttl_secs: u64,

    /// How often expired cache entries are reclaimed, in seconds
    pub cache_sweep_secs: u64,

    /// Interval between pushes to WebSocket subscribers, in seconds
    pub broadcast_interval_secs: u64,

    /// Upper bound for any single OS or Docker call, in milliseconds
    /// Must stay below the broadcast interval
    pub adapter_timeout_ms: u64,

    /// Origins allowed to make cross-origin requests
    pub cors_origins: Vec<String>,

    /// Requests allowed per client within one rate-limit window
    pub rate_limit_requests: u32,

    /// Length of the rate-limit window, in seconds
    pub rate_limit_window_secs: u64,

    /// Messages buffered per subscriber before it is considered stalled
    pub subscriber_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 3001,
            api_token: None,
            cache_ttl_secs: 30,
            cache_sweep_secs: 60,
            broadcast_interval_secs: 5,
            adapter_timeout_ms: 2000,
            cors_origins: Vec::new(),
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            subscriber_queue: 16,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    /// * `Ok(BridgeConfig)` - Parsed configuration, missing fields defaulted
    /// * `Err(ConfigError)` - File unreadable or not valid JSON
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from: {}", path.display());

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&contents)
    }

    /// Parses a JSON document; an empty `api_token` counts as unset
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let mut config: BridgeConfig = serde_json::from_str(contents)?;
        config.api_token = config.api_token.filter(|t| !t.is_empty());
        Ok(config)
    }

    /// Applies overrides from `BRIDGE_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok(), ENV_OVERRIDES)
    }

    /// Applies overrides from command-line flags
    ///
    /// # Supported Flags
    /// `--host`, `--port`, `--token`, `--cache-ttl`, `--interval`
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        self.apply_overrides(|flag| find_arg(args, flag), ARG_OVERRIDES)
    }

    fn apply_overrides<F>(&mut self, lookup: F, keys: &[(&str, Setting)]) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, setting) in keys {
            if let Some(value) = lookup(name) {
                self.set(*setting, name, &value)?;
            }
        }
        Ok(())
    }

    fn set(&mut self, setting: Setting, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        match setting {
            Setting::Host => self.host = value.parse().map_err(|_| invalid())?,
            Setting::Port => self.port = value.parse().map_err(|_| invalid())?,
            Setting::Token => {
                self.api_token = Some(value.to_string()).filter(|t| !t.is_empty());
            }
            Setting::CacheTtl => self.cache_ttl_secs = value.parse().map_err(|_| invalid())?,
            Setting::Interval => {
                self.broadcast_interval_secs = value.parse().map_err(|_| invalid())?
            }
        }
        Ok(())
    }

    /// Checks that the combination of settings can actually run
    ///
    /// # Rules
    /// - TTL, sweep interval, broadcast interval and rate-limit window are non-zero
    /// - The adapter timeout is shorter than the broadcast interval so one
    ///   slow source can never stall a tick past the next one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidSettings("cache_ttl_secs must be > 0".into()));
        }
        if self.cache_sweep_secs == 0 {
            return Err(ConfigError::InvalidSettings("cache_sweep_secs must be > 0".into()));
        }
        if self.broadcast_interval_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "broadcast_interval_secs must be > 0".into(),
            ));
        }
        if self.rate_limit_window_secs == 0 || self.rate_limit_requests == 0 {
            return Err(ConfigError::InvalidSettings(
                "rate limit window and request count must be > 0".into(),
            ));
        }
        if self.subscriber_queue == 0 {
            return Err(ConfigError::InvalidSettings("subscriber_queue must be > 0".into()));
        }
        if self.adapter_timeout() >= self.broadcast_interval() {
            return Err(ConfigError::InvalidSettings(format!(
                "adapter_timeout_ms ({}) must be shorter than the broadcast interval ({}s)",
                self.adapter_timeout_ms, self.broadcast_interval_secs
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Logs the effective settings, with the token masked
    pub fn log_summary(&self) {
        info!("  Listen address: {}", self.bind_addr());
        info!("  Cache TTL: {}s (sweep every {}s)", self.cache_ttl_secs, self.cache_sweep_secs);
        info!("  Broadcast interval: {}s", self.broadcast_interval_secs);
        info!("  Adapter timeout: {}ms", self.adapter_timeout_ms);
        info!(
            "  Rate limit: {} requests / {}s",
            self.rate_limit_requests, self.rate_limit_window_secs
        );
        info!("  CORS origins: {:?}", self.cors_origins);

        match &self.api_token {
            Some(token) => info!("  API token: {}", mask_token(token)),
            None => warn!("  API token: not set, authentication is DISABLED"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Setting {
    Host,
    Port,
    Token,
    CacheTtl,
    Interval,
}

const ENV_OVERRIDES: &[(&str, Setting)] = &[
    ("BRIDGE_HOST", Setting::Host),
    ("BRIDGE_PORT", Setting::Port),
    ("BRIDGE_API_TOKEN", Setting::Token),
    ("BRIDGE_CACHE_TTL", Setting::CacheTtl),
    ("BRIDGE_BROADCAST_INTERVAL", Setting::Interval),
];

const ARG_OVERRIDES: &[(&str, Setting)] = &[
    ("--host", Setting::Host),
    ("--port", Setting::Port),
    ("--token", Setting::Token),
    ("--cache-ttl", Setting::CacheTtl),
    ("--interval", Setting::Interval),
];

/// Finds the value following `flag` in the argument list
pub fn find_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|pos| args.get(pos + 1))
        .map(|s| s.to_string())
}

/// Hides all but the first and last two characters of a secret
///
/// # Example
/// ```
/// "supersecret" becomes "su*******et"
/// ```
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let middle = "*".repeat(chars.len() - 4);
    format!(
        "{}{}{}",
        chars[..2].iter().collect::<String>(),
        middle,
        chars[chars.len() - 2..].iter().collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.broadcast_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BridgeConfig::from_json(r#"{"port": 8080, "api_token": "abc"}"#).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_token.as_deref(), Some("abc"));
        assert_eq!(config.broadcast_interval_secs, 5);
    }

    #[test]
    fn test_empty_file_token_disables_auth() {
        let config = BridgeConfig::from_json(r#"{"api_token": ""}"#).unwrap();
        assert_eq!(config.api_token, None);

        let mut from_flag = BridgeConfig::default();
        from_flag.apply_args(&args(&["bridge", "--token", ""])).unwrap();
        assert_eq!(from_flag.api_token, config.api_token);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = BridgeConfig::default();
        config
            .apply_args(&args(&["bridge", "--port", "9000", "--interval", "10", "--token", "t0k"]))
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.broadcast_interval_secs, 10);
        assert_eq!(config.api_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_invalid_cli_value() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_args(&args(&["bridge", "--port", "not-a-port"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_timeout_must_be_shorter_than_interval() {
        let config = BridgeConfig {
            broadcast_interval_secs: 2,
            adapter_timeout_ms: 2000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = BridgeConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("supersecret"), "su*******et");
        assert_eq!(mask_token("abc"), "***");
    }
}

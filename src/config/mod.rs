//! Gateway configuration, read from the process environment.
//!
//! | Variable               | Default                          |
//! |------------------------|----------------------------------|
//! | `OPENWEATHER_API_KEY`  | unset (warning, not an error)    |
//! | `OPENWEATHER_BASE_URL` | `https://api.openweathermap.org` |
//! | `GATEWAY_ADDR`         | `0.0.0.0:5000`                   |
//! | `GATEWAY_SERVE_STALE`  | `false`                          |

use std::time::Duration;

use thiserror::Error;

pub const API_KEY_VAR: &str = "OPENWEATHER_API_KEY";
pub const BASE_URL_VAR: &str = "OPENWEATHER_BASE_URL";
pub const ADDR_VAR: &str = "GATEWAY_ADDR";
pub const SERVE_STALE_VAR: &str = "GATEWAY_SERVE_STALE";

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
pub const DEFAULT_ADDR: &str = "0.0.0.0:5000";

/// Tempelhofer Feld, Berlin.
pub const DEFAULT_LOCATION: Location = Location {
    latitude: 52.4732,
    longitude: 13.4053,
};

pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Left in deployment templates in place of a real key.
const PLACEHOLDER_KEY: &str = "YOUR_API_KEY_HERE";

/// Configuration values that are present but unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a boolean (true/false/1/0/yes/no/on/off), got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Non-fatal problems worth a startup warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("{var} is not set; upstream requests will be rejected until it is")]
    MissingCredential { var: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub listen_addr: String,
    pub location: Location,
    pub cache_ttl: Duration,
    pub upstream_timeout: Duration,
    /// Serve an expired entry (flagged `stale`) when a refresh fails, instead of `503`.
    pub serve_stale_on_error: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            listen_addr: DEFAULT_ADDR.to_owned(),
            location: DEFAULT_LOCATION,
            cache_ttl: CACHE_TTL,
            upstream_timeout: UPSTREAM_TIMEOUT,
            serve_stale_on_error: false,
        }
    }
}

impl GatewayConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.api_key = lookup(API_KEY_VAR)
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty() && key != PLACEHOLDER_KEY);

        if let Some(url) = lookup(BASE_URL_VAR) {
            let url = url.trim().trim_end_matches('/');
            if url.is_empty() {
                return Err(ConfigError::Empty { var: BASE_URL_VAR });
            }
            config.base_url = url.to_owned();
        }

        if let Some(addr) = lookup(ADDR_VAR) {
            let addr = addr.trim();
            if addr.is_empty() {
                return Err(ConfigError::Empty { var: ADDR_VAR });
            }
            config.listen_addr = addr.to_owned();
        }

        if let Some(raw) = lookup(SERVE_STALE_VAR) {
            config.serve_stale_on_error = parse_bool(&raw).ok_or(ConfigError::InvalidBool {
                var: SERVE_STALE_VAR,
                value: raw,
            })?;
        }

        Ok(config)
    }

    /// Problems that do not stop the gateway from starting.
    pub fn issues(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.api_key.is_none() {
            issues.push(ConfigIssue::MissingCredential { var: API_KEY_VAR });
        }
        issues
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

use std::time::Duration;

use reqwest::Url;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the VJTS API (default: `http://127.0.0.1:8000`).
    pub api_url: Url,
    /// Timeout for the cancel request in seconds (default: `300`).
    /// Uploads and the event stream have no overall timeout; only the
    /// connect timeout applies to them.
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds (default: `10`).
    pub connect_timeout_secs: u64,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {value}")]
    InvalidUrl { var: &'static str, value: String },

    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `VJTS_API_URL`              | `http://127.0.0.1:8000`  |
    /// | `VJTS_REQUEST_TIMEOUT_SECS` | `300`                    |
    /// | `VJTS_CONNECT_TIMEOUT_SECS` | `10`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = match lookup("VJTS_API_URL") {
            Some(value) => parse_url("VJTS_API_URL", &value)?,
            None => Self::default().api_url,
        };

        let request_timeout_secs = parse_secs(
            "VJTS_REQUEST_TIMEOUT_SECS",
            lookup("VJTS_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let connect_timeout_secs = parse_secs(
            "VJTS_CONNECT_TIMEOUT_SECS",
            lookup("VJTS_CONNECT_TIMEOUT_SECS"),
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;

        Ok(Self {
            api_url,
            request_timeout_secs,
            connect_timeout_secs,
        })
    }

    /// Replace the API URL, e.g. from a command-line flag.
    pub fn with_api_url(mut self, value: &str) -> Result<Self, ConfigError> {
        self.api_url = parse_url("--api-url", value)?;
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        var,
        value: value.to_string(),
    };
    let url = Url::parse(value.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(url)
}

fn parse_secs(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let parsed = value.trim().parse::<u64>();
    match parsed {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidNumber { var, value }),
    }
}

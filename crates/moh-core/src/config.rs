use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host '{0}' must start with http:// or https://")]
    InvalidHost(String),
    #[error("access token {0}")]
    InvalidToken(&'static str),
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Where and how telemetry records are delivered.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    host: String,
    token: String,
    pub timeout: Duration,
}

impl UploadConfig {
    pub fn new(host: &str, token: &str) -> Result<Self, ConfigError> {
        let host = host.trim();
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(ConfigError::InvalidHost(host.to_string()));
        }

        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::InvalidToken("must not be empty"));
        }
        if token.contains('/') {
            return Err(ConfigError::InvalidToken("must not contain '/'"));
        }

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Device telemetry endpoint: `{host}/api/v1/{token}/telemetry`.
    pub fn endpoint(&self) -> String {
        format!("{}/api/v1/{}/telemetry", self.host, self.token)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

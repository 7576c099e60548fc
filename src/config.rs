//! Client settings, usually read from a `config.toml`

use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Deserializer};
use crate::core::{Result, UploadError};

pub const DEFAULT_URL: &str = "https://api.cloudup.com/1";
pub const DEFAULT_CONCURRENCY: usize = 8;
/// 200 MiB
pub const MAX_FILE_SIZE: u64 = 209_715_200;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
/// 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<u64>::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

/// How requests authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { user: String, pass: String },
    Token(String),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// API base url
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub token: Option<String>,
    pub user_agent: String,
    /// Items uploaded at once by a stream save
    pub concurrency: usize,
    /// Largest file accepted, in bytes
    pub max_file_size: u64,
    /// Minimum gap between progress snapshots sent upstream, in milliseconds
    #[serde(deserialize_with = "deserialize_millis")]
    pub progress_interval: Duration,
    /// Read buffer for payload streaming
    pub chunk_size: usize,
    /// Request timeout, in seconds
    #[serde(deserialize_with = "deserialize_secs")]
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: None,
            pass: None,
            token: None,
            user_agent: format!("upstream/{}", env!("CARGO_PKG_VERSION")),
            concurrency: DEFAULT_CONCURRENCY,
            max_file_size: MAX_FILE_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
        let config_str = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<ClientConfig> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Basic auth wins over a token when both are set.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.user, &self.pass, &self.token) {
            (Some(user), Some(pass), _) => Ok(Credentials::Basic {
                user: user.clone(),
                pass: pass.clone(),
            }),
            (_, _, Some(token)) => Ok(Credentials::Token(token.clone())),
            _ => Err(UploadError::config_error("basic auth credentials or auth token required")),
        }
    }
}

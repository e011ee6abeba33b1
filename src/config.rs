//! Stream configuration, endpoint construction and credentials
//!
//! Configuration can be built in code or loaded from YAML:
//!
//! ```rust
//! use framestream::StreamConfig;
//! use std::time::Duration;
//!
//! let config = StreamConfig::from_yaml_str(
//!     r#"
//! base_url: ws://localhost:8080
//! stream_id: run_123
//! max_frames_buffer: 100
//! backoff:
//!   base_ms: 500
//! "#,
//! )
//! .unwrap();
//! assert_eq!(config.max_frames_buffer, 100);
//! // Without cap_ms the ceiling is thirty times the base
//! assert_eq!(config.backoff().cap(), Duration::from_secs(15));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::backoff::Backoff;
use crate::buffer::DEFAULT_MAX_FRAMES;
use crate::{Result, StreamError};

/// Backoff settings in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    /// Ceiling on a single delay; thirty times `base_ms` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_ms: Option<u64>,
}

impl BackoffConfig {
    /// Effective ceiling in milliseconds
    pub fn resolved_cap_ms(&self) -> u64 {
        self.cap_ms
            .unwrap_or_else(|| self.base_ms.saturating_mul(u64::from(Backoff::CAP_FACTOR)))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_ms: Backoff::DEFAULT_BASE.as_millis() as u64, cap_ms: None }
    }
}

/// Settings for one logical stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Scheme and host, e.g. `ws://localhost:8080`
    pub base_url: String,
    /// Path segment(s) in front of the stream id
    pub stream_path: String,
    /// Identifier of the stream (run) to follow
    pub stream_id: String,
    /// Bound on buffered frames
    pub max_frames_buffer: usize,
    /// Reconnect automatically after the transport closes
    pub reconnect: bool,
    pub backoff: BackoffConfig,
    /// Upper bound on a single connection attempt
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8080".to_string(),
            stream_path: "ws/runs".to_string(),
            stream_id: String::new(),
            max_frames_buffer: DEFAULT_MAX_FRAMES,
            reconnect: true,
            backoff: BackoffConfig::default(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    /// Config for `stream_id` at `base_url` with defaults elsewhere
    pub fn new(base_url: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), stream_id: stream_id.into(), ..Self::default() }
    }

    /// Parse and validate YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(StreamError::invalid_config("base_url must not be empty"));
        }
        if !(self.base_url.starts_with("ws://") || self.base_url.starts_with("wss://")) {
            return Err(StreamError::invalid_config(format!(
                "base_url must use ws:// or wss://, got '{}'",
                self.base_url
            )));
        }
        parse_base_url(&self.base_url)?;
        if self.stream_id.trim().is_empty() {
            return Err(StreamError::invalid_config("stream_id must not be empty"));
        }
        if self.max_frames_buffer == 0 {
            return Err(StreamError::invalid_config("max_frames_buffer must be at least 1"));
        }
        if self.backoff.base_ms == 0 {
            return Err(StreamError::invalid_config("backoff.base_ms must be at least 1"));
        }
        if let Some(cap_ms) = self.backoff.cap_ms.filter(|cap| *cap < self.backoff.base_ms) {
            return Err(StreamError::invalid_config(format!(
                "backoff.cap_ms ({cap_ms}) is below backoff.base_ms ({})",
                self.backoff.base_ms
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::invalid_config("connect_timeout_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_millis(self.backoff.resolved_cap_ms()),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `<base_url>/<stream_path>/<stream_id>` with slashes normalized.
    ///
    /// The stream id is one percent-encoded path segment.
    ///
    /// # Errors
    ///
    /// `Config` if `base_url` is not a valid absolute URL.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let mut url = parse_base_url(&self.base_url)?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StreamError::invalid_config("base_url cannot carry a path"))?;
            path.pop_if_empty();
            path.extend(self.stream_path.split('/').filter(|segment| !segment.is_empty()));
            let stream_id = self.stream_id.trim_matches('/');
            if !stream_id.is_empty() {
                path.push(stream_id);
            }
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Endpoint { url, stream_id: self.stream_id.clone() })
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    Url::parse(base_url)
        .map_err(|e| StreamError::invalid_config(format!("invalid base_url '{base_url}': {e}")))
}

/// Token-free address of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    stream_id: String,
}

impl Endpoint {
    pub fn address(&self) -> &str {
        self.url.as_str()
    }

    /// Full connection URL carrying `token` as a form-encoded query parameter
    pub fn with_token(&self, token: &str) -> StreamUrl {
        StreamUrl { url: self.url.clone(), token: token.to_string() }
    }

    /// Stream id as configured, before encoding
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address())
    }
}

/// Connection URL whose token is masked in every diagnostic rendering
#[derive(Clone, PartialEq, Eq)]
pub struct StreamUrl {
    url: Url,
    token: String,
}

impl StreamUrl {
    /// Raw URL including the encoded token; only for opening the transport
    pub fn expose(&self) -> String {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", &self.token);
        url.into()
    }

    /// Address without the query string
    pub fn address(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?token={}", self.url, mask_token(&self.token))
    }
}

impl fmt::Debug for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamUrl").field(&format_args!("{self}")).finish()
    }
}

/// Keep the first four characters of long tokens and hide the rest
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}****")
}

/// Source of the opaque access token, consulted on every connection attempt
pub trait CredentialProvider: Send + Sync + 'static {
    fn access_token(&self) -> Result<String>;
}

/// Fixed token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&mask_token(&self.0)).finish()
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

impl CredentialProvider for String {
    fn access_token(&self) -> Result<String> {
        Ok(self.clone())
    }
}

impl CredentialProvider for &'static str {
    fn access_token(&self) -> Result<String> {
        Ok((*self).to_string())
    }
}

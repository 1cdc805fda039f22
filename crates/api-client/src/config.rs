//! Client runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the client. Library code
//! never reads environment variables itself; binaries read them and hand the raw values to the
//! `*_from_env_value` helpers below.

use crate::constants::{DEFAULT_API_URL, DEFAULT_REFRESH_LEAD_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::store::{FileTokenStore, MemoryTokenStore, TokenStore};
use crate::token::TokenPair;
use crate::{ApiError, ApiResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Client configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
    refresh_lead: Duration,
    request_timeout: Duration,
    token_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Create a new `ClientConfig`.
    ///
    /// A trailing `/` on `base_url` is dropped so endpoints can always be appended as `/path`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] if `base_url` is not an `http(s)://` URL or
    /// `request_timeout` is zero.
    pub fn new(
        base_url: impl Into<String>,
        refresh_lead: Duration,
        request_timeout: Duration,
        token_file: Option<PathBuf>,
    ) -> ApiResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        let has_host = base_url
            .strip_prefix("https://")
            .or_else(|| base_url.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty());
        if !has_host {
            return Err(ApiError::InvalidInput(format!(
                "base URL must start with http:// or https://, got '{base_url}'"
            )));
        }

        if request_timeout.is_zero() {
            return Err(ApiError::InvalidInput(
                "request timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            base_url,
            refresh_lead,
            request_timeout,
            token_file,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn refresh_lead(&self) -> Duration {
        self.refresh_lead
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn token_file(&self) -> Option<&Path> {
        self.token_file.as_deref()
    }

    /// The token store this configuration asks for: the token file when one is set, otherwise
    /// process memory.
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        match self.token_file() {
            Some(path) => Arc::new(FileTokenStore::new(path)),
            None => Arc::new(MemoryTokenStore::new()),
        }
    }
}

/// Resolve the base URL from an optional raw value, defaulting when absent or blank.
pub fn base_url_from_env_value(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| DEFAULT_API_URL.into())
}

/// Parse the refresh lead time (whole seconds) from an optional raw value.
pub fn refresh_lead_from_env_value(value: Option<String>) -> ApiResult<Duration> {
    seconds_from_env_value(value, DEFAULT_REFRESH_LEAD_SECS, "refresh lead")
}

/// Parse the request timeout (whole seconds) from an optional raw value.
pub fn request_timeout_from_env_value(value: Option<String>) -> ApiResult<Duration> {
    seconds_from_env_value(value, DEFAULT_REQUEST_TIMEOUT_SECS, "request timeout")
}

/// Resolve the token file path; `None` keeps tokens in memory only.
pub fn token_file_from_env_value(value: Option<String>) -> Option<PathBuf> {
    non_blank(value).map(PathBuf::from)
}

fn seconds_from_env_value(value: Option<String>, default: u64, what: &str) -> ApiResult<Duration> {
    let Some(raw) = non_blank(value) else {
        return Ok(Duration::from_secs(default));
    };
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ApiError::InvalidInput(format!("{what} must be whole seconds, got '{raw}'")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No response was received (connection refused, DNS failure, timeout).
    #[error("network failure: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A request was rejected again after a successful refresh; the session has been cleared.
    #[error("session expired")]
    SessionExpired,

    /// The refresh-token exchange failed; the session has been cleared.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("failed to serialize request: {0}")]
    Serialization(serde_json::Error),

    #[error("failed to deserialize response: {0}")]
    Deserialization(serde_json::Error),

    #[error("token store error: {0}")]
    TokenStore(std::io::Error),
}

impl ApiError {
    /// True for failures that end the session and should send the user back to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::SessionExpired | ApiError::RefreshFailed(_))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

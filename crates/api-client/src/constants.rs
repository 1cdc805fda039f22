//! Constants used throughout the API client crate.
//!
//! Endpoint paths are relative to the configured base URL.

/// Base URL used when none is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// How long before access-token expiry the proactive refresh fires, in seconds.
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 60;

/// Per-request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shortest wait between two proactive refreshes, in seconds.
pub const MIN_PROACTIVE_INTERVAL_SECS: u64 = 5;

/// Credentials exchange.
pub const LOGIN_ENDPOINT: &str = "/auth/login";

/// Refresh-token exchange.
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";

/// Per-client tooth formula; the client id is appended as a path segment.
pub const CLIENT_FORMULA_ENDPOINT: &str = "/formulas/user";

/// Appointments; the appointment id is appended as a path segment.
pub const APPOINTMENTS_ENDPOINT: &str = "/appointments";

/// Scheme prefix of the `Authorization` header value.
pub const BEARER_PREFIX: &str = "Bearer ";

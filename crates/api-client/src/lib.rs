//! # API Client
//!
//! Authenticated client for the dental chart REST backend.
//!
//! Contains:
//! - Startup configuration (`config`) and shared constants
//! - Bearer token decoding and persistence (`token`, `store`)
//! - The auth session: login/logout, expiry tracking, coalesced refresh, proactive refresh timer
//!   (`session`, `timer`)
//! - The HTTP seam (`transport`) and the request/retry logic on top of it (`client`)
//! - Typed formula endpoints that feed the `formula` codec (`formulas`)
//!
//! **No chart logic**: decoding and editing of tooth formulas belong in the `formula` crate.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod formulas;
pub mod session;
pub mod store;
pub mod timer;
pub mod token;
pub mod transport;

pub use client::{ApiClient, Credentials, Envelope};
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use formulas::ClientFormulaPersister;
pub use session::{AuthSession, HttpTokenRefresher, SessionState, TokenRefresher};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use timer::RefreshTimer;
pub use token::TokenPair;
pub use transport::{Headers, HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

#[cfg(test)]
pub(crate) mod testing;

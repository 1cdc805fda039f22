//! Auth session: the token state machine.
//!
//! ```text
//! NoToken --login--> Valid --exp passes--> Expired --refresh--> Refreshing --ok--> Valid
//!                                                                 |
//!                                                                 +--err--> RefreshFailed
//! ```
//!
//! A failed refresh clears the stored tokens, so every caller after that point sees an
//! anonymous session. `state()` keeps reporting `RefreshFailed` until the next `login` or
//! `logout` so the caller can tell a forced logout from one that never logged in.
//!
//! Refreshes are coalesced. All refresh attempts take the same async gate; a caller that gets
//! through the gate first checks whether the stored access token has changed since it last looked
//! and, if the new token is valid, uses it instead of spending the refresh token a second time.

use crate::client::Envelope;
use crate::constants::REFRESH_ENDPOINT;
use crate::store::TokenStore;
use crate::token::{self, TokenPair};
use crate::transport::{default_headers, HttpRequest, HttpTransport, Method};
use crate::{ApiError, ApiResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoToken,
    Valid,
    Expired,
    Refreshing,
    RefreshFailed,
}

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<TokenPair>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStatus {
    Idle,
    InFlight,
    Failed,
}

/// Resets an in-flight status if the refresh future is dropped before it finishes.
struct InFlightGuard<'a> {
    status: &'a Mutex<RefreshStatus>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == RefreshStatus::InFlight {
            *status = RefreshStatus::Idle;
        }
    }
}

pub struct AuthSession {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_gate: tokio::sync::Mutex<()>,
    status: Mutex<RefreshStatus>,
    changed: Notify,
}

impl AuthSession {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_gate: tokio::sync::Mutex::new(()),
            status: Mutex::new(RefreshStatus::Idle),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        let status = self.status();
        if status == RefreshStatus::InFlight {
            return SessionState::Refreshing;
        }

        let tokens = self.store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "token store unreadable; treating session as empty");
            None
        });
        match tokens {
            None if status == RefreshStatus::Failed => SessionState::RefreshFailed,
            None => SessionState::NoToken,
            Some(pair) if token::is_token_valid(&pair.access_token) => SessionState::Valid,
            Some(_) => SessionState::Expired,
        }
    }

    /// Store a freshly issued token pair.
    pub fn login(&self, tokens: TokenPair) -> ApiResult<()> {
        self.store.save(&tokens)?;
        self.set_status(RefreshStatus::Idle);
        self.changed.notify_waiters();
        tracing::info!(expires_at = ?token::decode_expiry(&tokens.access_token), "session started");
        Ok(())
    }

    /// Clear all stored credentials.
    pub fn logout(&self) -> ApiResult<()> {
        self.store.clear()?;
        self.set_status(RefreshStatus::Idle);
        self.changed.notify_waiters();
        tracing::info!("session cleared");
        Ok(())
    }

    pub fn tokens(&self) -> ApiResult<Option<TokenPair>> {
        self.store.load()
    }

    /// Expiry of the stored access token, if there is one and it decodes.
    pub fn access_expiry(&self) -> ApiResult<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .load()?
            .and_then(|pair| token::decode_expiry(&pair.access_token)))
    }

    pub fn is_token_valid(&self, access_token: &str) -> bool {
        token::is_token_valid(access_token)
    }

    /// `Authorization` header value for the next request.
    ///
    /// Returns `Ok(None)` when there is no session. An expired or undecodable access token is
    /// refreshed first; a known-expired token is never handed out.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::RefreshFailed`] if the refresh was needed and failed. The session has
    /// been cleared by then.
    pub async fn auth_header(&self) -> ApiResult<Option<String>> {
        let Some(current) = self.store.load()? else {
            return Ok(None);
        };
        if token::is_token_valid(&current.access_token) {
            return Ok(Some(token::bearer(&current.access_token)));
        }

        tracing::debug!("access token expired or unreadable; refreshing before request");
        let refreshed = self.refresh_after(Some(&current.access_token)).await?;
        Ok(Some(token::bearer(&refreshed.access_token)))
    }

    /// Force a refresh now and return the new access token.
    ///
    /// If another caller refreshed while this one waited, that result is returned instead.
    pub async fn refresh_token(&self) -> ApiResult<String> {
        let observed = self.store.load()?.map(|pair| pair.access_token);
        let refreshed = self.refresh_after(observed.as_deref()).await?;
        Ok(refreshed.access_token)
    }

    /// Refresh unless the stored access token has already moved on from `observed`.
    pub(crate) async fn refresh_after(&self, observed: Option<&str>) -> ApiResult<TokenPair> {
        let _gate = self.refresh_gate.lock().await;

        let Some(current) = self.store.load()? else {
            return Err(ApiError::RefreshFailed("no session to refresh".into()));
        };
        if observed != Some(current.access_token.as_str())
            && token::is_token_valid(&current.access_token)
        {
            tracing::debug!("using token refreshed by a concurrent caller");
            return Ok(current);
        }
        if !current.has_refresh_token() {
            self.teardown();
            return Err(ApiError::RefreshFailed("no refresh token available".into()));
        }

        self.set_status(RefreshStatus::InFlight);
        let _in_flight = InFlightGuard {
            status: &self.status,
        };

        match self.refresher.refresh(&current.refresh_token).await {
            Ok(refreshed) => {
                self.store.save(&refreshed)?;
                self.set_status(RefreshStatus::Idle);
                self.changed.notify_waiters();
                tracing::info!(
                    expires_at = ?token::decode_expiry(&refreshed.access_token),
                    "access token refreshed"
                );
                Ok(refreshed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed; clearing session");
                self.teardown();
                Err(match e {
                    ApiError::RefreshFailed(message) => ApiError::RefreshFailed(message),
                    other => ApiError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }

    fn teardown(&self) {
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "failed to clear token store");
        }
        self.set_status(RefreshStatus::Failed);
        self.changed.notify_waiters();
    }

    fn status(&self) -> RefreshStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: RefreshStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

// ============================================================================
// HTTP refresher
// ============================================================================

#[derive(Deserialize)]
struct RefreshedTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// [`TokenRefresher`] that posts to the backend's refresh endpoint.
///
/// The request is sent without an `Authorization` header. A response that omits
/// `refresh_token` keeps the current refresh token.
pub struct HttpTokenRefresher {
    refresh_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl HttpTokenRefresher {
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            refresh_url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_ENDPOINT),
            transport,
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<TokenPair> {
        let request = HttpRequest {
            method: Method::Post,
            url: self.refresh_url.clone(),
            headers: default_headers(),
            body: Some(serde_json::json!({ "refresh_token": refresh_token })),
        };

        let response = self.transport.send(&request).await?;
        if !response.is_success() {
            return Err(ApiError::RefreshFailed(format!(
                "refresh endpoint answered HTTP {}",
                response.status
            )));
        }

        let refreshed = response.json::<Envelope<RefreshedTokens>>()?.into_data()?;
        if refreshed.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response has an empty access token".into(),
            ));
        }

        let refresh_token = refreshed
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| refresh_token.to_string());
        Ok(TokenPair::new(refreshed.access_token, refresh_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use crate::testing::{expired_token, valid_token, CountingRefresher, ScriptedTransport};
    use crate::transport::HttpResponse;

    fn session_with(
        tokens: Option<TokenPair>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> (AuthSession, Arc<MemoryTokenStore>) {
        let store = Arc::new(match tokens {
            Some(pair) => MemoryTokenStore::with_tokens(pair),
            None => MemoryTokenStore::new(),
        });
        (AuthSession::new(store.clone(), refresher), store)
    }

    #[tokio::test]
    async fn state_follows_login_expiry_and_logout() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let (session, _) = session_with(None, refresher);
        assert_eq!(session.state(), SessionState::NoToken);

        session
            .login(TokenPair::new(valid_token("a"), "r"))
            .expect("login");
        assert_eq!(session.state(), SessionState::Valid);

        session
            .login(TokenPair::new(expired_token("a"), "r"))
            .expect("login");
        assert_eq!(session.state(), SessionState::Expired);

        session.logout().expect("logout");
        assert_eq!(session.state(), SessionState::NoToken);
    }

    #[tokio::test]
    async fn auth_header_without_session_is_none() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let (session, _) = session_with(None, refresher.clone());

        assert_eq!(session.auth_header().await.expect("header"), None);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn auth_header_uses_valid_token_without_refreshing() {
        let access = valid_token("a");
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let (session, _) = session_with(Some(TokenPair::new(access.clone(), "r")), refresher.clone());

        let header = session.auth_header().await.expect("header");
        assert_eq!(header, Some(format!("Bearer {access}")));
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_use() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let (session, store) =
            session_with(Some(TokenPair::new(expired_token("a"), "r1")), refresher.clone());

        let header = session.auth_header().await.expect("header");
        assert_eq!(header, Some(format!("Bearer {}", fresh.access_token)));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.load().expect("load"), Some(fresh));
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn malformed_token_is_refreshed_when_refresh_token_exists() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let (session, _) = session_with(Some(TokenPair::new("not-a-jwt", "r1")), refresher.clone());

        assert_eq!(session.state(), SessionState::Expired);
        let header = session.auth_header().await.expect("header");
        assert_eq!(header, Some(format!("Bearer {}", fresh.access_token)));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_tears_down_session() {
        let refresher = Arc::new(CountingRefresher::failing("refresh token revoked"));
        let (session, store) =
            session_with(Some(TokenPair::new(expired_token("a"), "r1")), refresher.clone());

        let err = session.auth_header().await.expect_err("refresh fails");
        match err {
            ApiError::RefreshFailed(msg) => assert!(msg.contains("revoked")),
            other => panic!("expected RefreshFailed error, got {other:?}"),
        }
        assert_eq!(store.load().expect("load"), None);
        assert_eq!(session.state(), SessionState::RefreshFailed);

        // The torn-down session behaves as anonymous until the next login.
        assert_eq!(session.auth_header().await.expect("header"), None);
        session
            .login(TokenPair::new(valid_token("c"), "r3"))
            .expect("login");
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn missing_refresh_token_tears_down_without_calling_refresher() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let (session, store) =
            session_with(Some(TokenPair::new(expired_token("a"), "  ")), refresher.clone());

        let err = session.auth_header().await.expect_err("no refresh token");
        match err {
            ApiError::RefreshFailed(_) => {}
            other => panic!("expected RefreshFailed error, got {other:?}"),
        }
        assert_eq!(refresher.calls(), 0);
        assert_eq!(store.load().expect("load"), None);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let (session, _) =
            session_with(Some(TokenPair::new(expired_token("a"), "r1")), refresher.clone());

        let (first, second, third) =
            tokio::join!(session.auth_header(), session.auth_header(), session.auth_header());

        let expected = Some(format!("Bearer {}", fresh.access_token));
        assert_eq!(first.expect("first"), expected);
        assert_eq!(second.expect("second"), expected);
        assert_eq!(third.expect("third"), expected);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_token_forces_refresh_of_valid_token() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let (session, _) =
            session_with(Some(TokenPair::new(valid_token("a"), "r1")), refresher.clone());

        let access = session.refresh_token().await.expect("refresh");
        assert_eq!(access, fresh.access_token);
        assert_eq!(refresher.calls(), 1);
    }

    struct GatedRefresher {
        release: Notify,
        tokens: TokenPair,
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> ApiResult<TokenPair> {
            self.release.notified().await;
            Ok(self.tokens.clone())
        }
    }

    #[tokio::test]
    async fn state_reports_refreshing_while_in_flight() {
        let refresher = Arc::new(GatedRefresher {
            release: Notify::new(),
            tokens: TokenPair::new(valid_token("b"), "r2"),
        });
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            expired_token("a"),
            "r1",
        )));
        let session = Arc::new(AuthSession::new(store, refresher.clone()));

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.refresh_token().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(session.state(), SessionState::Refreshing);

        refresher.release.notify_one();
        task.await.expect("join").expect("refresh");
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn http_refresher_posts_refresh_token_and_keeps_it_when_omitted() {
        let access = valid_token("b");
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(
            200,
            serde_json::json!({ "status": 200, "data": { "access_token": access } }).to_string(),
        ))]));
        let refresher = HttpTokenRefresher::new("http://clinic.test/api/", transport.clone());

        let pair = refresher.refresh("r1").await.expect("refresh");
        assert_eq!(pair, TokenPair::new(access, "r1"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].url, "http://clinic.test/api/auth/refresh");
        assert_eq!(requests[0].header("authorization"), None);
        assert_eq!(
            requests[0].body,
            Some(serde_json::json!({ "refresh_token": "r1" }))
        );
    }

    #[tokio::test]
    async fn http_refresher_rejects_non_success_status() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(
            401,
            r#"{"status":401,"message":"invalid refresh token"}"#,
        ))]));
        let refresher = HttpTokenRefresher::new("http://clinic.test/api", transport);

        let err = refresher.refresh("r1").await.expect_err("401");
        match err {
            ApiError::RefreshFailed(msg) => assert!(msg.contains("401")),
            other => panic!("expected RefreshFailed error, got {other:?}"),
        }
    }
}

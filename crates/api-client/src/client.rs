use crate::config::ClientConfig;
use crate::constants::{BEARER_PREFIX, LOGIN_ENDPOINT};
use crate::session::{AuthSession, HttpTokenRefresher};
use crate::timer::RefreshTimer;
use crate::token::{self, TokenPair};
use crate::transport::{
    default_headers, merge_headers, Headers, HttpRequest, HttpResponse, HttpTransport, Method,
    ReqwestTransport,
};
use crate::{ApiError, ApiResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Backend response wrapper: `{ "status": 200, "data": ..., "message": "..." }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope<T> {
    pub status: Option<u16>,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// The payload, or an error if the envelope reports a failure status or carries no data.
    pub fn into_data(self) -> ApiResult<T> {
        if let Some(status) = self.status.filter(|status| *status >= 400) {
            return Err(ApiError::Http {
                status,
                message: self.message.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("response envelope has no data".into()))
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// REST client that attaches the session's bearer token and retries once on 401.
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        session: Arc<AuthSession>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            transport,
            session,
        }
    }

    /// Wire a reqwest transport, HTTP refresher and session from resolved configuration.
    ///
    /// Tokens are kept in the store named by [`ClientConfig::token_store`].
    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        let store = config.token_store();
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let refresher = Arc::new(HttpTokenRefresher::new(
            config.base_url(),
            transport.clone(),
        ));
        let session = Arc::new(AuthSession::new(store, refresher));
        Ok(Self::new(config.base_url(), transport, session))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Start refreshing this client's access token `lead` before it expires.
    ///
    /// Refreshing stops when the returned timer is dropped.
    pub fn spawn_refresh_timer(&self, lead: Duration) -> RefreshTimer {
        RefreshTimer::spawn(self.session.clone(), lead)
    }

    /// Send a request relative to the base URL.
    ///
    /// Headers are merged with increasing precedence: JSON defaults, the session's
    /// `Authorization`, then `headers`. A 401 on an authenticated request triggers one refresh
    /// and one resend of the identical request. Any other status is returned unmodified.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Network`] if no response was received.
    /// - [`ApiError::RefreshFailed`] if a needed refresh failed (the session is cleared).
    /// - [`ApiError::SessionExpired`] if the retried request was also rejected with 401 (the
    ///   session is cleared).
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        headers: Option<&Headers>,
    ) -> ApiResult<HttpResponse> {
        let url = self.endpoint_url(endpoint);
        let caller_headers = headers.cloned().unwrap_or_default();

        let auth = self.session.auth_header().await?;
        let mut request = build_request(method, &url, body, auth.as_deref(), &caller_headers);
        let response = self.transport.send(&request).await?;
        if response.status != 401 {
            return Ok(response);
        }

        // Anonymous requests have nothing to refresh; the 401 is the caller's answer.
        let Some(sent) = auth else {
            return Ok(response);
        };

        tracing::debug!(%method, %url, "request unauthorised; refreshing token and retrying once");
        let observed = sent.strip_prefix(BEARER_PREFIX).unwrap_or(sent.as_str());
        let refreshed = self.session.refresh_after(Some(observed)).await?;

        request.headers = merge_headers([
            &default_headers(),
            &auth_headers(Some(&token::bearer(&refreshed.access_token))),
            &caller_headers,
        ]);
        let retried = self.transport.send(&request).await?;
        if retried.status == 401 {
            tracing::warn!(%method, %url, "request rejected after token refresh; ending session");
            if let Err(e) = self.session.logout() {
                tracing::error!(error = %e, "failed to clear session after repeated 401");
            }
            return Err(ApiError::SessionExpired);
        }
        Ok(retried)
    }

    /// `GET` an endpoint and unwrap the envelope's `data`.
    pub async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        let response = self.request(endpoint, Method::Get, None, None).await?;
        decode_envelope(response)
    }

    /// Send a JSON body and unwrap the envelope's `data`.
    pub async fn send_data<B, T>(&self, endpoint: &str, method: Method, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(ApiError::Serialization)?;
        let response = self.request(endpoint, method, Some(body), None).await?;
        decode_envelope(response)
    }

    /// Exchange credentials for a token pair and start a session.
    ///
    /// The login request is always sent without an `Authorization` header.
    pub async fn login(&self, credentials: &Credentials) -> ApiResult<()> {
        let body = serde_json::to_value(credentials).map_err(ApiError::Serialization)?;
        let request = build_request(
            Method::Post,
            &self.endpoint_url(LOGIN_ENDPOINT),
            Some(body),
            None,
            &Headers::new(),
        );
        let response = self.transport.send(&request).await?;
        let tokens: TokenPair = decode_envelope(response)?;
        self.session.login(tokens)?;
        tracing::info!(username = %credentials.username, "logged in");
        Ok(())
    }

    pub fn logout(&self) -> ApiResult<()> {
        self.session.logout()
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

fn auth_headers(auth: Option<&str>) -> Headers {
    auth.map(|value| Headers::from([("authorization".to_string(), value.to_string())]))
        .unwrap_or_default()
}

fn build_request(
    method: Method,
    url: &str,
    body: Option<Value>,
    auth: Option<&str>,
    caller_headers: &Headers,
) -> HttpRequest {
    HttpRequest {
        method,
        url: url.to_string(),
        headers: merge_headers([&default_headers(), &auth_headers(auth), caller_headers]),
        body,
    }
}

/// Map a non-2xx response to [`ApiError::Http`], taking the message from the envelope when the
/// body has one.
pub(crate) fn error_for_status(response: HttpResponse) -> ApiResult<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<Envelope<Value>>()
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| response.body.trim().to_string());
    Err(ApiError::Http {
        status: response.status,
        message,
    })
}

fn decode_envelope<T: DeserializeOwned>(response: HttpResponse) -> ApiResult<T> {
    error_for_status(response)?
        .json::<Envelope<T>>()?
        .into_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TokenRefresher;
    use crate::store::{MemoryTokenStore, TokenStore};
    use crate::testing::{expired_token, valid_token, CountingRefresher, ScriptedTransport};
    use serde_json::json;

    const BASE: &str = "http://clinic.test/api";

    struct Harness {
        client: ApiClient,
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryTokenStore>,
    }

    fn harness(
        tokens: Option<TokenPair>,
        responses: Vec<Result<HttpResponse, String>>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Harness {
        let store = Arc::new(match tokens {
            Some(pair) => MemoryTokenStore::with_tokens(pair),
            None => MemoryTokenStore::new(),
        });
        let transport = Arc::new(ScriptedTransport::new(responses));
        let session = Arc::new(AuthSession::new(store.clone(), refresher));
        Harness {
            client: ApiClient::new(format!("{BASE}/"), transport.clone(), session),
            transport,
            store,
        }
    }

    fn ok(body: Value) -> Result<HttpResponse, String> {
        Ok(HttpResponse::new(200, body.to_string()))
    }

    fn status(code: u16) -> Result<HttpResponse, String> {
        Ok(HttpResponse::new(code, json!({ "status": code }).to_string()))
    }

    #[tokio::test]
    async fn anonymous_request_sends_default_headers_only() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(None, vec![ok(json!({}))], refresher);

        let response = h
            .client
            .request("/clients", Method::Get, None, None)
            .await
            .expect("response");
        assert_eq!(response.status, 200);

        let sent = &h.transport.requests()[0];
        assert_eq!(sent.url, format!("{BASE}/clients"));
        assert_eq!(sent.header("authorization"), None);
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert_eq!(sent.header("accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn caller_headers_take_precedence() {
        let access = valid_token("a");
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(
            Some(TokenPair::new(access.clone(), "r")),
            vec![ok(json!({})), ok(json!({}))],
            refresher,
        );

        h.client
            .request("clients", Method::Get, None, None)
            .await
            .expect("response");
        let overrides = Headers::from([("Accept".to_string(), "application/pdf".to_string())]);
        h.client
            .request("clients", Method::Get, None, Some(&overrides))
            .await
            .expect("response");

        let requests = h.transport.requests();
        assert_eq!(
            requests[0].header("authorization"),
            Some(format!("Bearer {access}").as_str())
        );
        assert_eq!(requests[1].header("accept"), Some("application/pdf"));
        assert_eq!(
            requests[1].header("authorization"),
            Some(format!("Bearer {access}").as_str())
        );
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_sending() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let h = harness(
            Some(TokenPair::new(expired_token("a"), "r1")),
            vec![ok(json!({}))],
            refresher.clone(),
        );

        h.client
            .request("/clients", Method::Get, None, None)
            .await
            .expect("response");

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].header("authorization"),
            Some(format!("Bearer {}", fresh.access_token).as_str())
        );
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn unauthorised_response_triggers_one_refresh_and_retry() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let h = harness(
            Some(TokenPair::new(valid_token("a"), "r1")),
            vec![status(401), ok(json!({ "status": 200 }))],
            refresher.clone(),
        );

        let body = json!({ "note": "x" });
        let response = h
            .client
            .request("/notes", Method::Post, Some(body.clone()), None)
            .await
            .expect("retried response");
        assert_eq!(response.status, 200);
        assert_eq!(refresher.calls(), 1);

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].url, requests[0].url);
        assert_eq!(requests[1].body, Some(body));
        assert_eq!(
            requests[1].header("authorization"),
            Some(format!("Bearer {}", fresh.access_token).as_str())
        );
        assert_eq!(h.store.load().expect("load"), Some(fresh));
    }

    #[tokio::test]
    async fn concurrent_unauthorised_requests_share_one_refresh() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let h = harness(
            Some(TokenPair::new(valid_token("a"), "r1")),
            vec![
                status(401),
                status(401),
                ok(json!({ "status": 200 })),
                ok(json!({ "status": 200 })),
            ],
            refresher.clone(),
        );

        let (first, second) = tokio::join!(
            h.client.request("/clients", Method::Get, None, None),
            h.client.request("/appointments", Method::Get, None, None),
        );
        assert_eq!(first.expect("first retried").status, 200);
        assert_eq!(second.expect("second retried").status, 200);
        assert_eq!(refresher.calls(), 1);

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 4);
        let fresh_bearer = format!("Bearer {}", fresh.access_token);
        for retry in &requests[2..] {
            assert_eq!(retry.header("authorization"), Some(fresh_bearer.as_str()));
        }
        assert_eq!(h.store.load().expect("load"), Some(fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timer_keeps_client_token_fresh() {
        let fresh = TokenPair::new(valid_token("b"), "r2");
        let refresher = Arc::new(CountingRefresher::succeeding(fresh.clone()));
        let expiring = crate::testing::mint_token_for("a", chrono::Utc::now().timestamp() + 90);
        let h = harness(
            Some(TokenPair::new(expiring, "r1")),
            vec![],
            refresher.clone(),
        );

        let timer = h.client.spawn_refresh_timer(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(refresher.calls(), 1);
        assert_eq!(h.store.load().expect("load"), Some(fresh));

        timer.stop();
    }

    #[tokio::test]
    async fn second_unauthorised_response_expires_session() {
        let refresher = Arc::new(CountingRefresher::succeeding(TokenPair::new(
            valid_token("b"),
            "r2",
        )));
        let h = harness(
            Some(TokenPair::new(valid_token("a"), "r1")),
            vec![status(401), status(401), ok(json!({}))],
            refresher.clone(),
        );

        let err = h
            .client
            .request("/clients", Method::Get, None, None)
            .await
            .expect_err("session expired");
        assert!(err.is_auth_failure());
        match err {
            ApiError::SessionExpired => {}
            other => panic!("expected SessionExpired error, got {other:?}"),
        }
        assert_eq!(refresher.calls(), 1);
        assert_eq!(h.transport.requests().len(), 2);
        assert_eq!(h.store.load().expect("load"), None);
    }

    #[tokio::test]
    async fn other_error_statuses_are_returned_unmodified() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(
            Some(TokenPair::new(valid_token("a"), "r1")),
            vec![Ok(HttpResponse::new(404, "not here"))],
            refresher.clone(),
        );

        let response = h
            .client
            .request("/clients/9", Method::Get, None, None)
            .await
            .expect("response");
        assert_eq!(response, HttpResponse::new(404, "not here"));
        assert_eq!(refresher.calls(), 0);
        assert_eq!(h.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn anonymous_unauthorised_response_is_not_retried() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(None, vec![status(401)], refresher.clone());

        let response = h
            .client
            .request("/clients", Method::Get, None, None)
            .await
            .expect("response");
        assert_eq!(response.status, 401);
        assert_eq!(refresher.calls(), 0);
        assert_eq!(h.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn network_failure_is_distinct_from_http_error() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(None, vec![Err("connection refused".into())], refresher);

        let err = h
            .client
            .request("/clients", Method::Get, None, None)
            .await
            .expect_err("network failure");
        match err {
            ApiError::Network(msg) => assert!(msg.contains("refused")),
            other => panic!("expected Network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_refresh_after_unauthorised_clears_session() {
        let refresher = Arc::new(CountingRefresher::failing("refresh token revoked"));
        let h = harness(
            Some(TokenPair::new(valid_token("a"), "r1")),
            vec![status(401), ok(json!({}))],
            refresher.clone(),
        );

        let err = h
            .client
            .request("/clients", Method::Get, None, None)
            .await
            .expect_err("refresh fails");
        match err {
            ApiError::RefreshFailed(_) => {}
            other => panic!("expected RefreshFailed error, got {other:?}"),
        }
        assert_eq!(h.transport.requests().len(), 1);
        assert_eq!(h.store.load().expect("load"), None);
    }

    #[tokio::test]
    async fn get_data_unwraps_envelope_and_maps_errors() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(
            None,
            vec![
                ok(json!({ "status": 200, "data": { "id": 3 } })),
                Ok(HttpResponse::new(
                    500,
                    json!({ "status": 500, "message": "database unavailable" }).to_string(),
                )),
                ok(json!({ "status": 422, "message": "invalid client" })),
            ],
            refresher,
        );

        let data: Value = h.client.get_data("/clients/3").await.expect("data");
        assert_eq!(data, json!({ "id": 3 }));

        let err = h
            .client
            .get_data::<Value>("/clients/3")
            .await
            .expect_err("500");
        match err {
            ApiError::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("expected Http error, got {other:?}"),
        }

        let err = h
            .client
            .get_data::<Value>("/clients/3")
            .await
            .expect_err("envelope status");
        match err {
            ApiError::Http { status, .. } => assert_eq!(status, 422),
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_data_serialises_body() {
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(
            None,
            vec![ok(json!({ "status": 201, "data": { "saved": true } }))],
            refresher,
        );

        let data: Value = h
            .client
            .send_data("/notes", Method::Put, &json!({ "text": "hello" }))
            .await
            .expect("data");
        assert_eq!(data["saved"], true);

        let sent = &h.transport.requests()[0];
        assert_eq!(sent.method, Method::Put);
        assert_eq!(sent.body, Some(json!({ "text": "hello" })));
    }

    #[tokio::test]
    async fn login_is_anonymous_and_stores_tokens() {
        let issued = TokenPair::new(valid_token("new"), "r-new");
        let refresher = Arc::new(CountingRefresher::failing("unused"));
        let h = harness(
            Some(TokenPair::new(valid_token("old"), "r-old")),
            vec![ok(json!({
                "status": 200,
                "data": {
                    "access_token": issued.access_token,
                    "refresh_token": issued.refresh_token,
                }
            }))],
            refresher,
        );

        h.client
            .login(&Credentials::new("dr.who", "tardis"))
            .await
            .expect("login");

        let sent = &h.transport.requests()[0];
        assert_eq!(sent.url, format!("{BASE}/auth/login"));
        assert_eq!(sent.header("authorization"), None);
        assert_eq!(
            sent.body,
            Some(json!({ "username": "dr.who", "password": "tardis" }))
        );
        assert_eq!(h.store.load().expect("load"), Some(issued));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let printed = format!("{:?}", Credentials::new("dr.who", "tardis"));
        assert!(printed.contains("dr.who"));
        assert!(!printed.contains("tardis"));
    }
}

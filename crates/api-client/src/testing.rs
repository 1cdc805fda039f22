//! Shared fixtures for the crate's unit tests.

use crate::session::TokenRefresher;
use crate::token::TokenPair;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::{ApiError, ApiResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Unsigned JWT with the given subject and `exp`.
pub(crate) fn mint_token_for(subject: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{subject}","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

pub(crate) fn mint_token(exp: i64) -> String {
    mint_token_for("clinician", exp)
}

pub(crate) fn valid_token(subject: &str) -> String {
    mint_token_for(subject, Utc::now().timestamp() + 3600)
}

pub(crate) fn expired_token(subject: &str) -> String {
    mint_token_for(subject, Utc::now().timestamp() - 60)
}

/// Refresher that counts calls and yields once before answering, so concurrent callers get a
/// chance to pile up behind an in-flight refresh.
pub(crate) struct CountingRefresher {
    calls: AtomicUsize,
    outcome: Result<TokenPair, String>,
}

impl CountingRefresher {
    pub(crate) fn succeeding(tokens: TokenPair) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(tokens),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Err(message.to_string()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> ApiResult<TokenPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.outcome.clone().map_err(ApiError::RefreshFailed)
    }
}

/// Transport that replays queued responses in order and records every request it was given.
/// A queued `Err` is surfaced as a network failure.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Result<HttpResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> ApiResult<HttpResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ApiError::Network(message)),
            None => Err(ApiError::Network("no scripted response left".into())),
        }
    }
}

//! Proactive token refresh.
//!
//! The timer only reduces how often requests see an expired token. Correctness still rests on
//! the refresh-before-send and retry-on-401 paths in the client.

use crate::constants::MIN_PROACTIVE_INTERVAL_SECS;
use crate::session::AuthSession;
use crate::token;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Background task that refreshes the access token `lead` before it expires.
///
/// The task reschedules itself whenever the session changes (login, logout, refresh) and is
/// aborted when the timer is dropped.
#[derive(Debug)]
pub struct RefreshTimer {
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    /// Start the timer on the current tokio runtime.
    pub fn spawn(session: Arc<AuthSession>, lead: Duration) -> Self {
        let handle = tokio::spawn(run(session, lead));
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(session: Arc<AuthSession>, lead: Duration) {
    let min_wait = Duration::from_secs(MIN_PROACTIVE_INTERVAL_SECS);

    loop {
        let changed = session.changed().notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let tokens = session.tokens().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "proactive refresh could not read tokens");
            None
        });
        let Some(tokens) = tokens.filter(|pair| pair.has_refresh_token()) else {
            changed.await;
            continue;
        };

        // Nothing to schedule against; the client still refreshes such a token before sending.
        let Some(expires_at) = token::decode_expiry(&tokens.access_token) else {
            tracing::debug!("access token has no readable expiry; waiting for a session change");
            changed.await;
            continue;
        };
        let lead = chrono::Duration::from_std(lead).unwrap_or_else(|_| chrono::Duration::zero());
        let wait = (expires_at - lead - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(min_wait);
        tracing::debug!(wait_secs = wait.as_secs(), "proactive refresh scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = session.refresh_after(Some(&tokens.access_token)).await {
                    tracing::warn!(error = %e, "proactive token refresh failed");
                }
            }
            _ = &mut changed => {
                tracing::debug!("session changed; rescheduling proactive refresh");
            }
        }
    }
}

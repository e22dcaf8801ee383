//! Credential model and the single-flight refresh coordinator.

use crate::storage::CredentialStore;
use crate::transport::Transport;
use crate::{GatewayError, Result};
use crate::request::{Body, RequestDescriptor, RequestOptions};
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// The process-wide credential. Replaced wholesale on refresh; destroyed on
/// logout or unrecoverable auth failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token attached to outgoing requests.
    pub access_token: String,
    /// Token exchanged for a new credential on 401/403.
    pub refresh_token: Option<String>,
    /// Expiry as seconds since the Unix epoch, when the backend reports one.
    pub expires_at: Option<u64>,
}

impl Credential {
    /// Credential with only an access token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Credential with both tokens.
    pub fn with_refresh(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
            expires_at: None,
        }
    }
}

/// Session-level notifications for the embedding application.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// The credential was rotated; in-flight requests replay transparently.
    Refreshed,
    /// Refresh failed irrecoverably; the store was cleared and the
    /// application should navigate to its unauthenticated state.
    SessionExpired,
}

/// Refresh coordinator state: Idle → Refreshing → {Idle, Failed}.
/// Failed is terminal until a new login stores a fresh credential.
enum RefreshState {
    Idle,
    Refreshing(watch::Receiver<Option<bool>>),
    Failed,
}

enum Role {
    Leader(watch::Sender<Option<bool>>),
    Follower(watch::Receiver<Option<bool>>),
    AlreadyRotated,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Coordinates credential attachment and single-flight refresh.
///
/// The single-flight lock is a shared pending-refresh handle, not an OS
/// mutex: the first caller to observe an auth failure becomes the leader
/// and issues the one refresh call; every concurrent caller awaits that
/// same outcome over a `watch` channel and then replays with the new token.
pub struct AuthCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<Transport>,
    refresh_url: url::Url,
    refresh_timeout: Duration,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthCoordinator {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        transport: Arc<Transport>,
        refresh_url: url::Url,
        refresh_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            transport,
            refresh_url,
            refresh_timeout,
            state: Mutex::new(RefreshState::Idle),
            events,
        }
    }

    /// Subscribe to session-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// A new login stored a fresh credential; leave the Failed state.
    pub(crate) fn notify_login(&self) {
        *self.state.lock() = RefreshState::Idle;
    }

    /// Attach the current access token as a bearer header.
    ///
    /// Returns the token that was attached so the caller can detect a
    /// rotation that happened while its request was in flight.
    pub(crate) fn attach(&self, headers: &mut HeaderMap) -> Option<String> {
        let token = self.store.access_token()?;
        match format!("Bearer {token}").parse() {
            Ok(value) => {
                headers.insert(http::header::AUTHORIZATION, value);
                Some(token)
            }
            Err(_) => {
                warn!("stored access token is not a valid header value");
                None
            }
        }
    }

    /// Run (or join) the single-flight refresh.
    ///
    /// `stale_token` is the token the failed attempt carried. If the
    /// credential has already been rotated past it, no refresh is issued
    /// and the caller simply replays with the current credential.
    pub(crate) async fn refresh(&self, stale_token: Option<&str>) -> Result<()> {
        let role = {
            let mut state = self.state.lock();
            let current = self.store.access_token();
            match (&current, stale_token) {
                (Some(current), Some(stale)) if current != stale => Role::AlreadyRotated,
                _ => match &*state {
                    RefreshState::Refreshing(rx) => Role::Follower(rx.clone()),
                    RefreshState::Failed => {
                        return Err(GatewayError::Auth("session expired".into()));
                    }
                    RefreshState::Idle => {
                        let (tx, rx) = watch::channel(None);
                        *state = RefreshState::Refreshing(rx);
                        Role::Leader(tx)
                    }
                },
            }
        };

        match role {
            Role::AlreadyRotated => Ok(()),
            Role::Leader(tx) => {
                info!("refreshing credential");
                let result = self.do_refresh().await;
                let ok = result.is_ok();
                *self.state.lock() = if ok {
                    RefreshState::Idle
                } else {
                    RefreshState::Failed
                };
                if ok {
                    let _ = self.events.send(AuthEvent::Refreshed);
                } else {
                    warn!("credential refresh failed, clearing session");
                    self.store.clear();
                    let _ = self.events.send(AuthEvent::SessionExpired);
                }
                let _ = tx.send(Some(ok));
                result
            }
            Role::Follower(mut rx) => {
                let refreshed = match rx.wait_for(|outcome| outcome.is_some()).await {
                    Ok(outcome) => (*outcome).unwrap_or(false),
                    // Leader dropped without reporting; treat as failure.
                    Err(_) => false,
                };
                if refreshed {
                    Ok(())
                } else {
                    Err(GatewayError::Auth("refresh failed".into()))
                }
            }
        }
    }

    async fn do_refresh(&self) -> Result<()> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or_else(|| GatewayError::Auth("no refresh token available".into()))?;

        let descriptor = RequestDescriptor {
            id: Uuid::new_v4(),
            method: Method::POST,
            url: self.refresh_url.clone(),
            headers: HeaderMap::new(),
            body: Body::Json(serde_json::json!({ "refreshToken": refresh_token })),
            options: RequestOptions {
                cacheable: false,
                retryable: false,
                timeout: self.refresh_timeout,
                cache_ttl: None,
            },
            attempt: 0,
        };

        let response = self
            .transport
            .dispatch(&descriptor)
            .await
            .map_err(|e| GatewayError::Auth(format!("refresh dispatch failed: {e}")))?;

        if !response.is_success() {
            return Err(GatewayError::Auth(format!(
                "refresh rejected with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| GatewayError::Auth(format!("malformed refresh response: {e}")))?;

        let expires_at = token.expires_in.and_then(|secs| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|now| now.as_secs() + secs)
        });
        self.store.set(Credential {
            access_token: token.access_token,
            // Backends that do not rotate the refresh token keep the old one.
            refresh_token: token.refresh_token.or(Some(refresh_token)),
            expires_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_is_camel_case() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"accessToken": "a1", "refreshToken": "r1", "expiresIn": 3600}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "a1");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn test_credential_constructors() {
        let c = Credential::with_refresh("a", "r");
        assert_eq!(c.access_token, "a");
        assert_eq!(c.refresh_token.as_deref(), Some("r"));
        assert!(Credential::bearer("a").refresh_token.is_none());
    }
}

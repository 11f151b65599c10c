//! Live session management.
//!
//! [`TokenSession`] owns the in-memory [`Session`], persists it through a
//! [`CredentialStore`], and refreshes it through an [`AuthClient`] when it is
//! about to expire.
//!
//! # Locking
//!
//! The live session sits behind a read-write lock that is never held across an
//! `.await`. Every operation that talks to the token endpoint or rewrites the
//! store (restore, refresh, code exchange, logout) runs under a single async
//! mutex, so two refreshes cannot race each other into divergent persisted
//! states. Callers that wait on the mutex re-check the live session before
//! refreshing again.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use shelfsync_core::{
//!     AuthClient, ClientCredentials, Endpoints, MemoryStore, ReqwestTransport, TokenSession,
//! };
//! use std::time::Duration;
//!
//! let transport = ReqwestTransport::new(Duration::from_secs(15), Duration::from_secs(30))?;
//! let auth = AuthClient::new(
//!     transport,
//!     &Endpoints::default(),
//!     ClientCredentials::new("client-id", "client-secret"),
//! )?;
//! let session = TokenSession::new(MemoryStore::new(), auth);
//!
//! if !session.restore().await {
//!     println!("Log in at {}", session.authorization_url());
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::auth::AuthClient;
use crate::error::ApiError;
use crate::store::{CredentialStore, SESSION_KEY, Secret, StoreError};
use crate::token::{AuthOutcome, DEFAULT_EXPIRY_SKEW_MINUTES, Session, is_expired};
use crate::transport::HttpTransport;

/// Holds and validates the current credential, coordinating refresh.
pub struct TokenSession<S, T> {
    store: S,
    auth: AuthClient<T>,
    live: RwLock<Option<Session>>,
    guard: Mutex<()>,
    skew: Duration,
}

impl<S, T> std::fmt::Debug for TokenSession<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSession")
            .field("logged_in", &self.live.read().is_some())
            .field("skew", &self.skew)
            .finish()
    }
}

impl<S: CredentialStore, T: HttpTransport> TokenSession<S, T> {
    /// Create a session manager with the default 10-minute expiry skew.
    ///
    /// Starts logged out; call [`restore`](Self::restore) to load a persisted session.
    pub fn new(store: S, auth: AuthClient<T>) -> Self {
        Self::with_expiry_skew(store, auth, Duration::minutes(DEFAULT_EXPIRY_SKEW_MINUTES))
    }

    /// Create a session manager with a custom expiry skew.
    pub fn with_expiry_skew(store: S, auth: AuthClient<T>, skew: Duration) -> Self {
        Self {
            store,
            auth,
            live: RwLock::new(None),
            guard: Mutex::new(()),
            skew,
        }
    }

    /// Load the persisted session.
    ///
    /// Returns `false` when nothing is persisted (the normal logged-out state),
    /// when the record is unreadable, or when it is expired and cannot be
    /// refreshed.
    pub async fn restore(&self) -> bool {
        let _guard = self.guard.lock().await;

        let stored = match self.store.get(SESSION_KEY).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!("No persisted session");
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {}", e);
                return false;
            }
        };

        let session = match Session::from_json(stored.expose()) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Ignoring unreadable persisted session: {}", e);
                return false;
            }
        };

        if is_expired(&session, Utc::now(), self.skew) {
            tracing::info!("Persisted session expired, attempting refresh");
            return self.refresh_locked(&session.refresh_token).await.is_ok();
        }

        tracing::info!("Session restored for {}", session.display_name);
        *self.live.write() = Some(session);
        true
    }

    /// Refresh the session with the current refresh token.
    ///
    /// Uses the live session, or the persisted one if nothing is live. On
    /// failure the live session is left untouched and `false` is returned.
    pub async fn refresh(&self) -> bool {
        let _guard = self.guard.lock().await;

        let live_token = self.live.read().as_ref().map(|s| s.refresh_token.clone());
        let refresh_token = match live_token {
            Some(token) => token,
            None => match self.persisted_session().await {
                Some(session) => session.refresh_token.clone(),
                None => {
                    tracing::debug!("No session to refresh");
                    return false;
                }
            },
        };

        self.refresh_locked(&refresh_token).await.is_ok()
    }

    /// Exchange an authorization code from the redirect flow.
    ///
    /// On success the new session becomes live and is persisted. On failure
    /// the error is returned unchanged and no state is touched.
    pub async fn exchange_auth_code(&self, code: &str) -> AuthOutcome {
        let _guard = self.guard.lock().await;

        let session = match self.auth.exchange_authorization_code(code).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Authorization code exchange failed: {}", e);
                return AuthOutcome::Failure(e);
            }
        };

        if let Err(e) = self.persist(&session).await {
            tracing::error!("Failed to persist new session: {}", e);
            return AuthOutcome::Failure(e);
        }

        let display_name = session.display_name.clone();
        *self.live.write() = Some(session);
        tracing::info!("Logged in as {}", display_name);
        AuthOutcome::Success { display_name }
    }

    /// Get a valid access token, refreshing first if it is inside the skew window.
    ///
    /// Returns [`ApiError::NotAuthenticated`] when no session is live or the
    /// server rejects the refresh token. Transport failures during refresh are
    /// returned as they are.
    pub async fn ensure_access_token(&self) -> Result<Secret, ApiError> {
        if let Some(token) = self.valid_access_token() {
            return Ok(token);
        }

        let _guard = self.guard.lock().await;

        let refresh_token = {
            let live = self.live.read();
            match live.as_ref() {
                None => return Err(ApiError::NotAuthenticated),
                Some(session) if !is_expired(session, Utc::now(), self.skew) => {
                    tracing::debug!("Session was refreshed by another caller");
                    return Ok(session.access_token.clone());
                }
                Some(session) => session.refresh_token.clone(),
            }
        };

        tracing::info!("Access token expiring, attempting refresh");
        self.refresh_locked(&refresh_token)
            .await
            .map_err(|e| match e {
                ApiError::HttpStatus { .. } | ApiError::MalformedResponse { .. } => {
                    ApiError::NotAuthenticated
                }
                other => other,
            })
    }

    /// Clear the persisted and live session.
    ///
    /// If the store cannot be cleared the live session is kept and the error
    /// is returned, so callers never observe one without the other.
    pub async fn logout(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;

        self.store.clear().await?;
        *self.live.write() = None;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Whether a session is live (it may still need a refresh).
    pub fn is_logged_in(&self) -> bool {
        self.live.read().is_some()
    }

    pub fn display_name(&self) -> Option<String> {
        self.live.read().as_ref().map(|s| s.display_name.clone())
    }

    pub fn account_id(&self) -> Option<String> {
        self.live.read().as_ref().map(|s| s.account_id.clone())
    }

    /// Snapshot of the live session.
    pub fn current(&self) -> Option<Session> {
        self.live.read().clone()
    }

    /// URL the user agent opens to start a login.
    pub fn authorization_url(&self) -> String {
        self.auth.authorization_url()
    }

    fn valid_access_token(&self) -> Option<Secret> {
        let live = self.live.read();
        live.as_ref()
            .filter(|s| !is_expired(s, Utc::now(), self.skew))
            .map(|s| s.access_token.clone())
    }

    async fn persisted_session(&self) -> Option<Session> {
        let stored = self.store.get(SESSION_KEY).await.ok().flatten()?;
        Session::from_json(stored.expose()).ok()
    }

    async fn persist(&self, session: &Session) -> Result<(), ApiError> {
        let json = session.to_json().map_err(StoreError::from)?;
        self.store.put(SESSION_KEY, &Secret::new(json)).await?;
        Ok(())
    }

    /// Refresh and install the new session. Caller holds `guard`.
    async fn refresh_locked(&self, refresh_token: &Secret) -> Result<Secret, ApiError> {
        let session = match self.auth.exchange_refresh_token(refresh_token.expose()).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = self.persist(&session).await {
            tracing::error!("Failed to persist refreshed session: {}", e);
            return Err(e);
        }

        let access_token = session.access_token.clone();
        *self.live.write() = Some(session);
        tracing::info!("Access token refreshed");
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientCredentials, Endpoints};
    use crate::store::MemoryStore;
    use crate::testing::ScriptedTransport;
    use crate::token::{format_expiry, test_session};
    use crate::transport::{HttpResponse, TransportError};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store that counts writes and can be told to fail `clear`.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        puts: AtomicUsize,
        fail_clear: bool,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, secret).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            if self.fail_clear {
                return Err(StoreError::BackendError {
                    message: "locked".to_string(),
                });
            }
            self.inner.clear().await
        }
    }

    type TestSession = TokenSession<CountingStore, Arc<ScriptedTransport>>;

    fn session_body(access: &str, expires_in: Duration) -> String {
        serde_json::json!({
            "access_token": access,
            "refresh_token": format!("{access}-refresh"),
            "expires_at": format_expiry(Utc::now() + expires_in),
            "account_id": "account-1",
            "displayName": "Player One"
        })
        .to_string()
    }

    fn setup(store: CountingStore) -> (TestSession, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let auth = AuthClient::new(
            transport.clone(),
            &Endpoints::single_host("https://auth.test"),
            ClientCredentials::new("client", "secret"),
        )
        .unwrap();
        (TokenSession::new(store, auth), transport)
    }

    async fn persist_raw(store: &CountingStore, session: &Session) {
        store
            .inner
            .put(SESSION_KEY, &Secret::new(session.to_json().unwrap()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_without_persisted_session() {
        let (session, transport) = setup(CountingStore::default());

        assert!(!session.restore().await);
        assert!(!session.is_logged_in());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_valid_session_skips_network() {
        let store = CountingStore::default();
        persist_raw(&store, &test_session("live", Utc::now() + Duration::hours(1))).await;
        let (session, transport) = setup(store);

        assert!(session.restore().await);
        assert_eq!(session.display_name().as_deref(), Some("Player One"));
        assert_eq!(session.ensure_access_token().await.unwrap().expose(), "live");
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_expired_session_refreshes() {
        let store = CountingStore::default();
        persist_raw(&store, &test_session("old", Utc::now() + Duration::minutes(5))).await;
        let (session, transport) = setup(store);
        transport.push(Ok(HttpResponse::new(200, session_body("new", Duration::hours(2)))));

        assert!(session.restore().await);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].form_field("refresh_token"), Some("old-refresh"));
        assert_eq!(session.current().unwrap().access_token.expose(), "new");
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_expired_session_refresh_rejected() {
        let store = CountingStore::default();
        persist_raw(&store, &test_session("old", Utc::now() - Duration::hours(1))).await;
        let (session, transport) = setup(store);
        transport.push(Ok(HttpResponse::new(400, r#"{"error_description": "bad token"}"#)));

        assert!(!session.restore().await);
        assert!(!session.is_logged_in());
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_ignores_corrupt_record() {
        let store = CountingStore::default();
        store
            .inner
            .put(SESSION_KEY, &Secret::new("{not json"))
            .await
            .unwrap();
        let (session, _transport) = setup(store);

        assert!(!session.restore().await);
    }

    #[tokio::test]
    async fn test_exchange_auth_code_persists_once() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(200, session_body("fresh", Duration::hours(2)))));

        let outcome = session.exchange_auth_code("code").await;

        assert_eq!(
            outcome,
            AuthOutcome::Success {
                display_name: "Player One".to_string()
            }
        );
        assert!(session.is_logged_in());
        assert_eq!(session.account_id().as_deref(), Some("account-1"));
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 1);
        assert!(session.store.exists(SESSION_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_exchange_auth_code_failure_leaves_state() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(
            400,
            r#"{"error_description": "Sorry the authorization code you supplied was not found."}"#,
        )));

        let outcome = session.exchange_auth_code("stale").await;

        match outcome {
            AuthOutcome::Failure(ApiError::HttpStatus { message, .. }) => {
                assert_eq!(message, "Sorry the authorization code you supplied was not found.");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!session.is_logged_in());
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_live_session() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(200, session_body("first", Duration::hours(2)))));
        assert!(session.exchange_auth_code("code").await.is_success());

        transport.push(Err(TransportError::Timeout {
            message: "read timed out".to_string(),
        }));
        assert!(!session.refresh().await);

        assert_eq!(session.current().unwrap().access_token.expose(), "first");
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_access_token_not_authenticated() {
        let (session, _transport) = setup(CountingStore::default());
        assert_eq!(
            session.ensure_access_token().await.unwrap_err(),
            ApiError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_ensure_access_token_refresh_rejected_is_not_authenticated() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(200, session_body("short", Duration::minutes(3)))));
        assert!(session.exchange_auth_code("code").await.is_success());

        transport.push(Ok(HttpResponse::new(401, "")));
        assert_eq!(
            session.ensure_access_token().await.unwrap_err(),
            ApiError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(200, session_body("short", Duration::minutes(3)))));
        assert!(session.exchange_auth_code("code").await.is_success());
        transport.push(Ok(HttpResponse::new(200, session_body("long", Duration::hours(2)))));

        let (a, b) = tokio::join!(session.ensure_access_token(), session.ensure_access_token());

        assert_eq!(a.unwrap().expose(), "long");
        assert_eq!(b.unwrap().expose(), "long");
        // one code exchange + one refresh
        assert_eq!(transport.request_count(), 2);
        assert_eq!(session.store.puts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logout_clears_store_and_live_session() {
        let (session, transport) = setup(CountingStore::default());
        transport.push(Ok(HttpResponse::new(200, session_body("t", Duration::hours(2)))));
        assert!(session.exchange_auth_code("code").await.is_success());

        session.logout().await.unwrap();

        assert!(!session.is_logged_in());
        assert!(!session.store.exists(SESSION_KEY).await.unwrap());
        assert!(!session.restore().await);
    }

    #[tokio::test]
    async fn test_logout_failure_keeps_both() {
        let store = CountingStore {
            fail_clear: true,
            ..Default::default()
        };
        let (session, transport) = setup(store);
        transport.push(Ok(HttpResponse::new(200, session_body("t", Duration::hours(2)))));
        assert!(session.exchange_auth_code("code").await.is_success());

        assert!(session.logout().await.is_err());

        assert!(session.is_logged_in());
        assert!(session.store.exists(SESSION_KEY).await.unwrap());
    }
}

//! OAuth token endpoint client.
//!
//! [`AuthClient`] performs the two grant exchanges the service supports:
//!
//! - `authorization_code` - trade the code from the redirect flow for a session
//! - `refresh_token` - trade the refresh token for a new session
//!
//! Both are form-encoded POSTs authenticated with HTTP Basic client
//! credentials, and both answer with the full [`Session`] payload. The client is
//! stateless; [`TokenSession`](crate::session::TokenSession) owns what it returns.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::Url;

use crate::config::{ClientCredentials, ConfigError, Endpoints};
use crate::error::ApiError;
use crate::token::Session;
use crate::transport::{HttpRequest, HttpTransport};

/// Token type marker requested from the token endpoint.
const TOKEN_TYPE: &str = "eg1";

/// Error payload of the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error_description: Option<String>,
}

/// Client for the OAuth token endpoint.
pub struct AuthClient<T> {
    transport: T,
    token_url: Url,
    authorize_url: Url,
    credentials: ClientCredentials,
}

impl<T> std::fmt::Debug for AuthClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.credentials.client_id)
            .finish()
    }
}

pub(crate) fn parse_endpoint(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint {
        url: url.to_string(),
        message: e.to_string(),
    })
}

impl<T: HttpTransport> AuthClient<T> {
    /// Create a client for the configured token and authorization endpoints.
    pub fn new(
        transport: T,
        endpoints: &Endpoints,
        credentials: ClientCredentials,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            token_url: parse_endpoint(&endpoints.token)?,
            authorize_url: parse_endpoint(&endpoints.authorize)?,
            credentials,
        })
    }

    /// URL the user agent opens to obtain an authorization code.
    pub fn authorization_url(&self) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("clientId", &self.credentials.client_id)
            .append_pair("responseType", "code");
        url.to_string()
    }

    /// Exchange an authorization code for a session.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Session, ApiError> {
        tracing::debug!("Exchanging authorization code for tokens");
        self.token_request([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("token_type", TOKEN_TYPE),
        ])
        .await
    }

    /// Exchange a refresh token for a new session.
    pub async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, ApiError> {
        tracing::debug!("Exchanging refresh token for tokens");
        self.token_request([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("token_type", TOKEN_TYPE),
        ])
        .await
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!(
            "{}:{}",
            self.credentials.client_id,
            self.credentials.client_secret.expose()
        );
        format!("Basic {}", STANDARD.encode(raw))
    }

    async fn token_request(&self, form: [(&str, &str); 3]) -> Result<Session, ApiError> {
        let request = HttpRequest::post_form(self.token_url.clone(), form)
            .with_header("Authorization", self.basic_auth_header());

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!("Token request failed: {}", e);
            ApiError::from(e)
        })?;

        if !response.is_success() {
            let message = error_description(&response.body)
                .unwrap_or_else(|| format!("Authentication failed ({})", response.status));
            tracing::error!("Token endpoint returned {}: {}", response.status, message);
            return Err(ApiError::HttpStatus {
                status: response.status,
                message,
            });
        }

        let session = Session::from_json(&response.body)?;
        tracing::info!("Token exchange succeeded for {}", session.display_name);
        Ok(session)
    }
}

fn error_description(body: &str) -> Option<String> {
    serde_json::from_str::<TokenErrorBody>(body)
        .ok()?
        .error_description
        .filter(|d| !d.is_empty())
}

//! Session credentials and expiry.
//!
//! This module provides:
//! - [`Session`] - The access/refresh token pair with expiry and account identity
//! - [`AuthOutcome`] - Result of an authorization-code exchange
//! - [`is_expired`] - Expiry check with a safety skew

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::store::Secret;

/// Default window before the real expiry in which a token counts as expired.
pub const DEFAULT_EXPIRY_SKEW_MINUTES: i64 = 10;

/// Authenticated session as issued by the token endpoint.
///
/// Both tokens are non-empty for every value of this type; deserialization
/// rejects records that violate this. The same JSON shape is used on the wire
/// and in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord")]
pub struct Session {
    pub access_token: Secret,
    pub refresh_token: Secret,
    /// ISO-8601 timestamp (UTC, millisecond precision) as sent by the server.
    pub expires_at: String,
    pub account_id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Deserialize)]
struct SessionRecord {
    access_token: Secret,
    refresh_token: Secret,
    expires_at: String,
    account_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

impl TryFrom<SessionRecord> for Session {
    type Error = String;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        if record.access_token.is_empty() {
            return Err("access_token is empty".to_string());
        }
        if record.refresh_token.is_empty() {
            return Err("refresh_token is empty".to_string());
        }
        Ok(Self {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at: record.expires_at,
            account_id: record.account_id,
            display_name: record.display_name,
        })
    }
}

impl Session {
    /// Parse a session from a token-endpoint or persisted JSON body.
    pub fn from_json(body: &str) -> Result<Self, ApiError> {
        serde_json::from_str(body)
            .map_err(|e| ApiError::malformed(format!("invalid session payload: {}", e)))
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The parsed expiry, or `None` if the server string is unparsable.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Whether `session` must be treated as expired at `now`.
///
/// True when `now` is past `expires_at - skew`, and also when `expires_at`
/// cannot be parsed.
pub fn is_expired(session: &Session, now: DateTime<Utc>, skew: Duration) -> bool {
    match session.expiry() {
        Some(expires_at) => now > expires_at - skew,
        None => {
            tracing::warn!("Unparsable session expiry, treating session as expired");
            true
        }
    }
}

/// Result of exchanging an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A session was established for this user.
    Success { display_name: String },

    /// The exchange failed; nothing was changed.
    Failure(ApiError),
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
pub(crate) fn test_session(access: &str, expires_at: DateTime<Utc>) -> Session {
    Session {
        access_token: Secret::new(access),
        refresh_token: Secret::new(format!("{access}-refresh")),
        expires_at: format_expiry(expires_at),
        account_id: "account-1".to_string(),
        display_name: "Player One".to_string(),
    }
}

/// Format a timestamp the way the token endpoint does.
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

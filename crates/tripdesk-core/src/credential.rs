//! The credential and the session status derived from it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tokens::{AccessToken, RefreshToken};

/// The access/refresh token pair plus both expiry instants.
///
/// Every field is mandatory, so a credential can never exist with only one
/// of its expiries. A persisted payload that lacks any of them fails to
/// decode and is treated as absent by the [`CredentialStore`](crate::CredentialStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        }
    }

    /// Session status of this credential at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        if now < self.access_expires_at {
            SessionStatus::Authenticated
        } else if now < self.refresh_expires_at {
            SessionStatus::Expired
        } else {
            SessionStatus::Terminal
        }
    }

    /// Returns true if the refresh token can still be exchanged at `now`.
    pub fn can_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_expires_at
    }

    /// Rejects decoded payloads that carry empty tokens.
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

/// Authentication state derived from the stored credential.
///
/// Never stored: always computed from credential presence and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No credential.
    Unauthenticated,
    /// Credential present and the access token is still valid.
    Authenticated,
    /// Access token expired, refresh token still valid.
    Expired,
    /// Both tokens expired; the user has to sign in again.
    Terminal,
}

impl SessionStatus {
    /// Status for an optional credential at `now`.
    pub fn of(credential: Option<&Credential>, now: DateTime<Utc>) -> Self {
        credential.map_or(SessionStatus::Unauthenticated, |c| c.status_at(now))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Expired => "expired",
            SessionStatus::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Token payload returned by the sign-in and refresh mutations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub token: AccessToken,
    pub refresh_token: RefreshToken,
    pub token_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl From<TokenPayload> for Credential {
    fn from(payload: TokenPayload) -> Self {
        Credential::new(
            payload.token,
            payload.refresh_token,
            payload.token_expires_at,
            payload.refresh_expires_at,
        )
    }
}

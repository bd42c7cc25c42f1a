//! Session record and its signed cookie token.
//!
//! Token layout: `base64url(json(session)) "." base64url(hmac(payload))`, both
//! parts unpadded. The HMAC covers the encoded payload, not the raw JSON.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use super::{error::AuthError, signer::Signer};

/// Authenticated identity carried by the session cookie.
///
/// Never mutated once issued; a new login issues a new session.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Lowercase, trimmed email; the allow-list key.
    #[serde(rename = "email")]
    pub subject_email: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "exp")]
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn new(subject_email: String, display_name: String, ttl: Duration) -> Self {
        Self {
            subject_email,
            display_name,
            expires_at: Utc::now() + ttl,
        }
    }

    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone, Debug)]
pub struct SessionCodec {
    signer: Signer,
}

impl SessionCodec {
    #[must_use]
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    /// Serialize and sign a session.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the session cannot be serialized.
    pub fn encode(&self, session: &Session) -> Result<String, AuthError> {
        let json = serde_json::to_vec(session).map_err(|err| {
            error!("Failed to serialize session: {err}");
            AuthError::Internal
        })?;
        let payload = Base64UrlUnpadded::encode_string(&json);
        let tag = self.signer.sign(payload.as_bytes());
        Ok(format!("{payload}.{tag}"))
    }

    /// Decode a token against the current time.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<Session> {
        self.decode_at(token, Utc::now())
    }

    /// Decode a token, returning `None` for every failure: wrong shape, bad
    /// signature, malformed payload or expiry. Callers cannot tell them apart.
    #[must_use]
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut parts = token.split('.');
        let (Some(payload), Some(tag), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        // Signature first: nothing from the payload is parsed until it is authentic.
        if !self.signer.verify(payload.as_bytes(), tag) {
            return None;
        }
        let json = Base64UrlUnpadded::decode_vec(payload).ok()?;
        let session: Session = serde_json::from_slice(&json).ok()?;
        session.is_valid_at(now).then_some(session)
    }

    /// Try each candidate in order and return the first valid session.
    ///
    /// Browsers may send several cookies with the same name (host-only and
    /// domain-scoped copies from earlier logins), so a stale one must not hide a
    /// valid one.
    pub fn decode_first<'a, I>(&self, candidates: I, now: DateTime<Utc>) -> Option<Session>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .find_map(|candidate| self.decode_at(candidate, now))
    }
}

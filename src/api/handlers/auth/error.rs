//! Error taxonomy for the auth layer.
//!
//! `ConfigError` is raised while building the auth state at startup and is
//! fatal. `AuthError` is what a request can fail with; every variant maps to a
//! status code and a short body that never carries internal detail.

use axum::{
    http::{StatusCode, header::InvalidHeaderValue},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use super::signer::MIN_KEY_LEN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cookie signing key must be at least {MIN_KEY_LEN} bytes, got {0}")]
    SigningKeyTooShort(usize),
    #[error("missing identity provider setting: {0}")]
    MissingProviderSetting(&'static str),
    #[error("invalid url for {name}: {value}")]
    InvalidUrl { name: &'static str, value: String },
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),
    #[error("invalid callback response mode: {0}")]
    InvalidCallbackResponse(String),
    #[error("session ttl must be between 1 and {max} seconds, got {got}")]
    InvalidSessionTtl { got: i64, max: i64 },
    #[error("failed to build identity provider client: {0}")]
    HttpClient(String),
}

/// Identity provider failures, split by the callback gate they belong to.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("code exchange failed: {0}")]
    Exchange(String),
    #[error("identity token rejected: {0}")]
    IdentityInvalid(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid state")]
    Csrf,
    #[error("exchange failed")]
    Exchange,
    #[error("id token invalid")]
    IdentityInvalid,
    #[error("access denied")]
    AccessDenied,
    #[error("unauthorized")]
    SessionInvalid,
    #[error("internal error")]
    Internal,
}

impl AuthError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Csrf => StatusCode::BAD_REQUEST,
            Self::Exchange | Self::IdentityInvalid | Self::SessionInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Exchange(_) => Self::Exchange,
            ProviderError::IdentityInvalid(_) => Self::IdentityInvalid,
        }
    }
}

impl From<InvalidHeaderValue> for AuthError {
    fn from(err: InvalidHeaderValue) -> Self {
        error!("Failed to build response header: {err}");
        Self::Internal
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_maps_status() {
        assert_eq!(AuthError::Csrf.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::Exchange.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::IdentityInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::AccessDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::SessionInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn provider_error_keeps_gate() {
        let err: AuthError = ProviderError::Exchange("timeout".to_string()).into();
        assert!(matches!(err, AuthError::Exchange));
        let err: AuthError = ProviderError::IdentityInvalid("aud".to_string()).into();
        assert!(matches!(err, AuthError::IdentityInvalid));
    }

    #[test]
    fn response_body_is_minimal() {
        let response = ProviderError::Exchange("upstream said 500: secret".to_string());
        let response = AuthError::from(response).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

//! Session guard for the protected `/api` router.

use axum::{
    Json,
    extract::{Extension, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::{
    cookies::{SESSION_COOKIE_NAME, cookie_values},
    error::AuthError,
    session::Session,
    state::AuthState,
};

/// Reject requests without a valid session cookie.
///
/// `OPTIONS` is answered with 204 before any check so CORS preflights pass.
/// On success the decoded [`Session`] is added to the request extensions.
pub async fn require_session(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    let session = {
        let candidates = cookie_values(request.headers(), SESSION_COOKIE_NAME);
        auth_state.codec().decode_first(candidates, Utc::now())
    };

    let Some(session) = session else {
        debug!(path = %request.uri().path(), "request rejected without a valid session");
        return AuthError::SessionInvalid.into_response();
    };

    request.extensions_mut().insert(session);
    next.run(request).await
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current session", body = Session),
        (status = 401, description = "Missing, tampered or expired session cookie"),
    ),
    tag = "session"
)]
pub async fn me(Extension(session): Extension<Session>) -> Json<Session> {
    Json(session)
}

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header::CACHE_CONTROL, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{
    cookies::{
        REDIRECT_COOKIE_NAME, RequestTransport, SESSION_COOKIE_NAME, STATE_COOKIE_NAME,
        clear_cookie,
    },
    error::AuthError,
    state::AuthState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub ok: bool,
}

/// Clear the session and helper cookies with the attributes they were issued with.
///
/// Always succeeds; there is no server-side session to look up.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session and helper cookies cleared", body = LogoutResponse),
    ),
    tag = "auth"
)]
pub async fn logout(
    uri: Uri,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let attributes = auth_state.cookie_attributes(RequestTransport::from_parts(&uri, &headers));

    let mut response_headers = HeaderMap::new();
    for (name, http_only) in [
        (SESSION_COOKIE_NAME, true),
        (STATE_COOKIE_NAME, false),
        (REDIRECT_COOKIE_NAME, true),
    ] {
        response_headers.append(SET_COOKIE, clear_cookie(name, http_only, &attributes)?);
    }
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    info!(
        secure = attributes.secure(),
        same_site = attributes.same_site().as_str(),
        "session cleared"
    );

    Ok((
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse { ok: true }),
    )
        .into_response())
}

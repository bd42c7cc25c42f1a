//! Local-environment helpers. Only mounted when the environment is `local`.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, Uri, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{
    cookies::{RequestTransport, SESSION_COOKIE_NAME, request_cookies, set_cookie},
    error::AuthError,
    session::Session,
    state::{AuthState, normalize_email},
};

#[derive(Debug, Default, Deserialize)]
pub struct LoginAsParams {
    pub email: Option<String>,
    pub name: Option<String>,
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Issue a session for an allow-listed email without going through the provider.
pub async fn login_as(
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<LoginAsParams>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, Response> {
    let email = normalize_email(params.email.as_deref().unwrap_or_default());
    if email.is_empty() || !valid_email(&email) {
        return Err((StatusCode::BAD_REQUEST, "email required").into_response());
    }
    if !auth_state.allow_list().contains(&email) {
        return Err(AuthError::AccessDenied.into_response());
    }
    let name = params
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| email.clone());

    let session = Session::new(email, name, auth_state.session_ttl());
    let token = auth_state
        .codec()
        .encode(&session)
        .map_err(IntoResponse::into_response)?;
    let attributes = auth_state.cookie_attributes(RequestTransport::from_parts(&uri, &headers));
    let cookie = set_cookie(
        SESSION_COOKIE_NAME,
        &token,
        true,
        session.expires_at,
        &attributes,
    )
    .map_err(|err| AuthError::from(err).into_response())?;

    info!("dev session issued");
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response())
}

/// Names of the cookies the browser sent, in order. Values are never echoed.
pub async fn debug_cookies(headers: HeaderMap) -> Json<Vec<String>> {
    Json(
        request_cookies(&headers)
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::COOKIE};

    #[test]
    fn valid_email_rejects_garbage() {
        assert!(valid_email("a@x.com"));
        assert!(!valid_email("a@x"));
        assert!(!valid_email("a x@y.com"));
        assert!(!valid_email(""));
    }

    #[tokio::test]
    async fn debug_cookies_lists_names_only() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("app_session=secret-token; oauth_state=abc"),
        );
        let Json(names) = debug_cookies(headers).await;
        assert_eq!(names, vec!["app_session", "oauth_state"]);
    }
}

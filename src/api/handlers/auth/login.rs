//! Login start: issue the anti-CSRF state and send the browser to the provider.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::{
    cookies::{
        CookieAttributes, REDIRECT_COOKIE_NAME, RequestTransport, STATE_COOKIE_NAME,
        clear_cookie, set_cookie,
    },
    error::AuthError,
    state::AuthState,
};

const STATE_BYTES: usize = 16;
const LOGIN_COOKIE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LoginParams {
    /// Where to land after login: a relative path or a URL on an allowed host.
    pub redirect: Option<String>,
    /// `1` returns the computed login parameters as JSON (local environment only).
    pub debug: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginDebug {
    pub authorization_url: String,
    pub environment: String,
    pub cookie_attributes: CookieAttributes,
    pub redirect: Option<String>,
}

/// Fresh CSRF state: 16 random bytes, base64url without padding.
#[must_use]
pub fn new_state_token() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[utoipa::path(
    get,
    path = "/auth/login",
    params(LoginParams),
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 200, description = "Login diagnostics (local only, debug=1)", body = LoginDebug),
    ),
    tag = "auth"
)]
pub async fn login(
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let attributes = auth_state.cookie_attributes(RequestTransport::from_parts(&uri, &headers));
    let expires_at = Utc::now() + Duration::minutes(LOGIN_COOKIE_TTL_MINUTES);

    let state = new_state_token();
    let authorization_url = auth_state.provider().authorization_url(&state);

    let mut response_headers = HeaderMap::new();
    // The state cookie is read back by the callback, and some integrations
    // resubmit it from script, so it is not HttpOnly.
    response_headers.append(
        SET_COOKIE,
        set_cookie(STATE_COOKIE_NAME, &state, false, expires_at, &attributes)?,
    );

    let redirect = match params.redirect.as_deref().filter(|target| !target.is_empty()) {
        Some(target) => {
            let accepted = auth_state.redirect_policy().accept(target);
            if accepted.is_none() {
                warn!(redirect_target = %target, "ignoring post-login redirect outside the allow-list");
            }
            accepted
        }
        None => None,
    };
    match redirect {
        Some(target) => {
            let encoded = Base64UrlUnpadded::encode_string(target.as_bytes());
            response_headers.append(
                SET_COOKIE,
                set_cookie(REDIRECT_COOKIE_NAME, &encoded, true, expires_at, &attributes)?,
            );
        }
        // Drop a target left over from an abandoned attempt.
        None => {
            response_headers.append(
                SET_COOKIE,
                clear_cookie(REDIRECT_COOKIE_NAME, true, &attributes)?,
            );
        }
    }
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    info!(
        secure = attributes.secure(),
        same_site = attributes.same_site().as_str(),
        domain = attributes.domain().unwrap_or(""),
        redirect = redirect.is_some(),
        "login started"
    );

    let debug = params
        .debug
        .as_deref()
        .is_some_and(|value| matches!(value, "1" | "true"));
    if debug && auth_state.config().environment().is_local() {
        let body = LoginDebug {
            authorization_url: authorization_url.to_string(),
            environment: auth_state.config().environment().as_str().to_string(),
            cookie_attributes: attributes,
            redirect: redirect.map(str::to_string),
        };
        return Ok((StatusCode::OK, response_headers, Json(body)).into_response());
    }

    response_headers.insert(LOCATION, HeaderValue::from_str(authorization_url.as_str())?);
    Ok((StatusCode::FOUND, response_headers).into_response())
}

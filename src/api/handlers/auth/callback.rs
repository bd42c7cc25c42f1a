//! Provider callback: CSRF, code exchange, ID token, allow-list, then the session.

use axum::{
    extract::{Extension, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::IntoParams;

use super::{
    cookies::{
        REDIRECT_COOKIE_NAME, RequestTransport, SESSION_COOKIE_NAME, STATE_COOKIE_NAME,
        clear_cookie, cookie_value, cookie_values, set_cookie,
    },
    error::AuthError,
    session::Session,
    state::{AuthState, CallbackResponse, normalize_email},
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Session issued; HTML page navigates to the post-login target"),
        (status = 302, description = "Session issued; redirect to the post-login target"),
        (status = 400, description = "Missing or mismatched state"),
        (status = 401, description = "Code exchange failed or ID token invalid"),
        (status = 403, description = "Email not verified or not allowed"),
    ),
    tag = "auth"
)]
pub async fn callback(
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    check_state(
        params.state.as_deref(),
        &cookie_values(&headers, STATE_COOKIE_NAME),
    )?;

    let code = params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            warn!("callback without authorization code");
            AuthError::Exchange
        })?;

    let provider = auth_state.provider();
    let id_token = provider.exchange_code(code).await.map_err(|err| {
        warn!(error = %err, "authorization code exchange failed");
        AuthError::from(err)
    })?;
    let claims = provider.verify_id_token(&id_token).await.map_err(|err| {
        warn!(error = %err, "id token rejected");
        AuthError::from(err)
    })?;

    let email = normalize_email(&claims.email);
    if email.is_empty() || !claims.email_verified || !auth_state.allow_list().contains(&email) {
        warn!(
            email_present = !email.is_empty(),
            email_verified = claims.email_verified,
            "login denied by allow-list"
        );
        return Err(AuthError::AccessDenied);
    }

    let session = Session::new(email, claims.name, auth_state.session_ttl());
    let token = auth_state.codec().encode(&session)?;
    let attributes = auth_state.cookie_attributes(RequestTransport::from_parts(&uri, &headers));

    let mut response_headers = HeaderMap::new();
    response_headers.append(
        SET_COOKIE,
        set_cookie(
            SESSION_COOKIE_NAME,
            &token,
            true,
            session.expires_at,
            &attributes,
        )?,
    );
    response_headers.append(
        SET_COOKIE,
        clear_cookie(STATE_COOKIE_NAME, false, &attributes)?,
    );

    let stored = cookie_value(&headers, REDIRECT_COOKIE_NAME);
    if stored.is_some() {
        response_headers.append(
            SET_COOKIE,
            clear_cookie(REDIRECT_COOKIE_NAME, true, &attributes)?,
        );
    }
    let target = resolve_redirect(&auth_state, stored);
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    info!(
        secure = attributes.secure(),
        same_site = attributes.same_site().as_str(),
        domain = attributes.domain().unwrap_or(""),
        expires_at = %session.expires_at,
        "session issued"
    );

    match auth_state.config().callback_response() {
        CallbackResponse::Html => {
            response_headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            Ok((StatusCode::OK, response_headers, redirect_page(&target)).into_response())
        }
        CallbackResponse::Redirect => {
            response_headers.insert(LOCATION, HeaderValue::from_str(&target)?);
            Ok((StatusCode::FOUND, response_headers).into_response())
        }
    }
}

/// The query state must be non-empty and equal one of the state cookies sent.
///
/// Every candidate is compared, so a stale duplicate scoped to another
/// domain or path does not hide the current one.
fn check_state(query: Option<&str>, cookies: &[&str]) -> Result<(), AuthError> {
    let Some(query) = query.filter(|query| !query.is_empty()) else {
        warn!("callback without state");
        return Err(AuthError::Csrf);
    };
    let matched = cookies.iter().fold(false, |matched, cookie| {
        matched | bool::from(query.as_bytes().ct_eq(cookie.as_bytes()))
    });
    if !matched {
        warn!(state_cookies = cookies.len(), "callback state mismatch");
        return Err(AuthError::Csrf);
    }
    Ok(())
}

/// The stored target if it still passes the redirect policy, else the default.
fn resolve_redirect(auth_state: &AuthState, stored: Option<&str>) -> String {
    let decoded = stored
        .and_then(|value| Base64UrlUnpadded::decode_vec(value).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());
    if let Some(target) = decoded.as_deref() {
        if let Some(accepted) = auth_state.redirect_policy().accept(target) {
            return accepted.to_string();
        }
        warn!(redirect_target = %target, "ignoring stored post-login redirect");
    }
    auth_state.config().default_redirect().to_string()
}

/// Same-document navigation so the browser applies `Set-Cookie` first.
fn redirect_page(target: &str) -> String {
    let attribute = escape_html(target);
    // `<` is escaped so the target cannot close the script element.
    let script = serde_json::to_string(target)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");
    format!(
        "<!doctype html>\n<meta http-equiv=\"refresh\" content=\"0;url={attribute}\">\n<script>window.location.assign({script})</script>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

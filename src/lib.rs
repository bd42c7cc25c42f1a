//! # Salesdesk (sales pipeline CRM backend)
//!
//! `salesdesk` tracks clients, sales processes, contracts and marketing stages
//! and forecasts cashflow from contract payment schedules. This crate hosts the
//! HTTP service and its authentication layer; the CRUD and report handlers are
//! mounted into the protected `/api` router by [`api::app`].
//!
//! ## Authentication (Google OIDC + signed session cookie)
//!
//! Login is delegated to Google with the authorization-code flow. After the
//! callback validates the anti-CSRF state, exchanges the code and verifies the
//! ID token, the email is checked against a static allow-list and a session
//! cookie is issued.
//!
//! - **Stateless sessions:** the cookie carries
//!   `base64url(json) "." base64url(hmac_sha256(key, base64url(json)))`.
//!   Nothing is stored server-side, so a session cannot be revoked before it
//!   expires (at most 12 hours).
//! - **Cookie policy:** `Secure`, `SameSite` and `Domain` are decided per
//!   request. `SameSite=None` always forces `Secure`.
//! - **Key rotation:** changing the signing key requires a restart and
//!   invalidates every outstanding session.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

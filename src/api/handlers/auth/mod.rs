//! Cookie-based session authentication.
//!
//! Login is delegated to an identity provider (Google) with the
//! authorization-code flow; the result is a stateless, HMAC-signed session
//! cookie checked by [`guard::require_session`] on every `/api` request.
//!
//! ## Flow
//!
//! 1. `GET /auth/login` sets the `oauth_state` cookie (10 minutes) and an
//!    optional `post_login_redirect` cookie, then redirects to the provider.
//! 2. `GET /auth/callback` checks, in order: state (400), code exchange (401),
//!    ID token (401), `email_verified` and the allow-list (403). Only then is
//!    `app_session` issued and the helper cookies cleared.
//! 3. `POST /auth/logout` clears all three cookies and always returns 200.
//!
//! ## Cookies
//!
//! Attributes come from one [`cookies::CookiePolicy`] per request and are
//! reused verbatim when clearing. `SameSite=None` always implies `Secure`.
//!
//! ## Redirect targets
//!
//! The `redirect` query parameter is untrusted. Only same-origin relative
//! paths and URLs on the frontend host, the default redirect host or
//! `--redirect-allowed-hosts` are kept; anything else falls back to the
//! configured default.

pub mod callback;
pub mod cookies;
pub mod dev;
mod error;
pub mod guard;
pub mod login;
pub mod logout;
mod provider;
mod redirect;
pub mod session;
mod signer;
mod state;

pub use error::{AuthError, ConfigError, ProviderError};
pub use guard::{me, require_session};
pub use provider::{GoogleProvider, IdentityClaims, IdentityProvider};
pub use redirect::RedirectPolicy;
pub use session::{Session, SessionCodec};
pub use signer::{MIN_KEY_LEN, Signer};
pub use state::{AllowList, AuthConfig, AuthState, CallbackResponse, normalize_email};

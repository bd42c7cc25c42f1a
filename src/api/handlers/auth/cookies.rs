//! Cookie policy, `Set-Cookie` rendering and `Cookie` header parsing.
//!
//! Every cookie the auth layer emits goes through [`CookiePolicy::attributes`]
//! and [`set_cookie`] / [`clear_cookie`], so a cookie is always cleared with
//! the same `Path`/`Domain`/`SameSite`/`Secure` it was issued with.

use axum::http::{
    HeaderMap, HeaderValue, Uri,
    header::{COOKIE, InvalidHeaderValue},
    uri::Scheme,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub const SESSION_COOKIE_NAME: &str = "app_session";
pub const STATE_COOKIE_NAME: &str = "oauth_state";
pub const REDIRECT_COOKIE_NAME: &str = "post_login_redirect";

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const CLEARED_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub enum SameSite {
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// How `SameSite` is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSiteMode {
    /// `None` when the frontend and the API are on different sites, `Lax` otherwise.
    Auto,
    Lax,
    None,
}

impl std::str::FromStr for SameSiteMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            other => Err(format!("invalid same-site mode: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

impl Environment {
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "local" | "localhost" => Ok(Self::Local),
            "dev" | "development" | "staging" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(other.to_string()),
        }
    }
}

/// Attributes shared by every cookie emitted for one request.
///
/// Fields are private so `SameSite=None` without `Secure` cannot be built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct CookieAttributes {
    secure: bool,
    same_site: SameSite,
    domain: Option<String>,
    partitioned: bool,
}

impl CookieAttributes {
    #[must_use]
    pub fn new(secure: bool, same_site: SameSite, domain: Option<String>, partitioned: bool) -> Self {
        let none = same_site == SameSite::None;
        Self {
            // Browsers silently drop SameSite=None cookies that are not Secure.
            secure: secure || none,
            same_site,
            domain: domain.filter(|domain| !domain.is_empty()),
            // Partitioned is only meaningful (and only accepted) on cross-site Secure cookies.
            partitioned: partitioned && none,
        }
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub const fn same_site(&self) -> SameSite {
        self.same_site
    }

    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    #[must_use]
    pub const fn partitioned(&self) -> bool {
        self.partitioned
    }
}

/// What the request tells us about its transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestTransport {
    /// Request arrived over TLS terminated by this process.
    pub tls: bool,
    /// A proxy reported `X-Forwarded-Proto: https`.
    pub forwarded_https: bool,
}

impl RequestTransport {
    #[must_use]
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> Self {
        let tls = uri.scheme() == Some(&Scheme::HTTPS);
        let forwarded_https = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
        Self {
            tls,
            forwarded_https,
        }
    }
}

/// Deployment-level inputs of the cookie decision. Evaluated per request
/// because one process may serve both direct and proxied traffic.
#[derive(Clone, Debug)]
pub struct CookiePolicy {
    environment: Environment,
    trust_forwarded_proto: bool,
    cross_site: bool,
    same_site_mode: SameSiteMode,
    domain: Option<String>,
    partitioned: bool,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(
        environment: Environment,
        trust_forwarded_proto: bool,
        cross_site: bool,
        same_site_mode: SameSiteMode,
        domain: Option<String>,
        partitioned: bool,
    ) -> Self {
        Self {
            environment,
            trust_forwarded_proto,
            cross_site,
            same_site_mode,
            domain,
            partitioned,
        }
    }

    #[must_use]
    pub fn attributes(&self, transport: RequestTransport) -> CookieAttributes {
        let secure = transport.tls
            || (self.trust_forwarded_proto && transport.forwarded_https)
            || !self.environment.is_local();
        let same_site = match self.same_site_mode {
            SameSiteMode::Auto if self.cross_site => SameSite::None,
            SameSiteMode::Auto | SameSiteMode::Lax => SameSite::Lax,
            SameSiteMode::None => SameSite::None,
        };
        CookieAttributes::new(secure, same_site, self.domain.clone(), self.partitioned)
    }
}

/// Render a `Set-Cookie` value that stores `value` until `expires_at`.
#[must_use]
pub fn render_cookie(
    name: &str,
    value: &str,
    http_only: bool,
    expires_at: DateTime<Utc>,
    attributes: &CookieAttributes,
) -> String {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    let expires = expires_at.format(EXPIRES_FORMAT);
    render(
        name,
        value,
        http_only,
        &format!("Expires={expires}; Max-Age={max_age}"),
        attributes,
    )
}

/// Render a `Set-Cookie` value that deletes `name`.
#[must_use]
pub fn render_clear_cookie(name: &str, http_only: bool, attributes: &CookieAttributes) -> String {
    render(
        name,
        "",
        http_only,
        &format!("Expires={CLEARED_EXPIRES}; Max-Age=0"),
        attributes,
    )
}

fn render(
    name: &str,
    value: &str,
    http_only: bool,
    lifetime: &str,
    attributes: &CookieAttributes,
) -> String {
    let mut cookie = format!("{name}={value}; Path=/");
    if let Some(domain) = attributes.domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie.push_str("; ");
    cookie.push_str(lifetime);
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if attributes.secure() {
        cookie.push_str("; Secure");
    }
    cookie.push_str("; SameSite=");
    cookie.push_str(attributes.same_site().as_str());
    if attributes.partitioned() {
        cookie.push_str("; Partitioned");
    }
    cookie
}

/// # Errors
/// Returns an error if the rendered cookie is not a valid header value.
pub fn set_cookie(
    name: &str,
    value: &str,
    http_only: bool,
    expires_at: DateTime<Utc>,
    attributes: &CookieAttributes,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&render_cookie(
        name, value, http_only, expires_at, attributes,
    ))
}

/// # Errors
/// Returns an error if the rendered cookie is not a valid header value.
pub fn clear_cookie(
    name: &str,
    http_only: bool,
    attributes: &CookieAttributes,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&render_clear_cookie(name, http_only, attributes))
}

/// All `(name, value)` pairs from the request's `Cookie` headers, in order.
/// Duplicate names are kept.
pub fn request_cookies(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim(), value.trim()))
        })
        .collect()
}

/// Every value sent for cookie `name`, in header order.
pub fn cookie_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    request_cookies(headers)
        .into_iter()
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .collect()
}

/// First non-empty value sent for cookie `name`.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    cookie_values(headers, name)
        .into_iter()
        .find(|value| !value.is_empty())
}

/// The site of a host: the last two labels, or the whole host for IPs and
/// single-label names. Multi-label public suffixes (`co.uk`, `onrender.com`)
/// are not known here; use an explicit `SameSite` mode for those deployments.
#[must_use]
pub fn site_of(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}

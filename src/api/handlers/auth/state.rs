//! Auth configuration and the shared, immutable auth state.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{collections::HashSet, sync::Arc, time::Duration};
use url::Url;

use super::{
    cookies::{
        CookieAttributes, CookiePolicy, Environment, RequestTransport, SameSiteMode, site_of,
    },
    error::ConfigError,
    provider::IdentityProvider,
    redirect::RedirectPolicy,
    session::SessionCodec,
    signer::Signer,
};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const MAX_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:5002";

/// How the callback hands the browser over to the post-login target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackResponse {
    /// 200 with a meta-refresh/script page, so `Set-Cookie` is applied before navigation.
    Html,
    /// Plain 302; only for proxy chains known to keep `Set-Cookie` on redirects.
    Redirect,
}

impl std::str::FromStr for CallbackResponse {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "redirect" | "302" => Ok(Self::Redirect),
            other => Err(ConfigError::InvalidCallbackResponse(other.to_string())),
        }
    }
}

/// Lowercase set of emails allowed to hold a session.
#[derive(Clone, Debug, Default)]
pub struct AllowList(HashSet<String>);

impl AllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            emails
                .into_iter()
                .map(|email| normalize_email(email.as_ref()))
                .filter(|email| !email.is_empty())
                .collect(),
        )
    }

    /// Membership test on an already-normalized email.
    #[must_use]
    pub fn contains(&self, email_normalized: &str) -> bool {
        self.0.contains(email_normalized)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalize an email for allow-list checks and the session subject.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    frontend_base_url: String,
    oauth_redirect_url: String,
    post_login_redirect: Option<String>,
    allowed_emails: Vec<String>,
    cookie_domain: Option<String>,
    cookie_partitioned: bool,
    same_site_mode: SameSiteMode,
    trust_forwarded_proto: bool,
    redirect_allowed_hosts: Vec<String>,
    callback_response: CallbackResponse,
    session_ttl_seconds: i64,
    provider_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(oauth_redirect_url: String) -> Self {
        Self {
            environment: Environment::Local,
            frontend_base_url: DEFAULT_FRONTEND_BASE_URL.to_string(),
            oauth_redirect_url,
            post_login_redirect: None,
            allowed_emails: Vec::new(),
            cookie_domain: None,
            cookie_partitioned: false,
            same_site_mode: SameSiteMode::Auto,
            trust_forwarded_proto: false,
            redirect_allowed_hosts: Vec::new(),
            callback_response: CallbackResponse::Html,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            provider_timeout_seconds: DEFAULT_PROVIDER_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: String) -> Self {
        self.frontend_base_url = url;
        self
    }

    #[must_use]
    pub fn with_post_login_redirect(mut self, target: Option<String>) -> Self {
        self.post_login_redirect = target.filter(|target| !target.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_allowed_emails(mut self, emails: Vec<String>) -> Self {
        self.allowed_emails = emails;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|domain| !domain.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_cookie_partitioned(mut self, partitioned: bool) -> Self {
        self.cookie_partitioned = partitioned;
        self
    }

    #[must_use]
    pub fn with_same_site_mode(mut self, mode: SameSiteMode) -> Self {
        self.same_site_mode = mode;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_proto(mut self, trust: bool) -> Self {
        self.trust_forwarded_proto = trust;
        self
    }

    #[must_use]
    pub fn with_redirect_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.redirect_allowed_hosts = hosts;
        self
    }

    #[must_use]
    pub fn with_callback_response(mut self, mode: CallbackResponse) -> Self {
        self.callback_response = mode;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_provider_timeout_seconds(mut self, seconds: u64) -> Self {
        self.provider_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn oauth_redirect_url(&self) -> &str {
        &self.oauth_redirect_url
    }

    #[must_use]
    pub fn callback_response(&self) -> CallbackResponse {
        self.callback_response
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Fallback target after login: the configured redirect, else `/`.
    #[must_use]
    pub fn default_redirect(&self) -> &str {
        self.post_login_redirect.as_deref().unwrap_or("/")
    }

    /// Check the settings that would otherwise fail later at request time.
    ///
    /// # Errors
    /// Returns a `ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("oauth-redirect-url", &self.oauth_redirect_url)?;
        parse_url("frontend-base-url", &self.frontend_base_url)?;
        if let Some(target) = &self.post_login_redirect
            && !target.starts_with('/')
        {
            parse_url("post-login-redirect", target)?;
        }
        if let Some(domain) = &self.cookie_domain {
            let valid = Regex::new(r"^\.?[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*$")
                .is_ok_and(|re| re.is_match(domain));
            if !valid {
                return Err(ConfigError::InvalidUrl {
                    name: "cookie-domain",
                    value: domain.clone(),
                });
            }
        }
        if self.session_ttl_seconds <= 0 || self.session_ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(ConfigError::InvalidSessionTtl {
                got: self.session_ttl_seconds,
                max: MAX_SESSION_TTL_SECONDS,
            });
        }
        Ok(())
    }

    /// Frontend and API live on different sites, so cookies must be `SameSite=None`.
    fn cross_site(&self) -> bool {
        let host = |value: &str| {
            Url::parse(value)
                .ok()
                .and_then(|url| url.host_str().map(site_of))
        };
        match (
            host(&self.frontend_base_url),
            host(&self.oauth_redirect_url),
        ) {
            (Some(frontend), Some(api)) => frontend != api,
            _ => false,
        }
    }

    fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy::new(
            self.environment,
            self.trust_forwarded_proto,
            self.cross_site(),
            self.same_site_mode,
            self.cookie_domain.clone(),
            self.cookie_partitioned,
        )
    }

    fn redirect_policy(&self) -> RedirectPolicy {
        let policy = RedirectPolicy::new(&self.redirect_allowed_hosts)
            .with_url_host(&self.frontend_base_url);
        match &self.post_login_redirect {
            Some(target) => policy.with_url_host(target),
            None => policy,
        }
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .ok_or_else(|| ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
        })
}

/// Everything the auth handlers need, built once at startup.
pub struct AuthState {
    config: AuthConfig,
    codec: SessionCodec,
    cookie_policy: CookiePolicy,
    redirect_policy: RedirectPolicy,
    allow_list: AllowList,
    provider: Arc<dyn IdentityProvider>,
}

impl AuthState {
    /// # Errors
    /// Returns a `ConfigError` if the configuration or the signing key is invalid.
    pub fn new(
        config: AuthConfig,
        signing_key: &SecretString,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let signer = Signer::new(signing_key.expose_secret().as_bytes())?;
        Ok(Self {
            cookie_policy: config.cookie_policy(),
            redirect_policy: config.redirect_policy(),
            allow_list: AllowList::new(&config.allowed_emails),
            codec: SessionCodec::new(signer),
            provider,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    #[must_use]
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    #[must_use]
    pub fn redirect_policy(&self) -> &RedirectPolicy {
        &self.redirect_policy
    }

    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn cookie_attributes(&self, transport: RequestTransport) -> CookieAttributes {
        self.cookie_policy.attributes(transport)
    }

    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.session_ttl_seconds)
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("allow_list", &self.allow_list.len())
            .finish_non_exhaustive()
    }
}

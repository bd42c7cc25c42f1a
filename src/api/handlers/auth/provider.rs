//! Identity provider seam and the Google OpenID Connect implementation.
//!
//! The callback handler only sees [`IdentityProvider`]; tests swap in a stub.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{ConfigError, ProviderError};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const JWKS_CACHE_TTL_SECONDS: u64 = 600;
const JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 30;

/// Identity asserted by a verified ID token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityClaims {
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent URL carrying `state` for the browser to visit.
    fn authorization_url(&self, state: &str) -> Url;

    /// Trade an authorization code for a raw ID token.
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError>;

    /// Check signature, issuer, audience and expiry, then return the claims.
    async fn verify_id_token(&self, id_token: &str) -> Result<IdentityClaims, ProviderError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct GoogleClaims {
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    email_verified: bool,
}

/// Google has sent `email_verified` both as a JSON bool and as `"true"`.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(value) => value.eq_ignore_ascii_case("true"),
    })
}

#[derive(Debug)]
struct JwksCache {
    keys: JwkSet,
    fetched_at: Option<Instant>,
}

impl JwksCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < Duration::from_secs(JWKS_CACHE_TTL_SECONDS))
    }
}

#[derive(Debug)]
pub struct GoogleProvider {
    client_id: String,
    client_secret: SecretString,
    redirect_url: String,
    auth_endpoint: Url,
    token_endpoint: Url,
    jwks_endpoint: Url,
    client: Client,
    jwks_cache: RwLock<JwksCache>,
    last_refresh_unix: AtomicU64,
}

impl GoogleProvider {
    /// # Errors
    /// Returns a `ConfigError` if a setting is missing or the HTTP client cannot be built.
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        redirect_url: String,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if client_id.trim().is_empty() {
            return Err(ConfigError::MissingProviderSetting("google-client-id"));
        }
        if client_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingProviderSetting("google-client-secret"));
        }
        if Url::parse(&redirect_url).is_err() {
            return Err(ConfigError::InvalidUrl {
                name: "oauth-redirect-url",
                value: redirect_url,
            });
        }
        let auth_endpoint = endpoint("google-auth-url", GOOGLE_AUTH_URL)?;
        let token_endpoint = endpoint("google-token-url", GOOGLE_TOKEN_URL)?;
        let jwks_endpoint = endpoint("google-jwks-url", GOOGLE_JWKS_URL)?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self {
            client_id,
            client_secret,
            redirect_url,
            auth_endpoint,
            token_endpoint,
            jwks_endpoint,
            client,
            jwks_cache: RwLock::new(JwksCache {
                keys: JwkSet { keys: Vec::new() },
                fetched_at: None,
            }),
            last_refresh_unix: AtomicU64::new(0),
        })
    }

    /// Point code exchange and key retrieval somewhere other than Google.
    #[must_use]
    pub fn with_endpoints(mut self, token_endpoint: Url, jwks_endpoint: Url) -> Self {
        self.token_endpoint = token_endpoint;
        self.jwks_endpoint = jwks_endpoint;
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation
    }

    async fn refresh_jwks(&self) -> Result<(), ProviderError> {
        let keys: JwkSet = self
            .client
            .get(self.jwks_endpoint.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ProviderError::IdentityInvalid(format!("jwks fetch failed: {err}")))?
            .json()
            .await
            .map_err(|err| ProviderError::IdentityInvalid(format!("jwks parse failed: {err}")))?;
        let mut cache = self.jwks_cache.write().await;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        self.last_refresh_unix
            .store(now_unix_seconds(), Ordering::Relaxed);
        info!(jwks_keys = cache.keys.keys.len(), "google jwks cache refreshed");
        Ok(())
    }

    /// Key for `kid`, refreshing when the cache is stale or the kid is unknown.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ProviderError> {
        let fresh = self.jwks_cache.read().await.is_fresh();
        if !fresh && let Err(err) = self.refresh_jwks().await {
            // Keep verifying against the last keys we had.
            warn!(error = %err, "failed to refresh google jwks cache");
        }

        if let Some(key) = self.cached_key(kid).await? {
            return Ok(key);
        }

        let now = now_unix_seconds();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= JWKS_REFRESH_COOLDOWN_SECONDS {
            self.refresh_jwks().await?;
            if let Some(key) = self.cached_key(kid).await? {
                return Ok(key);
            }
        }
        Err(ProviderError::IdentityInvalid(format!("unknown kid: {kid}")))
    }

    async fn cached_key(&self, kid: &str) -> Result<Option<DecodingKey>, ProviderError> {
        let cache = self.jwks_cache.read().await;
        cache
            .keys
            .find(kid)
            .map(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .map_err(|err| ProviderError::IdentityInvalid(format!("bad jwk: {err}")))
            })
            .transpose()
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.auth_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("access_type", "online")
            .append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self
            .client
            .post(self.token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|err| ProviderError::Exchange(format!("token request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Exchange(format!(
                "token endpoint returned {status}"
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Exchange(format!("token response parse: {err}")))?;
        body.id_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProviderError::Exchange("token response without id_token".to_string()))
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<IdentityClaims, ProviderError> {
        let header = decode_header(id_token)
            .map_err(|err| ProviderError::IdentityInvalid(format!("malformed header: {err}")))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::IdentityInvalid("missing kid".to_string()))?;
        let key = self.decoding_key(&kid).await?;
        let data = decode::<GoogleClaims>(id_token, &key, &self.validation())
            .map_err(|err| ProviderError::IdentityInvalid(err.to_string()))?;
        let claims = data.claims;
        debug!(kid = %kid, "id token verified");
        // A missing email is left for the allow-list to deny.
        Ok(IdentityClaims {
            email: claims.email.unwrap_or_default(),
            name: claims.name.unwrap_or_default(),
            email_verified: claims.email_verified,
        })
    }
}

fn endpoint(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
    })
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        Json, Router,
        routing::{get, post},
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex, atomic::AtomicUsize};
    use tokio::net::TcpListener;

    /// Provider double: codes map to ID tokens, tokens map to claims.
    #[derive(Default)]
    pub(crate) struct StubProvider {
        pub exchanges: Mutex<Vec<String>>,
        pub fail_exchange: bool,
        pub claims: Option<IdentityClaims>,
    }

    impl StubProvider {
        pub(crate) fn with_claims(email: &str, email_verified: bool) -> Self {
            Self {
                claims: Some(IdentityClaims {
                    email: email.to_string(),
                    name: "Test User".to_string(),
                    email_verified,
                }),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        fn authorization_url(&self, state: &str) -> Url {
            let mut url = Url::parse("https://idp.test/authorize").expect("static url");
            url.query_pairs_mut().append_pair("state", state);
            url
        }

        async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
            if let Ok(mut exchanges) = self.exchanges.lock() {
                exchanges.push(code.to_string());
            }
            if self.fail_exchange {
                return Err(ProviderError::Exchange("stub".to_string()));
            }
            Ok(format!("id-token-for-{code}"))
        }

        async fn verify_id_token(&self, _id_token: &str) -> Result<IdentityClaims, ProviderError> {
            self.claims
                .clone()
                .ok_or_else(|| ProviderError::IdentityInvalid("stub".to_string()))
        }
    }

    fn google() -> Result<GoogleProvider, ConfigError> {
        GoogleProvider::new(
            "client-123.apps.googleusercontent.com".to_string(),
            SecretString::from("shh"),
            "https://api.example.com/auth/callback".to_string(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn google_requires_settings() {
        let missing_id = GoogleProvider::new(
            " ".to_string(),
            SecretString::from("shh"),
            "https://api.example.com/auth/callback".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            missing_id,
            Err(ConfigError::MissingProviderSetting("google-client-id"))
        ));
        let missing_secret = GoogleProvider::new(
            "id".to_string(),
            SecretString::from(""),
            "https://api.example.com/auth/callback".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            missing_secret,
            Err(ConfigError::MissingProviderSetting("google-client-secret"))
        ));
    }

    #[test]
    fn google_authorization_url_carries_state() -> Result<(), ConfigError> {
        let url = google()?.authorization_url("abc123");
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("state"), Some("abc123"));
        assert_eq!(get("client_id"), Some("client-123.apps.googleusercontent.com"));
        assert_eq!(
            get("redirect_uri"),
            Some("https://api.example.com/auth/callback")
        );
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("scope"), Some("openid email profile"));
        assert_eq!(get("access_type"), Some("online"));
        Ok(())
    }

    #[test]
    fn google_debug_hides_secret() -> Result<(), ConfigError> {
        let debug = format!("{:?}", google()?);
        assert!(!debug.contains("shh"));
        Ok(())
    }

    #[tokio::test]
    async fn google_rejects_malformed_token() -> Result<(), ConfigError> {
        let result = google()?.verify_id_token("not-a-jwt").await;
        assert!(matches!(result, Err(ProviderError::IdentityInvalid(_))));
        Ok(())
    }

    #[test]
    fn email_verified_accepts_bool_or_string() -> Result<(), serde_json::Error> {
        let claims: GoogleClaims =
            serde_json::from_str(r#"{"email":"a@x.com","email_verified":"true"}"#)?;
        assert!(claims.email_verified);
        let claims: GoogleClaims =
            serde_json::from_str(r#"{"email":"a@x.com","email_verified":false}"#)?;
        assert!(!claims.email_verified);
        let claims: GoogleClaims = serde_json::from_str(r#"{"email":"a@x.com"}"#)?;
        assert!(!claims.email_verified);
        assert_eq!(claims.name, None);
        Ok(())
    }

    const CLIENT_ID: &str = "client-123.apps.googleusercontent.com";
    const TEST_KEY_PEM: &str = include_str!("testdata/rsa_test_key.pem");
    const TEST_JWK: &str = include_str!("testdata/rsa_test_jwk.json");

    /// Token and JWKS endpoints on a local port. The token endpoint never
    /// answers in time; the key set is served under whatever kids are published.
    struct FakeGoogle {
        base: Url,
        jwks_fetches: Arc<AtomicUsize>,
        kids: Arc<Mutex<Vec<String>>>,
    }

    impl FakeGoogle {
        async fn start(kids: &[&str]) -> anyhow::Result<Self> {
            let jwks_fetches = Arc::new(AtomicUsize::new(0));
            let kids = Arc::new(Mutex::new(
                kids.iter().map(|kid| (*kid).to_string()).collect::<Vec<_>>(),
            ));
            let fetches = jwks_fetches.clone();
            let published = kids.clone();
            let router = Router::new()
                .route(
                    "/token",
                    post(|| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        "{}"
                    }),
                )
                .route(
                    "/certs",
                    get(move || {
                        let fetches = fetches.clone();
                        let published = published.clone();
                        async move {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            let kids = published.lock().map(|k| k.clone()).unwrap_or_default();
                            Json(jwk_set(&kids))
                        }
                    }),
                );
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
            Ok(Self {
                base: Url::parse(&format!("http://{addr}/"))?,
                jwks_fetches,
                kids,
            })
        }

        fn publish(&self, kids: &[&str]) {
            if let Ok(mut published) = self.kids.lock() {
                *published = kids.iter().map(|kid| (*kid).to_string()).collect();
            }
        }

        fn fetches(&self) -> usize {
            self.jwks_fetches.load(Ordering::SeqCst)
        }

        fn provider(&self, timeout: Duration) -> anyhow::Result<GoogleProvider> {
            let provider = GoogleProvider::new(
                CLIENT_ID.to_string(),
                SecretString::from("shh"),
                "https://api.example.com/auth/callback".to_string(),
                timeout,
            )?;
            Ok(provider.with_endpoints(self.base.join("token")?, self.base.join("certs")?))
        }
    }

    /// The test key published once per kid.
    fn jwk_set(kids: &[String]) -> Value {
        let jwk: Value = serde_json::from_str(TEST_JWK).unwrap_or(Value::Null);
        let keys: Vec<Value> = kids
            .iter()
            .map(|kid| {
                let mut key = jwk.clone();
                key["kid"] = Value::String(kid.clone());
                key
            })
            .collect();
        json!({ "keys": keys })
    }

    fn id_token_claims(aud: &str, iss: &str) -> Value {
        let now = now_unix_seconds();
        json!({
            "iss": iss,
            "aud": aud,
            "sub": "110248495921238986420",
            "iat": now,
            "exp": now + 600,
            "email": "a@x.com",
            "email_verified": true,
            "name": "A"
        })
    }

    fn sign(kid: &str, claims: &Value) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes())?;
        Ok(encode(&header, claims, &key)?)
    }

    #[tokio::test]
    async fn google_exchange_fails_on_timeout() -> anyhow::Result<()> {
        let google = FakeGoogle::start(&["k1"]).await?;
        let provider = google.provider(Duration::from_millis(200))?;
        let result =
            tokio::time::timeout(Duration::from_secs(5), provider.exchange_code("c1")).await?;
        assert!(matches!(result, Err(ProviderError::Exchange(_))));
        Ok(())
    }

    #[tokio::test]
    async fn google_checks_audience_issuer_and_expiry() -> anyhow::Result<()> {
        let google = FakeGoogle::start(&["k1"]).await?;
        let provider = google.provider(Duration::from_secs(5))?;

        for issuer in GOOGLE_ISSUERS {
            let token = sign("k1", &id_token_claims(CLIENT_ID, issuer))?;
            let identity = provider.verify_id_token(&token).await?;
            assert_eq!(identity.email, "a@x.com");
            assert_eq!(identity.name, "A");
            assert!(identity.email_verified);
        }

        let mut expired = id_token_claims(CLIENT_ID, "https://accounts.google.com");
        expired["exp"] = json!(now_unix_seconds() - 3600);
        let rejected = [
            id_token_claims(
                "another-client.apps.googleusercontent.com",
                "https://accounts.google.com",
            ),
            id_token_claims(CLIENT_ID, "https://issuer.example.com"),
            expired,
        ];
        for claims in rejected {
            let token = sign("k1", &claims)?;
            let result = provider.verify_id_token(&token).await;
            assert!(
                matches!(result, Err(ProviderError::IdentityInvalid(_))),
                "accepted {claims}"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn google_leaves_missing_email_empty() -> anyhow::Result<()> {
        let google = FakeGoogle::start(&["k1"]).await?;
        let provider = google.provider(Duration::from_secs(5))?;
        let mut claims = id_token_claims(CLIENT_ID, "https://accounts.google.com");
        if let Some(object) = claims.as_object_mut() {
            object.remove("email");
        }
        let identity = provider.verify_id_token(&sign("k1", &claims)?).await?;
        assert_eq!(identity.email, "");
        Ok(())
    }

    #[tokio::test]
    async fn google_refreshes_keys_once_per_cooldown() -> anyhow::Result<()> {
        let google = FakeGoogle::start(&["k1"]).await?;
        let provider = google.provider(Duration::from_secs(5))?;
        let claims = id_token_claims(CLIENT_ID, "https://accounts.google.com");

        provider.verify_id_token(&sign("k1", &claims)?).await?;
        provider.verify_id_token(&sign("k1", &claims)?).await?;
        assert_eq!(google.fetches(), 1);

        // Rotated key published right after the last fetch: still cooling down.
        google.publish(&["k1", "k2"]);
        let rotated = sign("k2", &claims)?;
        let result = provider.verify_id_token(&rotated).await;
        assert!(matches!(result, Err(ProviderError::IdentityInvalid(_))));
        assert_eq!(google.fetches(), 1);

        provider.last_refresh_unix.store(0, Ordering::Relaxed);
        provider.verify_id_token(&rotated).await?;
        assert_eq!(google.fetches(), 2);

        provider.last_refresh_unix.store(0, Ordering::Relaxed);
        let unknown = sign("k9", &claims)?;
        for _ in 0..3 {
            let result = provider.verify_id_token(&unknown).await;
            assert!(matches!(result, Err(ProviderError::IdentityInvalid(_))));
        }
        assert_eq!(google.fetches(), 3);
        Ok(())
    }
}

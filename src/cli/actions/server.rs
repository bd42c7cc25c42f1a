use crate::{
    api::{
        self,
        handlers::auth::{AuthConfig, AuthState, GoogleProvider},
    },
    cli::commands::auth::Options,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub cors_origins: Vec<String>,
    pub auth: Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the auth configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_state = auth_state(args.auth)?;

    info!(
        env = auth_state.config().environment().as_str(),
        allowed_emails = auth_state.allow_list().len(),
        callback_response = ?auth_state.config().callback_response(),
        "auth configured"
    );
    if auth_state.allow_list().is_empty() {
        warn!("allow-list is empty, every login will be denied");
    }

    api::new(args.port, args.dsn, Arc::new(auth_state), args.cors_origins).await
}

/// Build the shared auth state: config, signer, allow-list and Google provider.
fn auth_state(options: Options) -> Result<AuthState> {
    let config = AuthConfig::new(options.oauth_redirect_url.clone())
        .with_environment(options.environment)
        .with_frontend_base_url(options.frontend_base_url)
        .with_post_login_redirect(options.post_login_redirect)
        .with_allowed_emails(options.allowed_emails)
        .with_cookie_domain(options.cookie_domain)
        .with_same_site_mode(options.same_site_mode)
        .with_cookie_partitioned(options.cookie_partitioned)
        .with_trust_forwarded_proto(options.trust_forwarded_proto)
        .with_redirect_allowed_hosts(options.redirect_allowed_hosts)
        .with_callback_response(options.callback_response)
        .with_session_ttl_seconds(options.session_ttl_seconds)
        .with_provider_timeout_seconds(options.provider_timeout_seconds);

    let provider = GoogleProvider::new(
        options.google_client_id,
        options.google_client_secret,
        options.oauth_redirect_url,
        config.provider_timeout(),
    )
    .context("Invalid identity provider settings")?;

    AuthState::new(config, &options.cookie_signing_key, Arc::new(provider))
        .context("Invalid auth configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        CallbackResponse,
        cookies::{Environment, SameSiteMode},
    };
    use secrecy::SecretString;

    fn options() -> Options {
        Options {
            environment: Environment::Prod,
            google_client_id: "client-id".to_string(),
            google_client_secret: SecretString::from("client-secret".to_string()),
            oauth_redirect_url: "https://api.example.com/auth/callback".to_string(),
            allowed_emails: vec!["Owner@Example.com".to_string()],
            cookie_signing_key: SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            cookie_domain: None,
            same_site_mode: SameSiteMode::Auto,
            cookie_partitioned: false,
            trust_forwarded_proto: true,
            frontend_base_url: "https://app.example.com".to_string(),
            post_login_redirect: None,
            redirect_allowed_hosts: Vec::new(),
            callback_response: CallbackResponse::Html,
            session_ttl_seconds: 3600,
            provider_timeout_seconds: 5,
        }
    }

    #[test]
    fn builds_state_from_options() {
        let state = auth_state(options());
        assert!(state.is_ok());
        if let Ok(state) = state {
            assert_eq!(state.config().environment(), Environment::Prod);
            assert!(state.allow_list().contains("owner@example.com"));
            assert_eq!(state.session_ttl(), chrono::Duration::seconds(3600));
            assert_eq!(state.config().default_redirect(), "/");
        }
    }

    #[test]
    fn short_signing_key_is_fatal() {
        let mut options = options();
        options.cookie_signing_key = SecretString::from("too-short".to_string());
        let result = auth_state(options);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(format!("{err:#}").contains("at least 32 bytes"));
        }
    }

    #[test]
    fn ttl_above_twelve_hours_is_fatal() {
        let mut options = options();
        options.session_ttl_seconds = 43_201;
        assert!(auth_state(options).is_err());
    }

    #[test]
    fn empty_client_id_is_fatal() {
        let mut options = options();
        options.google_client_id = String::new();
        let result = auth_state(options);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(format!("{err:#}").contains("google-client-id"));
        }
    }
}

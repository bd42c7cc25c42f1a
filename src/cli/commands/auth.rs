use crate::api::handlers::auth::{
    CallbackResponse, ConfigError,
    cookies::{Environment, SameSiteMode},
};
use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ENV: &str = "env";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_OAUTH_REDIRECT_URL: &str = "oauth-redirect-url";
pub const ARG_ALLOWED_EMAILS: &str = "allowed-emails";
pub const ARG_COOKIE_SIGNING_KEY: &str = "cookie-signing-key";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_COOKIE_SAME_SITE: &str = "cookie-same-site";
pub const ARG_COOKIE_PARTITIONED: &str = "cookie-partitioned";
pub const ARG_TRUST_FORWARDED_PROTO: &str = "trust-forwarded-proto";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_POST_LOGIN_REDIRECT: &str = "post-login-redirect";
pub const ARG_REDIRECT_ALLOWED_HOSTS: &str = "redirect-allowed-hosts";
pub const ARG_CALLBACK_RESPONSE: &str = "callback-response";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PROVIDER_TIMEOUT_SECONDS: &str = "provider-timeout-seconds";

/// Auth, cookie and identity provider settings.
#[derive(Debug)]
pub struct Options {
    pub environment: Environment,
    pub google_client_id: String,
    pub google_client_secret: SecretString,
    pub oauth_redirect_url: String,
    pub allowed_emails: Vec<String>,
    pub cookie_signing_key: SecretString,
    pub cookie_domain: Option<String>,
    pub same_site_mode: SameSiteMode,
    pub cookie_partitioned: bool,
    pub trust_forwarded_proto: bool,
    pub frontend_base_url: String,
    pub post_login_redirect: Option<String>,
    pub redirect_allowed_hosts: Vec<String>,
    pub callback_response: CallbackResponse,
    pub session_ttl_seconds: i64,
    pub provider_timeout_seconds: u64,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or an enumerated value is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap lets empty env values through, treat them as unset
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |id: &str| {
            get_non_empty(id).ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };
        let list = |id: &str| -> Vec<String> {
            matches
                .get_many::<String>(id)
                .map(|values| {
                    values
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let environment = get_non_empty(ARG_ENV)
            .unwrap_or_default()
            .parse::<Environment>()
            .map_err(ConfigError::InvalidEnvironment)?;

        let same_site_mode = get_non_empty(ARG_COOKIE_SAME_SITE)
            .unwrap_or_else(|| "auto".to_string())
            .parse::<SameSiteMode>()
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("invalid --{ARG_COOKIE_SAME_SITE}"))?;

        let callback_response = get_non_empty(ARG_CALLBACK_RESPONSE)
            .unwrap_or_else(|| "html".to_string())
            .parse::<CallbackResponse>()?;

        Ok(Self {
            environment,
            google_client_id: required(ARG_GOOGLE_CLIENT_ID)?,
            google_client_secret: SecretString::from(required(ARG_GOOGLE_CLIENT_SECRET)?),
            oauth_redirect_url: required(ARG_OAUTH_REDIRECT_URL)?,
            allowed_emails: list(ARG_ALLOWED_EMAILS),
            cookie_signing_key: SecretString::from(required(ARG_COOKIE_SIGNING_KEY)?),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            same_site_mode,
            cookie_partitioned: matches.get_flag(ARG_COOKIE_PARTITIONED),
            trust_forwarded_proto: matches.get_flag(ARG_TRUST_FORWARDED_PROTO),
            frontend_base_url: required(ARG_FRONTEND_BASE_URL)?,
            post_login_redirect: get_non_empty(ARG_POST_LOGIN_REDIRECT),
            redirect_allowed_hosts: list(ARG_REDIRECT_ALLOWED_HOSTS),
            callback_response,
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(43_200),
            provider_timeout_seconds: matches
                .get_one::<u64>(ARG_PROVIDER_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(5),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_provider_args(command);
    let command = with_cookie_args(command);
    with_redirect_args(command)
}

fn with_provider_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENV)
                .long(ARG_ENV)
                .help("Deployment environment: local, dev, prod")
                .env("SALESDESK_ENV")
                .default_value("local"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id, also the expected ID token audience")
                .env("SALESDESK_GOOGLE_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("SALESDESK_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_OAUTH_REDIRECT_URL)
                .long(ARG_OAUTH_REDIRECT_URL)
                .help("Callback URL registered with the identity provider")
                .env("SALESDESK_OAUTH_REDIRECT_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ALLOWED_EMAILS)
                .long(ARG_ALLOWED_EMAILS)
                .help("Comma-separated list of emails allowed to sign in")
                .env("SALESDESK_ALLOWED_EMAILS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_PROVIDER_TIMEOUT_SECONDS)
                .long(ARG_PROVIDER_TIMEOUT_SECONDS)
                .help("Timeout for each identity provider call in seconds")
                .env("SALESDESK_PROVIDER_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SIGNING_KEY)
                .long(ARG_COOKIE_SIGNING_KEY)
                .help("HMAC key used to sign session cookies (at least 32 bytes)")
                .long_help(
                    "HMAC key used to sign session cookies (at least 32 bytes).\n\nChanging it invalidates every outstanding session.",
                )
                .env("SALESDESK_COOKIE_SIGNING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Parent domain for cookies, example: .example.com")
                .env("SALESDESK_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SAME_SITE)
                .long(ARG_COOKIE_SAME_SITE)
                .help("SameSite mode: auto, lax, none")
                .long_help(
                    "SameSite mode: auto, lax, none.\n\n`auto` picks None when the frontend and the API are on different sites and Lax otherwise. Set it explicitly when both share a public suffix such as github.io.",
                )
                .env("SALESDESK_COOKIE_SAME_SITE")
                .default_value("auto"),
        )
        .arg(
            Arg::new(ARG_COOKIE_PARTITIONED)
                .long(ARG_COOKIE_PARTITIONED)
                .help("Add Partitioned to SameSite=None cookies")
                .env("SALESDESK_COOKIE_PARTITIONED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_PROTO)
                .long(ARG_TRUST_FORWARDED_PROTO)
                .help("Honour X-Forwarded-Proto: https when deciding the Secure attribute")
                .env("SALESDESK_TRUST_FORWARDED_PROTO")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds (at most 43200)")
                .env("SALESDESK_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_redirect_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL")
                .env("SALESDESK_FRONTEND_BASE_URL")
                .default_value("http://localhost:5002"),
        )
        .arg(
            Arg::new(ARG_POST_LOGIN_REDIRECT)
                .long(ARG_POST_LOGIN_REDIRECT)
                .help("Default target after login when none was requested (default: /)")
                .env("SALESDESK_POST_LOGIN_REDIRECT"),
        )
        .arg(
            Arg::new(ARG_REDIRECT_ALLOWED_HOSTS)
                .long(ARG_REDIRECT_ALLOWED_HOSTS)
                .help("Comma-separated extra hosts accepted as post-login targets")
                .env("SALESDESK_REDIRECT_ALLOWED_HOSTS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_CALLBACK_RESPONSE)
                .long(ARG_CALLBACK_RESPONSE)
                .help("How the callback hands over to the frontend: html, redirect")
                .env("SALESDESK_CALLBACK_RESPONSE")
                .default_value("html"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [(&str, Option<&str>); 4] = [
        ("SALESDESK_GOOGLE_CLIENT_ID", Some("client-id")),
        ("SALESDESK_GOOGLE_CLIENT_SECRET", Some("client-secret")),
        (
            "SALESDESK_OAUTH_REDIRECT_URL",
            Some("http://localhost:8080/auth/callback"),
        ),
        (
            "SALESDESK_COOKIE_SIGNING_KEY",
            Some("0123456789abcdef0123456789abcdef"),
        ),
    ];

    /// Required variables with `overrides` replacing or extending them.
    fn env_with(
        overrides: &[(&'static str, Option<&'static str>)],
    ) -> Vec<(&'static str, Option<&'static str>)> {
        let mut vars: Vec<_> = REQUIRED
            .iter()
            .filter(|(key, _)| !overrides.iter().any(|(other, _)| other == key))
            .copied()
            .collect();
        vars.extend_from_slice(overrides);
        vars
    }

    fn parse() -> anyhow::Result<Options> {
        let matches = with_args(Command::new("salesdesk")).get_matches_from(vec!["salesdesk"]);
        Options::parse(&matches)
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(env_with(&[]), || {
            let options = parse();
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.environment, Environment::Local);
                assert_eq!(options.same_site_mode, SameSiteMode::Auto);
                assert_eq!(options.callback_response, CallbackResponse::Html);
                assert_eq!(options.frontend_base_url, "http://localhost:5002");
                assert_eq!(options.session_ttl_seconds, 43_200);
                assert_eq!(options.provider_timeout_seconds, 5);
                assert!(options.allowed_emails.is_empty());
                assert!(options.cookie_domain.is_none());
                assert!(!options.cookie_partitioned);
                assert!(!options.trust_forwarded_proto);
            }
        });
    }

    #[test]
    fn lists_and_flags_from_env() {
        let vars = env_with(&[
            ("SALESDESK_ALLOWED_EMAILS", Some("a@x.com, B@x.com,,")),
            ("SALESDESK_REDIRECT_ALLOWED_HOSTS", Some("app.example.com")),
            ("SALESDESK_COOKIE_PARTITIONED", Some("true")),
            ("SALESDESK_TRUST_FORWARDED_PROTO", Some("true")),
            ("SALESDESK_ENV", Some("production")),
            ("SALESDESK_CALLBACK_RESPONSE", Some("redirect")),
            ("SALESDESK_COOKIE_SAME_SITE", Some("none")),
        ]);
        temp_env::with_vars(vars, || {
            let options = parse();
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.allowed_emails, vec!["a@x.com", "B@x.com"]);
                assert_eq!(options.redirect_allowed_hosts, vec!["app.example.com"]);
                assert!(options.cookie_partitioned);
                assert!(options.trust_forwarded_proto);
                assert_eq!(options.environment, Environment::Prod);
                assert_eq!(options.callback_response, CallbackResponse::Redirect);
                assert_eq!(options.same_site_mode, SameSiteMode::None);
            }
        });
    }

    #[test]
    fn unknown_environment_is_rejected() {
        temp_env::with_vars(env_with(&[("SALESDESK_ENV", Some("qa"))]), || {
            let result = parse();
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("invalid environment"));
            }
        });
    }

    #[test]
    fn unknown_callback_response_is_rejected() {
        temp_env::with_vars(
            env_with(&[("SALESDESK_CALLBACK_RESPONSE", Some("json"))]),
            || {
                assert!(parse().is_err());
            },
        );
    }

    #[test]
    fn blank_client_secret_is_missing() {
        temp_env::with_vars(
            env_with(&[("SALESDESK_GOOGLE_CLIENT_SECRET", Some("  "))]),
            || {
                let result = parse();
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(
                        err.to_string()
                            .contains("missing required argument: --google-client-secret")
                    );
                }
            },
        );
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        temp_env::with_vars(env_with(&[]), || {
            let options = parse();
            assert!(options.is_ok());
            if let Ok(options) = options {
                let debug = format!("{options:?}");
                assert!(!debug.contains("client-secret"));
                assert!(!debug.contains("0123456789abcdef"));
            }
        });
    }
}

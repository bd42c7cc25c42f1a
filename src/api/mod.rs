use crate::{
    GIT_COMMIT_HASH,
    api::handlers::{auth, health, root},
    cli::telemetry,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, options},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";
const CORS_MAX_AGE_SECONDS: u64 = 300;

/// Start the server
/// # Errors
/// Return error if the database pool, the router or the listener cannot be set up
pub async fn new(
    port: u16,
    dsn: String,
    auth_state: Arc<auth::AuthState>,
    cors_origins: Vec<String>,
) -> Result<()> {
    // Lazy so the service starts (and /health reports 503) while the database is down.
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(Duration::from_secs(3))
        .test_before_acquire(true)
        .connect_lazy(&dsn)
        .context("Invalid database connection string")?;

    let app = app(auth_state, pool, &cors_origins, Router::new())?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    telemetry::shutdown_tracer();

    Ok(())
}

/// Build the full router.
///
/// `protected` carries the collaborator routes (clients, sales, contracts,
/// stages, reports); they are nested under `/api` next to `/api/me` and only
/// run when the session guard accepts the request.
///
/// # Errors
/// Returns an error if a configured origin or the `X-App` header is invalid.
pub fn app(
    auth_state: Arc<auth::AuthState>,
    pool: PgPool,
    cors_origins: &[String],
    protected: Router,
) -> Result<Router> {
    let cors = cors_layer(auth_state.config().frontend_base_url(), cors_origins)?;

    let (documented, _) = openapi::protected_router().split_for_parts();
    // The fallback keeps unknown `/api` paths behind the guard too.
    let protected = documented
        .merge(protected)
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_session,
        ));

    // Build the router from OpenAPI-wired routes, then extend it with non-doc routes like `/`,
    // the provider-console aliases and preflight-only `OPTIONS /health`.
    let (router, _openapi) = openapi::api_router().split_for_parts();
    let mut app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .route("/auth/google", get(auth::login::login))
        .route("/auth/google/callback", get(auth::callback::callback))
        .nest("/api", protected);

    if auth_state.config().environment().is_local() {
        app = app
            .route("/dev/login-as", get(auth::dev::login_as))
            .route("/debug/cookies", get(auth::dev::debug_cookies));
    }

    let app = app
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-app"),
                    x_app_header()?,
                ))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// `name:version:short-commit`, attached to every response.
fn x_app_header() -> Result<HeaderValue> {
    let short_hash = GIT_COMMIT_HASH.get(..7).unwrap_or(GIT_COMMIT_HASH);
    HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    ))
    .context("Failed to build X-App header")
}

fn cors_layer(frontend_base_url: &str, cors_origins: &[String]) -> Result<CorsLayer> {
    let origins = if cors_origins.is_empty() {
        vec![origin(frontend_base_url)?]
    } else {
        cors_origins
            .iter()
            .map(|value| origin(value))
            .collect::<Result<Vec<_>>>()?
    };

    Ok(CorsLayer::new()
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECONDS)))
}

/// Reduce a URL to its `scheme://host[:port]` origin.
fn origin(url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(url.trim()).with_context(|| format!("Invalid origin URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin URL must include a valid host: {url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

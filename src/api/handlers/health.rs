use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;
use axum::{
    extract::Extension,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct Health {
    ok: bool,
    env: &'static str,
    status: &'static str,
    name: &'static str,
    version: &'static str,
    commit: &'static str,
    database: &'static str,
}

impl Health {
    fn new(env: &'static str, database_ok: bool) -> Self {
        Self {
            ok: database_ok,
            env,
            status: if database_ok { "ok" } else { "degraded" },
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            commit: GIT_COMMIT_HASH,
            database: if database_ok { "ok" } else { "error" },
        }
    }

    fn status_code(&self) -> StatusCode {
        if self.ok {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Acquire a pooled connection and ping it.
async fn database_reachable(pool: &PgPool) -> bool {
    let acquired = pool
        .acquire()
        .instrument(info_span!("db.acquire", db.system = "postgresql"))
        .await;
    let mut conn = match acquired {
        Ok(conn) => conn,
        Err(err) => {
            error!("Failed to acquire database connection: {err}");
            return false;
        }
    };
    match conn
        .ping()
        .instrument(info_span!("db.ping", db.system = "postgresql"))
        .await
    {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err}");
            false
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    method: Method,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Response {
    let health = Health::new(
        auth_state.config().environment().as_str(),
        database_reachable(&pool).await,
    );
    debug!(database = health.database, "health check");

    let status = health.status_code();
    // Preflight and HEAD probes only need the status.
    if method == Method::GET {
        (status, Json(health)).into_response()
    } else {
        status.into_response()
    }
}

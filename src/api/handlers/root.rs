use axum::{http::header::CONTENT_TYPE, response::IntoResponse};

/// Plain `ok` so load balancer probes on `/` do not see a 404/405.
pub async fn root() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain; charset=utf-8")], "ok")
}

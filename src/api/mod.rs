use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::rotation::RotationHandler;

pub mod handlers;

/// Build the invocation router: `POST /rotate` runs one phase,
/// `GET /healthz` answers liveness probes.
pub fn router(handler: Arc<RotationHandler>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/rotate", post(handlers::rotate))
        .with_state(handler)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http()),
        )
}

/// Injects a unique X-Request-Id into every response so platform retries
/// can be correlated with log lines.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %req_id);
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

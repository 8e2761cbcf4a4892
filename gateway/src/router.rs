use std::future::ready;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::prometheus::{setup_metrics_recorder, track_metrics};

/// Shared state handed to the domain handlers mounted on this router.
#[derive(Clone)]
pub struct State {
    pub pool: PgPool,
}

/// Readiness probe; 200 while serving, 503 as soon as shutdown has
/// begun so load-balancers stop routing new traffic here.
#[derive(Clone)]
pub struct ReadinessHandler {
    shutdown: CancellationToken,
}

impl ReadinessHandler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    pub fn check(&self) -> StatusCode {
        if self.shutdown.is_cancelled() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    }
}

async fn index() -> &'static str {
    "gateway"
}

pub fn router(
    pool: PgPool,
    liveness: HealthRegistry,
    readiness: ReadinessHandler,
    metrics: bool,
) -> Router {
    let state = State { pool };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || ready(readiness.check())))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when gateway is used as a library (during tests etc)
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flips_once_shutdown_begins() {
        let token = CancellationToken::new();
        let readiness = ReadinessHandler::new(token.clone());

        assert_eq!(readiness.check(), StatusCode::OK);
        token.cancel();
        assert_eq!(readiness.check(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use netbackup_core::health::HealthSnapshot;
use tower_http::trace::TraceLayer;

use crate::health::HealthState;

#[derive(Clone)]
pub struct AppState {
    health: HealthState,
}

pub fn router(health: HealthState) -> Router {
    let state = AppState { health };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 200 while cycles keep finishing inside the stale window, 503 once stalled.
async fn healthz(State(st): State<AppState>) -> (StatusCode, &'static str) {
    if st.health.snapshot().await.liveness.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stalled")
    }
}

async fn status(State(st): State<AppState>) -> Json<HealthSnapshot> {
    Json(st.health.snapshot().await)
}

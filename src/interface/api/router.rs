//! API Router configuration

use super::relay::{relay_handler, RelayState};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the relay router
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/signaling/:room", get(relay_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.room_count().await,
    }))
}

/// Serve the relay on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Signaling relay listening on {}", addr);
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_rooms() {
        let state = Arc::new(RelayState::new(8));
        let _rx = state.join("lobby", uuid::Uuid::new_v4()).await;

        let Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 1);
    }
}

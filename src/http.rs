//! # HTTP Endpoint
//!
//! Read-only JSON views for local consumers:
//!
//! | Route   | Body                                   |
//! |---------|----------------------------------------|
//! | `/`     | [`StatusReport`] including queue depth |
//! | `/data` | Latest-state cache contents            |
//!
//! Handlers copy the shared state and never hold a lock across an await.

use axum::{extract::State, response::Json, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::cache::LatestState;
use crate::error::Result;
use crate::queue::OfflineQueue;
use crate::status::StatusReport;
use crate::telemetry::SensorSnapshot;

/// Shared state behind the routes
#[derive(Debug, Clone)]
pub struct ApiState {
    pub cache: Arc<LatestState>,
    pub queue: Arc<OfflineQueue>,
    pub bus_type: Arc<str>,
}

/// Build the router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/data", get(latest_data))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status(State(state): State<ApiState>) -> Json<StatusReport> {
    Json(StatusReport::capture(&state.cache, &state.queue, &state.bus_type))
}

async fn latest_data(State(state): State<ApiState>) -> Json<SensorSnapshot> {
    Json(state.cache.read())
}

/// Serve `app` on an already bound listener until the task is aborted
///
/// # Errors
///
/// Returns error if accepting connections fails
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bind `addr` and serve the endpoint
///
/// # Errors
///
/// Returns error if the address cannot be bound or the server stops
pub async fn run_http_server(addr: SocketAddr, state: ApiState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP endpoint listening on http://{}", listener.local_addr()?);
    serve(listener, router(state)).await
}

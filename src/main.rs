mod api;
mod archive;
mod batch;
mod compositor;
mod expansion;
mod fonts;
mod model;
mod openapi;
mod payload;
mod perf;
mod placement;
mod settings;
mod text_overlay;
mod util;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::sync::Semaphore;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub struct AppState {
    /// Single-flight gate for ZIP generation; the pipeline is memory-bound
    /// and two concurrent batches would double the peak footprint.
    pub batch_gate: Semaphore,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = std::env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("BACKEND_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let state = Arc::new(AppState {
        batch_gate: Semaphore::new(1),
    });

    let openapi = openapi::ApiDoc::openapi();

    let app = Router::new()
        // Swagger UI + OpenAPI schema
        .merge(SwaggerUi::new("/docs").url("/openapi.json", openapi))
        // API
        .route("/batch/generate", post(api::batch_generate))
        .route("/qr", post(api::single_qr))
        .route("/health", get(api::health))
        .layer(DefaultBodyLimit::max(api::MAX_BODY_BYTES))
        .with_state(state);

    let addr: SocketAddr = format!("{host}:{port}").parse().expect("bind addr");
    info!("Starting qr-batch-backend on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

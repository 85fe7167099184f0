use std::future::Future;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::api;
use super::sse::sse_handler;
use crate::{CastError, CastSwitch, Result};

pub struct HttpServer {
    switch: CastSwitch,
}

#[derive(Clone)]
pub struct AppState {
    pub switch: CastSwitch,
}

impl HttpServer {
    pub fn new(switch: CastSwitch) -> Self {
        Self { switch }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            switch: self.switch.clone(),
        };

        Router::new()
            .route("/health", get(health_check))
            .route("/events", get(sse_handler))
            .route("/api/state", get(api::get_state))
            .route("/api/casting", put(api::set_casting))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, bind: &str, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind((bind, port))
            .await
            .map_err(|e| CastError::Config(format!("Failed to bind to {}:{}: {}", bind, port, e)))?;
        info!("cast-switch HTTP server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "cast-switch",
            "version": env!("CARGO_PKG_VERSION"),
            "connection": state.switch.connection_state(),
        })),
    )
}

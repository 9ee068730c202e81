pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get},
};
use tokio::sync::watch;

use crate::config::{Config, Engine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/{address}/info", get(routes::stream_info))
        .route("/{address}/stream", get(routes::stream_redirect))
        .route("/{address}/signature", delete(routes::invalidate_signature))
        .with_state(state)
}

/// Run the HTTP server until `shutdown_rx` flips to `true`.
pub async fn run_server(
    addr: SocketAddr,
    engine: Arc<Engine>,
    config: Arc<Config>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(AppState { engine, config });

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use utoipa_swagger_ui::SwaggerUi;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Full application router: `/health`, the `/linera` API and its docs under `/api`.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", api::openapi()))
        .merge(api::health_router())
        .nest("/linera", api::router())
        .with_state(HttpState { orchestrator })
}

pub fn spawn_http_server(
    bind: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
) -> JoinHandle<Result<(), String>> {
    let app = router(orchestrator);
    tokio::spawn(async move {
        let result = serve(bind, app, shutdown_tx).await;
        if let Err(err) = &result {
            tracing::error!("http server error: {err}");
        }
        result
    })
}

pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr}: {e}"))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| format!("serve {addr}: {e}"))
}

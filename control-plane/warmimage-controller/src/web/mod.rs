use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use http::StatusCode;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Synced;

/// Reports ready once every cache has completed its initial list.
#[derive(Clone)]
pub struct Readiness {
    caches: Arc<Vec<Arc<dyn Synced>>>,
}

impl Readiness {
    pub fn new(caches: Vec<Arc<dyn Synced>>) -> Self {
        Self {
            caches: Arc::new(caches),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.caches.iter().all(|c| c.has_synced())
    }
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(
    addr: SocketAddr,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health endpoints listening on {}", addr);
    axum::serve(listener, router(readiness))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

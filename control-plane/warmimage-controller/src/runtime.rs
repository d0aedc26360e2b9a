use std::net::SocketAddr;

use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ControllerConfig;
use crate::controller::{Caches, run_controller};
use crate::web::{Readiness, run_http_server};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &ControllerConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate => info!("received SIGTERM"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    })
}

/// Start the controller and the health server; return once both have
/// stopped. A controller failure stops the health server too.
pub async fn run_all(client: Client, cfg: ControllerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let caches = Caches::new();
    let http = tokio::spawn(run_http_server(
        compute_http_addr(&cfg),
        Readiness::new(caches.synced()),
        shutdown.clone(),
    ));

    let result = run_controller(client, cfg, caches, shutdown.clone()).await;
    shutdown.cancel();
    let http_result = http.await?;
    signals.abort();

    result?;
    http_result
}

use std::net::SocketAddr;

use anyhow::Result;
use modelvault_core::{clear_ready, init_metrics, init_tracing, load_config, mark_not_live, mark_ready};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

mod api;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("model-registry")?;
    init_metrics();

    let cfg = load_config("model-registry")?;
    info!(?cfg, "config loaded");

    let manager = cfg.build_manager()?;
    let app = api::router(api::AppState::new(manager));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = TcpListener::bind(addr).await?;
    mark_ready();
    info!(%addr, backend = ?cfg.backend, "service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            clear_ready();
        })
        .await?;
    mark_not_live();
    info!("shutdown");
    Ok(())
}

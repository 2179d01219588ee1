//! Gateway server: introspect, materialize, load, serve; graceful shutdown
//! with a five-second drain window.

use datagate::{build_router, build_state, materialize, spawn_refresher, DEFAULT_REST_PREFIX};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg_dir = PathBuf::from(std::env::var("CFGS_DIR").unwrap_or_else(|_| "./cfgs".into()));
    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);

    let log_level = db_log_level(&cfg_dir);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("datagate={}", log_level).parse()?),
        )
        .init();

    // regenerate table configs and swagger documents from the live schemas
    materialize(&cfg_dir, DEFAULT_REST_PREFIX).await?;

    let state = build_state(&cfg_dir, port).await?;
    let cancel = CancellationToken::new();
    let refresher = spawn_refresher(
        state.clone(),
        state.config.base.total_cnt_interval,
        cancel.clone(),
    );

    let app = build_router(state.clone(), DEFAULT_REST_PREFIX);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(joined) => {
            if let Ok(Err(e)) = joined {
                tracing::error!(error = %e, "server error during shutdown");
            }
        }
        Err(_) => tracing::warn!("drain window elapsed, forcing exit"),
    }
    let _ = refresher.await;
    for (alias, adapter) in state.adapter_entries() {
        tracing::debug!(db = %alias, "closing adapter");
        adapter.close().await;
    }
    tracing::info!("server stopped");
    Ok(())
}

/// Peek at `_base.yaml` for the database log level before the full config
/// pipeline runs; defaults to info.
fn db_log_level(cfg_dir: &std::path::Path) -> String {
    std::fs::read_to_string(cfg_dir.join("_base.yaml"))
        .ok()
        .and_then(|text| serde_yaml::from_str::<datagate::config::BaseConfig>(&text).ok())
        .map(|base| base.db_log.level)
        .unwrap_or_else(|| "info".into())
}

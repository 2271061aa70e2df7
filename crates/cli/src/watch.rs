use anyhow::Result;
use ingest_core::config::AppConfig;
use ingest_core::pipeline::{BatchSummary, Pipeline};
use ingest_core::watcher::{FileWatcher, NotifyWatcher};
use std::future::Future;
use tracing::info;

/// Runs the ingestion loop against `watcher` until `shutdown` resolves.
pub async fn watch_with<W, F>(cfg: &AppConfig, watcher: &W, shutdown: F) -> Result<BatchSummary>
where
    W: FileWatcher + ?Sized,
    F: Future<Output = ()>,
{
    let pipeline = Pipeline::new(cfg).await?;
    let summary = pipeline.run(watcher, shutdown).await?;
    Ok(summary)
}

/// Watches the configured input directory until Ctrl-C.
pub async fn watch_until_ctrl_c(cfg: AppConfig) -> Result<BatchSummary> {
    let watcher = NotifyWatcher::from_config(&cfg.watch);
    info!(
        "watching {} ({:?} mode); press Ctrl-C to stop",
        cfg.paths.input_dir.display(),
        cfg.watch.mode
    );
    watch_with(&cfg, &watcher, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested, finishing in-flight work");
    })
    .await
}

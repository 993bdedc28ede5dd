use anyhow::Result;
use homedash_stats::*;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        url = %app_config.stream.url,
        "starting stats client"
    );

    let channel = channel::WsChannel::new(app_config.channel_config());
    let mut store = store::StatsStore::new(app_config.store_config(), channel);

    let updates = store.subscribe();
    let logger_handle = tokio::spawn(log_updates(updates));

    store.connect();
    if let Some(seconds) = app_config.stream.update_interval_secs
        && let Err(e) = store.set_update_interval(seconds)
    {
        tracing::warn!(error = %e, operation = "set_update_interval", "update interval not requested");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    store.run(shutdown_rx).await;
    store.dispose();
    let _ = logger_handle.await;
    Ok(())
}

/// Stand-in for a chart: logs what would be rendered.
async fn log_updates(mut updates: broadcast::Receiver<store::StoreUpdate>) {
    loop {
        match updates.recv().await {
            Ok(store::StoreUpdate::Sample(sample)) => tracing::debug!(
                timestamp = %sample.timestamp,
                cpu_percent = sample.cpu_percent,
                memory_percent = sample.memory_percent,
                disk_percent = ?sample.disk_percent,
                "sample"
            ),
            Ok(store::StoreUpdate::ConnectionChanged(state)) => {
                tracing::info!(state = ?state, "connection")
            }
            Ok(store::StoreUpdate::Error(e)) => tracing::warn!(error = %e, "stats error"),
            Ok(store::StoreUpdate::HistoryCleared) => tracing::debug!("history cleared"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("update subscriber lagged, skipped {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

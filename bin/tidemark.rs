use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use tidemark::{
    server, utils::days_ago_epoch, worker::readiness, IngestionScheduler, PostgresClient,
    RangeQueryEngine, Settings, SubgraphClient,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings =
        Settings::new().context("Failed to load configuration (config file / TIDEMARK_* env)")?;

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres.migrate().await?;

    let source = SubgraphClient::new(&settings.upstream)?;
    let initial_epoch = days_ago_epoch(Utc::now(), settings.ingestion.backfill_days);

    let (ready_signal, ready_waiter) = readiness::readiness();
    let scheduler = IngestionScheduler::new(
        source,
        postgres.clone(),
        settings.upstream.tokens.clone(),
        settings.upstream.page_size,
        &settings.ingestion,
        initial_epoch,
        ready_signal,
    );

    let cancellation_token = CancellationToken::new();
    let ingest_token = cancellation_token.child_token();
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(ingest_token).await {
            error!("Ingestion loop failed: {:#}", e);
        }
    });

    info!(
        "Prefetching {} tokens starting {} days back...",
        settings.upstream.tokens.len(),
        settings.ingestion.backfill_days
    );

    // Serve only once the backfill has caught up
    tokio::select! {
        ready = ready_waiter.wait() => {
            if !ready {
                anyhow::bail!("Ingestion stopped before prefetch completed");
            }
        },
        _ = shutdown_signal() => {
            info!("Shutdown requested during prefetch, exiting gracefully...");
            cancellation_token.cancel();
            let _ = ingest_handle.await;
            return Ok(());
        },
    }

    let engine = RangeQueryEngine::new(Arc::new(postgres.clone()));
    let server = server::build_server(&settings.server, engine, postgres)?;
    let server_handle = server.handle();
    tokio::pin!(server);

    info!("Service running. Press Ctrl+C to stop.");

    tokio::select! {
        res = &mut server => {
            if let Err(e) = res {
                error!("HTTP server stopped with error: {}", e);
            }
        },
        _ = shutdown_signal() => {
            info!("Stopping HTTP server...");
            server_handle.stop(true).await;
            let _ = server.await;
        },
    }

    // Cancel ingestion; an in-flight transaction is rolled back
    info!("Waiting for ingestion to stop...");
    cancellation_token.cancel();
    let _ = ingest_handle.await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
                    },
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, exiting gracefully...");
                    },
                }
                return;
            },
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xraygen_core::storage::{BlobStore, LocalBlobStore};
use xraygen_db::{JobQueue, MemoryJobQueue, MemoryStore, PgJobQueue, PgSessionStore, SessionStore};
use xraygen_events::EventBus;
use xraygen_renderer::http::HttpRendererFactory;
use xraygen_renderer::synthetic::SyntheticRendererFactory;
use xraygen_renderer::{PngCodec, RendererFactory, SniffingVolumeLoader};
use xraygen_worker::archive::ArtifactArchiver;
use xraygen_worker::cascade::CascadeDeleter;
use xraygen_worker::config::{LogFormat, WorkerConfig};
use xraygen_worker::dispatcher::JobDispatcher;
use xraygen_worker::runner::WorkerPool;
use xraygen_worker::watchdog::{StaffAlertSink, StuckJobDetector};
use xraygen_worker::PipelineContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "xraygen_worker=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    // --- Stores ---
    let (store, queue): (Arc<dyn SessionStore>, Arc<dyn JobQueue>) = match &config.database_url {
        Some(url) => {
            let pool = xraygen_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            xraygen_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            xraygen_db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Connected to database");
            (
                Arc::new(PgSessionStore::new(pool.clone())),
                Arc::new(PgJobQueue::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryJobQueue::new()))
        }
    };

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.blob_root));
    tracing::info!(blob_root = %config.blob_root.display(), "Blob store ready");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ev) => tracing::debug!(
                    group = %ev.group,
                    event_type = %ev.event.event_type,
                    session_id = %ev.event.session_id,
                    progress = ev.event.progress,
                    "Session event",
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ctx = PipelineContext::new(store.clone(), queue.clone(), blobs, event_bus);

    // --- Renderer ---
    let renderers: Arc<dyn RendererFactory> = match &config.renderer_url {
        Some(url) => {
            tracing::info!(renderer_url = %url, "Using HTTP render service");
            Arc::new(HttpRendererFactory::new(url.clone()))
        }
        None => {
            tracing::warn!("RENDERER_URL not set; using synthetic renderer");
            Arc::new(SyntheticRendererFactory::default())
        }
    };

    let dispatcher = JobDispatcher::new(
        ctx.clone(),
        Arc::new(SniffingVolumeLoader),
        renderers,
        Arc::new(PngCodec::new(config.thumbnail_max_edge)),
        Arc::new(Semaphore::new(config.max_render_contexts)),
    )
    .with_progress_interval(config.progress_min_interval);

    let pool = WorkerPool::new(
        queue,
        dispatcher,
        ArtifactArchiver::new(ctx.clone()),
        CascadeDeleter::new(ctx.clone()),
        config.worker_name.clone(),
    )
    .with_concurrency(config.worker_concurrency)
    .with_poll_interval(config.queue_poll_interval);
    pool.recover().await.context("Failed to requeue unfinished jobs")?;

    let detector = StuckJobDetector::new(
        store,
        Arc::new(StaffAlertSink::new(ctx.notifier.clone())),
        config.sample_budget,
        config.stuck_check_interval,
    );

    // --- Run ---
    let cancel = CancellationToken::new();
    let pool_handle = tokio::spawn(Arc::new(pool).run(cancel.clone()));
    let detector_cancel = cancel.clone();
    let detector_handle = tokio::spawn(async move { detector.run(detector_cancel).await });

    tracing::info!(worker = %config.worker_name, "Worker running");
    shutdown_signal().await;
    cancel.cancel();

    // The pool returns once in-flight jobs have finished.
    if let Err(e) = pool_handle.await {
        tracing::error!(error = %e, "Worker pool task panicked");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), detector_handle).await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use fixq_core::app::WorkerLoop;
use fixq_core::config::AppConfig;
use fixq_core::error::QueueResult;
use fixq_core::observability;
use fixq_core::queue::QueueFactory;
use fixq_server::{AppState, HttpProcessor, router};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "fixq-server failed");
        eprintln!("fixq-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> QueueResult<()> {
    let config = AppConfig::load()?;
    observability::init(&config.log);

    let backend = QueueFactory::open(&config).await?;
    let topics = config.queue.topics.clone();

    let worker = if config.worker.enabled {
        let processor = Arc::new(HttpProcessor::new(&config.processor)?);
        let handle = WorkerLoop::new(
            backend.clone(),
            processor,
            topics.clone(),
            config.worker.clone(),
        )
        .spawn();
        Some(handle)
    } else {
        info!("worker disabled; serving HTTP only");
        None
    };

    let app = router(AppState::new(backend.clone(), topics), &config.server);
    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| fixq_core::QueueError::config(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, backend = %backend.kind(), "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = served {
        warn!(error = %e, "http server stopped with error");
    }

    if let Some(worker) = worker {
        let stats = worker.shutdown_and_join().await;
        info!(?stats, "worker joined");
    }
    backend.close().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

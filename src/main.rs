use std::process::ExitCode;
use std::sync::Arc;

use assessment_engine::adaptive::{AdaptiveEngine, EngineConfig};
use assessment_engine::config::Config;
use assessment_engine::logging::init_tracing;
use assessment_engine::store::Store;
use assessment_engine::workers::WorkerManager;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(&config.log);
    tracing::info!("Starting assessment-engine");

    let store = match Store::open(&config.sled_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, path = %config.sled_path, "Failed to open sled database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = store.run_migrations() {
        tracing::error!(error = %e, "Failed to run migrations");
        return ExitCode::FAILURE;
    }

    let engine = match AdaptiveEngine::open(store.clone(), EngineConfig::from_env(&config.engine)) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise adaptive engine");
            return ExitCode::FAILURE;
        }
    };
    let context = engine.context().await;
    tracing::info!(context = ?context, "Adaptive engine ready");

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let worker_manager = WorkerManager::new(engine.clone(), shutdown_tx.subscribe(), &config.worker);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker_manager.start().await {
            tracing::error!(error = %e, "Worker manager failed");
        }
    });

    shutdown_signal(shutdown_tx).await;

    match worker_handle.await {
        Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        Ok(()) => tracing::info!("Worker manager exited normally"),
    }

    tracing::info!("Flushing store before exit");
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

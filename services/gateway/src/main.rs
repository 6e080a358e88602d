use anyhow::Result;
use gateway_service::{run_ticks, sample_fleet, spawn_event_logger, DispatchEngine};
use shared::logger::init_logger;
use shared::EngineConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load()?;
    init_logger(&config.log_format);

    let engine = Arc::new(DispatchEngine::from_config(config.clone()));
    for vehicle in sample_fleet() {
        engine.fleet().register(vehicle)?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let logger = spawn_event_logger(engine.bus().subscribe(), stop.clone());

    tracing::info!(
        units = engine.fleet().len(),
        tick_ms = config.tick_interval_ms,
        "RescueRoute engine started"
    );

    run_ticks(engine.clone(), config.tick_interval(), shutdown_signal()).await;

    stop.store(true, Ordering::Relaxed);
    let logged = logger.join().unwrap_or_default();
    tracing::info!(events = logged, stats = ?engine.stats(), "RescueRoute engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

//! Watchkeeper - Main Entry Point
//! Supervises the GPU telemetry bridge and runs blocking work on the worker pool

mod config;
mod logging;
mod preflight;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use config::{DaemonConfig, BRIDGE_ENV_ALLOWLIST};
use watchkeeper_core::application::{
    SupervisorEvent, TelemetryBridge, WorkerEvent, WorkerPool, WorkerWatchdog,
};
use watchkeeper_core::port::id_provider::UuidProvider;
use watchkeeper_core::port::time_provider::SystemTimeProvider;
use watchkeeper_core::port::TimeProvider;
use watchkeeper_infra_system::TokioProcessSpawner;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::from_env()?;

    // 2. Initialize logging
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref())?;
    info!("Watchkeeper v{} starting...", VERSION);
    info!(
        program = %config.bridge.program,
        interval_ms = config.interval_ms,
        heartbeat_timeout_ms = config.supervisor.heartbeat_timeout_ms,
        pool_size = config.pool.pool_size,
        "Configuration loaded"
    );

    // 3. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    let (stall_tx, mut stall_rx) = mpsc::unbounded_channel();
    let watchdog = Arc::new(
        WorkerWatchdog::new(config.watchdog.clone(), stall_tx, time_provider.clone())
            .context("Invalid watchdog configuration")?,
    );
    let watchdog_handle = watchdog.start();

    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();
    let pool = WorkerPool::new(
        config.pool.clone(),
        worker_tx,
        Some(watchdog.clone()),
        time_provider.clone(),
        id_provider,
    )
    .context("Failed to create worker pool")?;

    let spawner = Arc::new(
        TokioProcessSpawner::new(config.bridge.clone())
            .with_env_allowlist(BRIDGE_ENV_ALLOWLIST.iter().map(|v| v.to_string()).collect()),
    );
    let bridge = TelemetryBridge::new(config.supervisor.clone(), spawner, time_provider.clone())
        .context("Failed to create telemetry bridge")?;
    let mut bridge_events = bridge.subscribe();

    // 4. Start work
    pool.submit(
        "bridge-preflight",
        Some(PREFLIGHT_TIMEOUT),
        preflight::locate_bridge(config.bridge.program.clone()),
    );
    let state = bridge.start(config.interval_ms).await?;
    info!(state = %state, "Telemetry bridge started");
    info!("Press Ctrl+C to shutdown");

    // 5. Event loop until Ctrl+C
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Shutdown signal received. Exiting gracefully...");
                break;
            }
            Some(event) = worker_rx.recv() => log_worker_event(&event),
            Some(stall) = stall_rx.recv() => match pool.worker(&stall.worker_id) {
                Some(worker) => warn!(
                    worker_id = %stall.worker_id,
                    name = %worker.name,
                    status = %worker.status,
                    progress = worker.progress,
                    elapsed_ms = stall.elapsed_ms,
                    "Worker stalled"
                ),
                None => debug!(worker_id = %stall.worker_id, "Stall reported after worker finished"),
            },
            event = bridge_events.recv() => match event {
                Ok(event) => log_bridge_event(&event, &bridge),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Bridge event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("Bridge supervisor exited unexpectedly");
                    break;
                }
            },
        }
    }

    // 6. Graceful shutdown
    pool.shutdown();
    if let Err(e) = bridge.shutdown().await {
        warn!(error = %e, "Bridge supervisor already stopped");
    }
    watchdog_handle.stop().await;

    info!("Shutdown complete.");
    Ok(())
}

fn log_worker_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Started { worker_id } => debug!(worker_id = %worker_id, "Worker started"),
        WorkerEvent::Heartbeat { .. } => {}
        WorkerEvent::Progress { worker_id, percent } => {
            debug!(worker_id = %worker_id, percent = percent, "Worker progress")
        }
        WorkerEvent::Finished { worker_id, result } => {
            info!(worker_id = %worker_id, result = %result, "Worker result")
        }
        WorkerEvent::Failed { worker_id, message } => {
            warn!(worker_id = %worker_id, error = %message, "Worker error")
        }
        WorkerEvent::TimedOut {
            worker_id,
            elapsed_ms,
        } => warn!(worker_id = %worker_id, elapsed_ms = elapsed_ms, "Worker timed out"),
        WorkerEvent::Cancelled { worker_id } => info!(worker_id = %worker_id, "Worker cancelled"),
    }
}

fn log_bridge_event(event: &SupervisorEvent, bridge: &TelemetryBridge) {
    match event {
        SupervisorEvent::MetricsUpdated => {
            if let Some(metrics) = bridge.latest_metrics() {
                debug!(gpu_count = metrics.count, ts = ?metrics.ts, "GPU metrics updated");
            }
        }
        SupervisorEvent::StatusChanged(state) => {
            info!(state = %state, summary = state.describe(), "Telemetry status")
        }
        SupervisorEvent::Error(notice) if notice.is_fatal() => {
            error!(title = %notice.title, message = %notice.message, "Telemetry notice")
        }
        SupervisorEvent::Error(notice) => {
            warn!(title = %notice.title, message = %notice.message, "Telemetry notice")
        }
    }
}

// Telemetry Bridge Supervisor
//
// One actor task owns the child process, heartbeat deadline, failure record and
// state. `TelemetryBridge` is a cloneable handle: commands go in over mpsc,
// signals come out over the bus, state and metrics are readable through watch
// channels.

mod actor;
mod config;

pub use config::SupervisorConfig;

use crate::application::bus::Bus;
use crate::application::constants::SUPERVISOR_COMMAND_CAPACITY;
use crate::domain::{BridgeNotice, MetricsSnapshot, SupervisorState};
use crate::error::{AppError, Result};
use crate::port::{ProcessSpawner, TimeProvider};
use actor::SupervisorActor;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Signals published by the supervisor
///
/// Metrics and operational problems travel as distinct variants so a consumer
/// can tell new data apart from failures.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// The cached snapshot changed; pull it with `latest_metrics()`
    MetricsUpdated,
    StatusChanged(SupervisorState),
    Error(BridgeNotice),
}

pub(crate) enum Command {
    Start {
        interval_ms: u64,
        reply: oneshot::Sender<SupervisorState>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    FailuresInWindow {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the telemetry bridge supervisor
///
/// Dropping every clone stops the process and ends the supervisor task.
#[derive(Clone)]
pub struct TelemetryBridge {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SupervisorState>,
    metrics: watch::Receiver<Option<MetricsSnapshot>>,
    bus: Bus<SupervisorEvent>,
}

impl TelemetryBridge {
    /// Create a stopped supervisor and spawn its task on the current runtime
    pub fn new(
        config: SupervisorConfig,
        spawner: Arc<dyn ProcessSpawner>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::channel(SUPERVISOR_COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(SupervisorState::Stopped);
        let (metrics_tx, metrics) = watch::channel(None);
        let bus = Bus::new(config.bus_capacity);

        let actor = SupervisorActor::new(
            config,
            spawner,
            time_provider,
            state_tx,
            metrics_tx,
            bus.clone(),
        );
        tokio::spawn(actor.run(command_rx));

        Ok(Self {
            commands,
            state,
            metrics,
            bus,
        })
    }

    /// Spawn the bridge with `interval_ms` as its metrics interval
    ///
    /// No-op while a process is owned or once the breaker has opened, even
    /// after a later `stop`. Returns the state once the start was processed.
    pub async fn start(&self, interval_ms: u64) -> Result<SupervisorState> {
        if interval_ms == 0 {
            return Err(AppError::Validation("interval_ms must be > 0".to_string()));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { interval_ms, reply }).await?;
        rx.await.map_err(|_| gone())
    }

    /// Terminate the process (SIGTERM, then SIGKILL after the grace period)
    ///
    /// Safe to call repeatedly. Always ends in `Stopped`; a tripped breaker
    /// still refuses the next `start`.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| gone())
    }

    /// Failures recorded within the rolling window
    pub async fn failures_in_window(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FailuresInWindow { reply }).await?;
        rx.await.map_err(|_| gone())
    }

    /// Stop the process and end the supervisor task for every handle
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| gone())
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that always holds the current state
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Most recent metrics payload (overwritten on every metrics line)
    pub fn latest_metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.bus.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| gone())
    }
}

fn gone() -> AppError {
    AppError::SupervisorGone("bridge supervisor task has exited".to_string())
}

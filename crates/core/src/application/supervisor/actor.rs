// Supervisor actor - sole owner of the bridge process, timer and failure record

use super::{Command, SupervisorConfig, SupervisorEvent};
use crate::application::bus::Bus;
use crate::application::constants::MAX_LOGGED_LINE_LEN;
use crate::domain::{
    decode_line, BridgeMessage, BridgeNotice, FailureRecord, MetricsSnapshot, SupervisorState,
};
use crate::port::{BridgeProcess, ProcessSpawner, SpawnError, TimeProvider};
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub(super) struct SupervisorActor {
    config: SupervisorConfig,
    spawner: Arc<dyn ProcessSpawner>,
    time_provider: Arc<dyn TimeProvider>,
    state: SupervisorState,
    failures: FailureRecord,
    // Failure timestamps are millis since this instant; wall-clock jumps must not move the window
    origin: Instant,
    breaker_tripped: bool,
    child: Option<Box<dyn BridgeProcess>>,
    interval_ms: u64,
    deadline: Option<Instant>,
    state_tx: watch::Sender<SupervisorState>,
    metrics_tx: watch::Sender<Option<MetricsSnapshot>>,
    bus: Bus<SupervisorEvent>,
}

impl SupervisorActor {
    pub(super) fn new(
        config: SupervisorConfig,
        spawner: Arc<dyn ProcessSpawner>,
        time_provider: Arc<dyn TimeProvider>,
        state_tx: watch::Sender<SupervisorState>,
        metrics_tx: watch::Sender<Option<MetricsSnapshot>>,
        bus: Bus<SupervisorEvent>,
    ) -> Self {
        Self {
            failures: FailureRecord::new(config.failure_window_ms),
            origin: Instant::now(),
            breaker_tripped: false,
            config,
            spawner,
            time_provider,
            state: SupervisorState::Stopped,
            child: None,
            interval_ms: 0,
            deadline: None,
            state_tx,
            metrics_tx,
            bus,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Bridge supervisor task started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Start { interval_ms, reply }) => {
                        self.start(interval_ms).await;
                        let _ = reply.send(self.state);
                    }
                    Some(Command::Stop { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                    }
                    Some(Command::FailuresInWindow { reply }) => {
                        let _ = reply.send(self.failures.count(self.monotonic_millis()));
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    // Every handle dropped
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                read = next_line(&mut self.child) => self.on_read(read).await,
                _ = sleep_until_opt(self.deadline) => {
                    self.deadline = None;
                    let reason = format!(
                        "no heartbeat within {}ms",
                        self.config.heartbeat_timeout_ms
                    );
                    self.on_failure(reason).await;
                }
            }
        }
        debug!("Bridge supervisor task exited");
    }

    async fn start(&mut self, interval_ms: u64) {
        if self.state.has_process() {
            debug!(state = %self.state, "Bridge already started");
            return;
        }
        if self.breaker_tripped {
            warn!("Start ignored: telemetry disabled until the supervisor is recreated");
            return;
        }

        if interval_ms >= self.config.heartbeat_timeout_ms {
            warn!(
                interval_ms = interval_ms,
                heartbeat_timeout_ms = self.config.heartbeat_timeout_ms,
                "Metrics interval is not below the heartbeat timeout; expect false restarts"
            );
        }

        info!(interval_ms = interval_ms, "Starting telemetry bridge");
        self.interval_ms = interval_ms;
        self.set_state(SupervisorState::Starting);
        if let Err(e) = self.spawn_child().await {
            self.on_failure(format!("failed to spawn bridge: {}", e)).await;
        }
    }

    async fn stop(&mut self) {
        self.deadline = None;
        if let Some(mut child) = self.child.take() {
            info!(pid = ?child.pid(), "Stopping telemetry bridge");
            child.terminate(self.config.stop_grace()).await;
        }
        self.set_state(SupervisorState::Stopped);
    }

    fn monotonic_millis(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    async fn spawn_child(&mut self) -> Result<(), SpawnError> {
        let child = self.spawner.spawn(self.interval_ms).await?;
        info!(pid = ?child.pid(), interval_ms = self.interval_ms, "Bridge process spawned");
        self.child = Some(child);
        self.arm_deadline();
        Ok(())
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.config.heartbeat_timeout());
    }

    async fn on_read(&mut self, read: Option<io::Result<String>>) {
        match read {
            Some(Ok(line)) => self.on_line(&line),
            Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "Dropping undecodable bridge output");
            }
            Some(Err(e)) => {
                self.on_failure(format!("reading bridge stdout failed: {}", e))
                    .await;
            }
            None => self.on_failure("bridge process exited".to_string()).await,
        }
    }

    fn on_line(&mut self, line: &str) {
        let message = match decode_line(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, line = %preview(line), "Dropping malformed bridge line");
                return;
            }
        };

        match message {
            BridgeMessage::Heartbeat { .. } => {
                self.arm_deadline();
                if matches!(
                    self.state,
                    SupervisorState::Starting | SupervisorState::Degraded
                ) {
                    self.set_state(SupervisorState::Running);
                }
            }
            BridgeMessage::Metrics { gpus, count, ts } => {
                let snapshot =
                    MetricsSnapshot::new(gpus, count, ts, self.time_provider.now_millis());
                debug!(gpu_count = snapshot.count, "Bridge metrics received");
                self.metrics_tx.send_replace(Some(snapshot));
                self.bus.publish(SupervisorEvent::MetricsUpdated);
            }
            BridgeMessage::Error { msg, .. } => {
                warn!(message = %msg, "Bridge reported an error");
                self.bus
                    .publish(SupervisorEvent::Error(BridgeNotice::reported(msg)));
            }
            BridgeMessage::Unknown => {
                warn!(line = %preview(line), "Dropping bridge line with unknown type");
            }
        }
    }

    /// Record a failure, then either trip the breaker or restart at once
    ///
    /// Spawn errors during the restart loop are failures too, so repeated
    /// spawn errors reach the breaker without waiting for the timer.
    async fn on_failure(&mut self, mut reason: String) {
        loop {
            let in_window = self.failures.record(self.monotonic_millis());
            warn!(
                reason = %reason,
                failures_in_window = in_window,
                threshold = self.config.failure_threshold,
                "Bridge failure recorded"
            );

            self.deadline = None;
            if let Some(mut child) = self.child.take() {
                child.kill().await;
            }

            if in_window >= self.config.failure_threshold {
                error!(
                    failures_in_window = in_window,
                    window_ms = self.failures.window_ms(),
                    "Circuit breaker open: telemetry disabled until restart"
                );
                self.breaker_tripped = true;
                self.set_state(SupervisorState::BreakerOpen);
                let message = format!(
                    "{} ({} failures within {}s)",
                    reason,
                    in_window,
                    self.failures.window_ms() / 1000
                );
                self.bus
                    .publish(SupervisorEvent::Error(BridgeNotice::disabled(message)));
                return;
            }

            self.set_state(SupervisorState::Degraded);
            self.bus
                .publish(SupervisorEvent::Error(BridgeNotice::degraded(reason.clone())));

            match self.spawn_child().await {
                Ok(()) => return,
                Err(e) => reason = format!("failed to spawn bridge: {}", e),
            }
        }
    }

    fn set_state(&mut self, next: SupervisorState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "Bridge state changed");
        self.state = next;
        self.state_tx.send_replace(next);
        self.bus.publish(SupervisorEvent::StatusChanged(next));
    }
}

async fn next_line(child: &mut Option<Box<dyn BridgeProcess>>) -> Option<io::Result<String>> {
    match child {
        Some(child) => child.next_line().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(MAX_LOGGED_LINE_LEN) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

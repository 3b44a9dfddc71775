// Worker Watchdog - stall detection for in-process workers
//
// Worker threads (via heartbeat) and the poll timer both write the entry map,
// so it is guarded by a mutex. The watchdog only reports; policy is the caller's.

use crate::application::cancel::CancelToken;
use crate::application::constants::{
    DEFAULT_STALE_THRESHOLD_SECS, DEFAULT_WATCHDOG_POLL_INTERVAL_MS,
};
use crate::domain::WorkerId;
use crate::error::{AppError, Result};
use crate::port::TimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub poll_interval_ms: u64,
    pub default_stale_threshold_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_WATCHDOG_POLL_INTERVAL_MS,
            default_stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
        }
    }
}

impl WatchdogConfig {
    /// Poll interval must stay below a third of the default threshold
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be > 0".to_string()));
        }
        if !Self::bounds_latency(self.poll_interval_ms, self.default_stale_threshold_secs) {
            return Err(AppError::Config(format!(
                "poll interval {}ms must be below a third of the {}s stale threshold",
                self.poll_interval_ms, self.default_stale_threshold_secs
            )));
        }
        Ok(())
    }

    fn bounds_latency(poll_interval_ms: u64, threshold_secs: u64) -> bool {
        poll_interval_ms.saturating_mul(3) < threshold_secs.saturating_mul(1000)
    }
}

/// Per-worker liveness entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogEntry {
    pub worker_id: WorkerId,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub stale_threshold_secs: u64,
    /// Set once a stall was reported; cleared by the next heartbeat
    pub already_reported: bool,
}

impl WatchdogEntry {
    fn threshold_ms(&self) -> i64 {
        (self.stale_threshold_secs as i64).saturating_mul(1000)
    }
}

/// `worker_stalled(id, elapsed)` signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStalled {
    pub worker_id: WorkerId,
    pub elapsed_ms: i64,
}

/// Polls registered workers and reports silent ones once per stall episode
pub struct WorkerWatchdog {
    config: WatchdogConfig,
    entries: Mutex<HashMap<WorkerId, WatchdogEntry>>,
    events: mpsc::UnboundedSender<WorkerStalled>,
    time_provider: Arc<dyn TimeProvider>,
}

impl WorkerWatchdog {
    pub fn new(
        config: WatchdogConfig,
        events: mpsc::UnboundedSender<WorkerStalled>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Mutex::new(HashMap::new()),
            events,
            time_provider,
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<WorkerId, WatchdogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start observing a worker (`None` uses the configured default threshold)
    ///
    /// Re-registering an id resets its entry.
    pub fn register_worker(&self, worker_id: impl Into<WorkerId>, stale_threshold_secs: Option<u64>) {
        let worker_id = worker_id.into();
        let threshold = stale_threshold_secs.unwrap_or(self.config.default_stale_threshold_secs);
        if !WatchdogConfig::bounds_latency(self.config.poll_interval_ms, threshold) {
            warn!(
                worker_id = %worker_id,
                threshold_secs = threshold,
                poll_interval_ms = self.config.poll_interval_ms,
                "Stale threshold is not above three poll intervals; stall detection will lag"
            );
        }

        let now = self.time_provider.now_millis();
        debug!(worker_id = %worker_id, threshold_secs = threshold, "Watchdog registered worker");
        self.entries().insert(
            worker_id.clone(),
            WatchdogEntry {
                worker_id,
                registered_at: now,
                last_heartbeat: now,
                stale_threshold_secs: threshold,
                already_reported: false,
            },
        );
    }

    /// Record liveness; returns false for unknown workers
    pub fn heartbeat(&self, worker_id: &str) -> bool {
        let now = self.time_provider.now_millis();
        match self.entries().get_mut(worker_id) {
            Some(entry) => {
                if entry.already_reported {
                    info!(worker_id = %worker_id, "Stalled worker resumed heartbeats");
                }
                entry.last_heartbeat = now;
                entry.already_reported = false;
                true
            }
            None => false,
        }
    }

    /// Stop observing a worker; returns false if it was not registered
    pub fn unregister_worker(&self, worker_id: &str) -> bool {
        let removed = self.entries().remove(worker_id).is_some();
        if removed {
            debug!(worker_id = %worker_id, "Watchdog unregistered worker");
        }
        removed
    }

    pub fn entry(&self, worker_id: &str) -> Option<WatchdogEntry> {
        self.entries().get(worker_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Run one scan: emit `WorkerStalled` for newly stalled workers and return them
    pub fn check_now(&self) -> Vec<WorkerStalled> {
        let now = self.time_provider.now_millis();
        let stalled: Vec<WorkerStalled> = {
            let mut entries = self.entries();
            entries
                .values_mut()
                .filter_map(|entry| {
                    let elapsed_ms = now - entry.last_heartbeat;
                    if elapsed_ms > entry.threshold_ms() && !entry.already_reported {
                        entry.already_reported = true;
                        Some(WorkerStalled {
                            worker_id: entry.worker_id.clone(),
                            elapsed_ms,
                        })
                    } else {
                        None
                    }
                })
                .collect()
        };

        for stall in &stalled {
            warn!(
                worker_id = %stall.worker_id,
                elapsed_ms = stall.elapsed_ms,
                "Worker stalled: no heartbeat within threshold"
            );
            let _ = self.events.send(stall.clone());
        }
        stalled
    }

    /// Launch the recurring poll; stop it through the returned handle
    pub fn start(self: &Arc<Self>) -> WatchdogHandle {
        let token = CancelToken::new();
        let watchdog = Arc::clone(self);
        let stop = token.clone();
        let period = Duration::from_millis(self.config.poll_interval_ms);

        let join = tokio::spawn(async move {
            info!(poll_interval_ms = period.as_millis() as u64, "Worker watchdog started");
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tick.tick() => {
                        watchdog.check_now();
                    }
                }
            }
            info!("Worker watchdog stopped");
        });

        WatchdogHandle { token, join }
    }
}

/// Owner of the poll task
pub struct WatchdogHandle {
    token: CancelToken,
    join: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stop polling and wait for the poll task to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        let _ = (&mut self.join).await;
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

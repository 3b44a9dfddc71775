// Worker Pool - cancellable blocking work on a bounded thread pool

mod context;

pub use context::{TaskError, TaskResult, WorkerContext};

use context::Liveness;

use crate::application::cancel::CancelToken;
use crate::application::constants::DEFAULT_POOL_SIZE;
use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::application::watchdog::WorkerWatchdog;
use crate::domain::{Worker, WorkerId, WorkerStatus};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of task bodies running at once
    pub pool_size: usize,
    /// Watchdog threshold for pool workers (`None` = watchdog default)
    #[serde(default)]
    pub stale_threshold_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            stale_threshold_secs: None,
        }
    }
}

/// Signals delivered to the consumer's channel
///
/// Exactly one terminal event (`Finished`, `Failed`, `TimedOut`, `Cancelled`)
/// is sent per worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Started {
        worker_id: WorkerId,
    },
    Heartbeat {
        worker_id: WorkerId,
    },
    Progress {
        worker_id: WorkerId,
        percent: u8,
    },
    Finished {
        worker_id: WorkerId,
        result: serde_json::Value,
    },
    Failed {
        worker_id: WorkerId,
        message: String,
    },
    TimedOut {
        worker_id: WorkerId,
        elapsed_ms: i64,
    },
    Cancelled {
        worker_id: WorkerId,
    },
}

impl WorkerEvent {
    pub fn worker_id(&self) -> &str {
        match self {
            WorkerEvent::Started { worker_id }
            | WorkerEvent::Heartbeat { worker_id }
            | WorkerEvent::Progress { worker_id, .. }
            | WorkerEvent::Finished { worker_id, .. }
            | WorkerEvent::Failed { worker_id, .. }
            | WorkerEvent::TimedOut { worker_id, .. }
            | WorkerEvent::Cancelled { worker_id } => worker_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Finished { .. }
                | WorkerEvent::Failed { .. }
                | WorkerEvent::TimedOut { .. }
                | WorkerEvent::Cancelled { .. }
        )
    }
}

type BoxedTask = Box<dyn FnOnce(&WorkerContext) -> TaskResult + Send + 'static>;

/// Terminal outcome decided by a worker's monitor
enum Outcome {
    Finished(serde_json::Value),
    Failed(String),
    TimedOut(i64),
    Cancelled,
}

impl Outcome {
    fn status(&self) -> WorkerStatus {
        match self {
            Outcome::Finished(_) => WorkerStatus::Completed,
            Outcome::Failed(_) => WorkerStatus::Failed,
            Outcome::TimedOut(_) => WorkerStatus::TimedOut,
            Outcome::Cancelled => WorkerStatus::Cancelled,
        }
    }

    fn into_event(self, worker_id: WorkerId) -> WorkerEvent {
        match self {
            Outcome::Finished(result) => WorkerEvent::Finished { worker_id, result },
            Outcome::Failed(message) => WorkerEvent::Failed { worker_id, message },
            Outcome::TimedOut(elapsed_ms) => WorkerEvent::TimedOut {
                worker_id,
                elapsed_ms,
            },
            Outcome::Cancelled => WorkerEvent::Cancelled { worker_id },
        }
    }
}

struct Slot {
    worker: Worker,
    token: CancelToken,
}

struct PoolInner {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    registry: Mutex<HashMap<WorkerId, Slot>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    watchdog: Option<Arc<WorkerWatchdog>>,
    time_provider: Arc<dyn TimeProvider>,
    shut_down: AtomicBool,
}

/// Runs blocking task bodies on tokio's blocking threads, gated by a semaphore
///
/// The permit moves into the blocking closure, so a timed-out task that keeps
/// its thread also keeps its pool slot until it returns.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    id_provider: Arc<dyn IdProvider>,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a new worker pool
    ///
    /// # Arguments
    /// * `config` - Pool size and watchdog threshold
    /// * `events` - Consumer channel receiving every `WorkerEvent`
    /// * `watchdog` - Optional watchdog observing running workers
    /// * `time_provider` - Time provider for worker timestamps
    /// * `id_provider` - Worker ID generator
    ///
    /// Must be called inside a tokio runtime; `submit` may then be called from any thread.
    pub fn new(
        config: PoolConfig,
        events: mpsc::UnboundedSender<WorkerEvent>,
        watchdog: Option<Arc<WorkerWatchdog>>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(AppError::Config("pool_size must be > 0".to_string()));
        }
        let runtime = Handle::try_current().map_err(|e| {
            AppError::InvalidState(format!("worker pool requires a tokio runtime: {}", e))
        })?;

        info!(pool_size = config.pool_size, "Worker pool created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(config.pool_size)),
                config,
                registry: Mutex::new(HashMap::new()),
                events,
                watchdog,
                time_provider,
                shut_down: AtomicBool::new(false),
            }),
            id_provider,
            runtime,
        })
    }

    /// Submit blocking work; returns the new worker ID
    ///
    /// Arguments for the task are captured by the closure. `timeout` bounds
    /// wall-clock running time; when it elapses a `TimedOut` event is sent and
    /// the token is cancelled, but the thread is not preempted.
    pub fn submit<F>(&self, name: impl Into<String>, timeout: Option<Duration>, task: F) -> WorkerId
    where
        F: FnOnce(&WorkerContext) -> TaskResult + Send + 'static,
    {
        let worker_id = self.id_provider.generate_id();
        let name = name.into();
        let now = self.inner.time_provider.now_millis();
        let token = CancelToken::new();

        let worker = Worker::new(
            worker_id.clone(),
            name.clone(),
            now,
            timeout.map(|t| t.as_millis() as i64),
        );
        self.inner.registry().insert(
            worker_id.clone(),
            Slot {
                worker,
                token: token.clone(),
            },
        );

        info!(
            worker_id = %worker_id,
            name = %name,
            timeout_ms = ?timeout.map(|t| t.as_millis()),
            "Worker submitted"
        );

        let inner = Arc::clone(&self.inner);
        self.runtime
            .spawn(inner.monitor(worker_id.clone(), token, timeout, Box::new(task)));
        worker_id
    }

    /// Request cooperative cancellation; returns false for unknown/finished workers
    pub fn cancel(&self, worker_id: &str) -> bool {
        match self.inner.registry().get(worker_id) {
            Some(slot) => {
                info!(worker_id = %worker_id, status = %slot.worker.status, "Cancelling worker");
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Current status (`None` once the terminal signal was delivered)
    pub fn status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.inner.registry().get(worker_id).map(|s| s.worker.status)
    }

    /// Snapshot of the worker record
    pub fn worker(&self, worker_id: &str) -> Option<Worker> {
        self.inner.registry().get(worker_id).map(|s| s.worker.clone())
    }

    /// Workers submitted and not yet terminal
    pub fn active_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Pool slots not held by a task body
    pub fn available_slots(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Cancel every live worker and refuse further work
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = self.inner.registry();
        info!(active = registry.len(), "Worker pool shutting down");
        for slot in registry.values() {
            slot.token.cancel();
        }
        self.inner.permits.close();
    }
}

impl PoolInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<WorkerId, Slot>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive one worker from Pending to its single terminal event
    async fn monitor(
        self: Arc<Self>,
        worker_id: WorkerId,
        token: CancelToken,
        timeout: Option<Duration>,
        task: BoxedTask,
    ) {
        if self.shut_down.load(Ordering::SeqCst) {
            self.finish(&worker_id, Outcome::Failed("worker pool is shut down".to_string()));
            return;
        }

        // Pending: wait for a slot unless cancelled first
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.finish(&worker_id, Outcome::Cancelled);
                return;
            }
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(&worker_id, Outcome::Failed("worker pool is shut down".to_string()));
                    return;
                }
            },
        };

        if !self.mark_running(&worker_id) {
            return;
        }
        let started = Instant::now();

        let (liveness_tx, mut liveness_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext::new(worker_id.clone(), token.clone(), liveness_tx);
        let mut handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            execute_guarded(AssertUnwindSafe(move || task(&ctx)))
        });

        let deadline = timeout.map(|t| started + t);
        loop {
            tokio::select! {
                biased;
                Some(signal) = liveness_rx.recv() => self.on_liveness(&worker_id, signal),
                joined = &mut handle => {
                    // Forward anything emitted just before the body returned
                    while let Ok(signal) = liveness_rx.try_recv() {
                        self.on_liveness(&worker_id, signal);
                    }
                    let outcome = classify(joined, &token);
                    self.finish(&worker_id, outcome);
                    return;
                }
                _ = sleep_until_opt(deadline) => {
                    token.cancel();
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    warn!(
                        worker_id = %worker_id,
                        elapsed_ms = elapsed_ms,
                        "Worker timed out; task thread may remain occupied until it returns"
                    );
                    self.finish(&worker_id, Outcome::TimedOut(elapsed_ms));
                    return;
                }
            }
        }
    }

    fn mark_running(&self, worker_id: &str) -> bool {
        let now = self.time_provider.now_millis();
        {
            let mut registry = self.registry();
            let Some(slot) = registry.get_mut(worker_id) else {
                return false;
            };
            if let Err(e) = slot.worker.start(now) {
                error!(worker_id = %worker_id, error = %e, "Worker could not start");
                return false;
            }
        }

        if let Some(watchdog) = &self.watchdog {
            watchdog.register_worker(worker_id, self.config.stale_threshold_secs);
        }
        debug!(worker_id = %worker_id, "Worker running");
        self.emit(WorkerEvent::Started {
            worker_id: worker_id.to_string(),
        });
        true
    }

    fn on_liveness(&self, worker_id: &str, signal: Liveness) {
        let now = self.time_provider.now_millis();
        let progress = match signal {
            Liveness::Heartbeat => None,
            Liveness::Progress(pct) => Some(pct),
        };
        if let Some(slot) = self.registry().get_mut(worker_id) {
            slot.worker.heartbeat(now, progress);
        }
        if let Some(watchdog) = &self.watchdog {
            watchdog.heartbeat(worker_id);
        }

        let worker_id = worker_id.to_string();
        self.emit(match progress {
            None => WorkerEvent::Heartbeat { worker_id },
            Some(percent) => WorkerEvent::Progress { worker_id, percent },
        });
    }

    /// Emit the terminal event and drop the worker record
    fn finish(&self, worker_id: &str, outcome: Outcome) {
        let now = self.time_provider.now_millis();
        let Some(mut slot) = self.registry().remove(worker_id) else {
            return;
        };
        if let Err(e) = slot.worker.finish(outcome.status(), now) {
            error!(worker_id = %worker_id, error = %e, "Rejected second terminal transition");
            return;
        }
        if let Some(watchdog) = &self.watchdog {
            watchdog.unregister_worker(worker_id);
        }

        match &outcome {
            Outcome::Finished(_) => info!(worker_id = %worker_id, "Worker finished"),
            Outcome::Failed(message) => {
                error!(worker_id = %worker_id, error = %message, "Worker failed")
            }
            Outcome::TimedOut(_) => {}
            Outcome::Cancelled => info!(worker_id = %worker_id, "Worker cancelled"),
        }
        self.emit(outcome.into_event(slot.worker.id));
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("Worker event dropped: consumer channel closed");
        }
    }
}

fn classify(
    joined: std::result::Result<PanicGuardResult<TaskResult>, JoinError>,
    token: &CancelToken,
) -> Outcome {
    match joined {
        Err(join_err) => Outcome::Failed(format!("worker thread aborted: {}", join_err)),
        Ok(PanicGuardResult::Panicked(msg)) => Outcome::Failed(format!("task panicked: {}", msg)),
        Ok(PanicGuardResult::Success(Err(TaskError::Cancelled))) => Outcome::Cancelled,
        // A result produced after cancellation was requested is discarded
        Ok(PanicGuardResult::Success(_)) if token.is_cancelled() => Outcome::Cancelled,
        Ok(PanicGuardResult::Success(Ok(value))) => Outcome::Finished(value),
        Ok(PanicGuardResult::Success(Err(TaskError::Failed(msg)))) => Outcome::Failed(msg),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

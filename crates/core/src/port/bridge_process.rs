// Bridge Process Port
// Abstraction over the external telemetry worker process

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Placeholder substituted with the metrics interval in `BridgeCommand::args`
pub const INTERVAL_PLACEHOLDER: &str = "{interval_ms}";

/// How to launch the bridge process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BridgeCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Build argv for one spawn
    ///
    /// Every `{interval_ms}` placeholder is replaced; without a placeholder the
    /// interval is appended as the last argument.
    pub fn build_args(&self, interval_ms: u64) -> Vec<String> {
        let interval = interval_ms.to_string();
        if self.args.iter().any(|a| a.contains(INTERVAL_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|arg| arg.replace(INTERVAL_PLACEHOLDER, &interval))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(interval);
            args
        }
    }
}

/// Spawn errors (counted exactly like heartbeat failures by the supervisor)
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl SpawnError {
    /// Classify an OS error raised while spawning `program`
    pub fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SpawnError::PermissionDenied(program.to_string())
            }
            _ => SpawnError::Io(format!("{}: {}", program, err)),
        }
    }
}

/// Process spawner trait
///
/// Implementations:
/// - TokioProcessSpawner (infra-system): real child process
/// - ScriptedSpawner (mocks): in-memory process driven by tests
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Launch one bridge process emitting metrics every `interval_ms`
    async fn spawn(&self, interval_ms: u64) -> Result<Box<dyn BridgeProcess>, SpawnError>;
}

/// A live bridge process owned by the supervisor
#[async_trait]
pub trait BridgeProcess: Send {
    /// OS process ID (if any)
    fn pid(&self) -> Option<u32>;

    /// Next stdout line without its terminator; `None` once stdout is closed
    ///
    /// Must be cancel safe: the supervisor polls it inside `select!`.
    async fn next_line(&mut self) -> Option<std::io::Result<String>>;

    /// Graceful stop: SIGTERM, then SIGKILL once `grace` has elapsed
    async fn terminate(&mut self, grace: Duration);

    /// Immediate forceful kill (hung or crashed process)
    async fn kill(&mut self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Test-side handle to one scripted process
    #[derive(Clone)]
    pub struct ProcessController {
        tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
        terminated: Arc<AtomicBool>,
        pub interval_ms: u64,
    }

    impl ProcessController {
        /// Emit one stdout line; returns false once the process is gone
        pub fn send_line(&self, line: impl Into<String>) -> bool {
            match self.tx.lock().unwrap().as_ref() {
                Some(tx) => tx.send(line.into()).is_ok(),
                None => false,
            }
        }

        pub fn heartbeat(&self) -> bool {
            self.send_line(r#"{"type":"heartbeat","ts":0.0}"#)
        }

        /// Close stdout (simulates a crash / exit)
        pub fn close(&self) {
            self.tx.lock().unwrap().take();
        }

        pub fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct ScriptedState {
        failures: VecDeque<SpawnError>,
        processes: Vec<ProcessController>,
    }

    /// In-memory spawner; every spawned process is driven through a controller
    #[derive(Clone, Default)]
    pub struct ScriptedSpawner {
        state: Arc<Mutex<ScriptedState>>,
    }

    impl ScriptedSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next spawn attempt fail with `err`
        pub fn fail_next(&self, err: SpawnError) {
            self.state.lock().unwrap().failures.push_back(err);
        }

        /// Number of successfully spawned processes
        pub fn spawn_count(&self) -> usize {
            self.state.lock().unwrap().processes.len()
        }

        pub fn process(&self, index: usize) -> Option<ProcessController> {
            self.state.lock().unwrap().processes.get(index).cloned()
        }

        pub fn latest(&self) -> Option<ProcessController> {
            self.state.lock().unwrap().processes.last().cloned()
        }
    }

    #[async_trait]
    impl ProcessSpawner for ScriptedSpawner {
        async fn spawn(&self, interval_ms: u64) -> Result<Box<dyn BridgeProcess>, SpawnError> {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let terminated = Arc::new(AtomicBool::new(false));
            let controller = ProcessController {
                tx: Arc::new(Mutex::new(Some(tx))),
                terminated: Arc::clone(&terminated),
                interval_ms,
            };
            let pid = state.processes.len() as u32 + 1;
            state.processes.push(controller);

            Ok(Box::new(ScriptedProcess {
                pid,
                rx,
                terminated,
            }))
        }
    }

    struct ScriptedProcess {
        pid: u32,
        rx: mpsc::UnboundedReceiver<String>,
        terminated: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BridgeProcess for ScriptedProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn next_line(&mut self) -> Option<std::io::Result<String>> {
            self.rx.recv().await.map(Ok)
        }

        async fn terminate(&mut self, _grace: Duration) {
            self.kill().await;
        }

        async fn kill(&mut self) {
            self.terminated.store(true, Ordering::SeqCst);
            self.rx.close();
        }
    }
}

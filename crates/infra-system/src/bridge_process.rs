// Bridge process adapter: tokio child process with line-framed stdout
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use watchkeeper_core::port::{BridgeCommand, BridgeProcess, ProcessSpawner, SpawnError};

/// Spawns the telemetry bridge as a real OS process
pub struct TokioProcessSpawner {
    command: BridgeCommand,
    env_allowlist: Option<Vec<String>>,
}

impl TokioProcessSpawner {
    pub fn new(command: BridgeCommand) -> Self {
        Self {
            command,
            env_allowlist: None,
        }
    }

    /// Only pass these environment variables through to the bridge
    ///
    /// # Example
    /// ```ignore
    /// let spawner = TokioProcessSpawner::new(BridgeCommand::new("gpu-bridge"))
    ///     .with_env_allowlist(vec!["PATH".to_string(), "HOME".to_string()]);
    /// ```
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = Some(allowlist);
        self
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, interval_ms: u64) -> Result<Box<dyn BridgeProcess>, SpawnError> {
        let args = self.command.build_args(interval_ms);

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(allowlist) = &self.env_allowlist {
            cmd.env_clear()
                .envs(std::env::vars().filter(|(key, _)| allowlist.contains(key)));
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&self.command.program, e))?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Io("bridge stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid = ?pid, line = %line, "Bridge stderr");
                }
            });
        }

        info!(
            program = %self.command.program,
            args = ?args,
            pid = ?pid,
            "Spawned bridge process"
        );

        Ok(Box::new(ChildProcess {
            child,
            pid,
            stdout: BufReader::new(stdout).lines(),
        }))
    }
}

struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl BridgeProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn next_line(&mut self) -> Option<std::io::Result<String>> {
        // Lines::next_line is cancel safe
        self.stdout.next_line().await.transpose()
    }

    /// SIGTERM first, SIGKILL once `grace` has elapsed
    async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            // None once the child has been reaped
            if let Some(pid) = self.child.id() {
                debug!(pid = pid, "Sending SIGTERM to bridge");
                match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => match tokio::time::timeout(grace, self.child.wait()).await {
                        Ok(Ok(status)) => {
                            info!(pid = pid, status = %status, "Bridge exited after SIGTERM");
                            return;
                        }
                        Ok(Err(e)) => warn!(pid = pid, error = %e, "Waiting for bridge failed"),
                        Err(_) => warn!(
                            pid = pid,
                            grace_ms = grace.as_millis() as u64,
                            "Bridge ignored SIGTERM, sending SIGKILL"
                        ),
                    },
                    Err(e) => warn!(pid = pid, error = %e, "SIGTERM failed"),
                }
            }
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.kill().await;
    }

    async fn kill(&mut self) {
        // Child::kill sends SIGKILL and reaps
        match self.child.kill().await {
            Ok(()) => debug!(pid = ?self.pid, "Bridge killed"),
            Err(e) => debug!(pid = ?self.pid, error = %e, "Bridge already gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio_test::assert_ok;

    fn sh(script: &str) -> TokioProcessSpawner {
        TokioProcessSpawner::new(BridgeCommand::new("sh").with_args(["-c", script]))
    }

    #[tokio::test]
    async fn test_interval_reaches_process() {
        // The interval is appended and becomes $0 of the script
        let spawner = sh(r#"echo "interval=$0""#);
        let mut process = assert_ok!(spawner.spawn(250).await);
        assert!(process.pid().is_some());

        assert_eq!(assert_ok!(process.next_line().await.unwrap()), "interval=250");
        assert!(process.next_line().await.is_none(), "EOF after exit");
    }

    #[tokio::test]
    async fn test_stderr_is_not_mixed_into_stdout() {
        let spawner = sh("echo oops >&2; echo '{\"type\":\"heartbeat\"}'");
        let mut process = assert_ok!(spawner.spawn(1000).await);
        assert_eq!(
            assert_ok!(process.next_line().await.unwrap()),
            r#"{"type":"heartbeat"}"#
        );
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let spawner = TokioProcessSpawner::new(BridgeCommand::new("/nonexistent/gpu-bridge"));
        let err = spawner.spawn(1000).await.err().unwrap();
        assert!(matches!(err, SpawnError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminate_stops_cooperative_process() {
        let spawner = sh("sleep 30");
        let mut process = assert_ok!(spawner.spawn(1000).await);

        let begun = Instant::now();
        process.terminate(Duration::from_secs(2)).await;
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(process.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let spawner = sh("trap '' TERM; echo ready; while true; do sleep 0.1; done");
        let mut process = assert_ok!(spawner.spawn(1000).await);
        assert_eq!(assert_ok!(process.next_line().await.unwrap()), "ready");

        let begun = Instant::now();
        process.terminate(Duration::from_millis(300)).await;
        let waited = begun.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_env_allowlist_filters_variables() {
        std::env::set_var("WATCHKEEPER_TEST_SECRET", "hunter2");
        let spawner = TokioProcessSpawner::new(BridgeCommand::new("sh").with_args([
            "-c",
            r#"echo "${WATCHKEEPER_TEST_SECRET:-unset}""#,
        ]))
        .with_env_allowlist(vec!["PATH".to_string()]);

        let mut process = assert_ok!(spawner.spawn(1000).await);
        assert_eq!(assert_ok!(process.next_line().await.unwrap()), "unset");
    }
}

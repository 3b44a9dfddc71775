//! Bridge supervision against real `sh` processes
//!
//! Each bridge is a small shell script speaking the line protocol. Heartbeat
//! timeouts are shortened so restarts and the breaker trip within seconds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use watchkeeper_core::application::{SupervisorConfig, SupervisorEvent, TelemetryBridge};
use watchkeeper_core::domain::{NoticeKind, SupervisorState};
use watchkeeper_core::port::time_provider::SystemTimeProvider;
use watchkeeper_core::port::BridgeCommand;
use watchkeeper_infra_system::TokioProcessSpawner;

const HEALTHY: &str = r#"while true; do
  echo '{"type":"heartbeat","ts":1.0}'
  echo '{"type":"metrics","gpus":[{"index":0,"util":42}],"count":1,"ts":1.0}'
  sleep 0.1
done"#;

fn bridge_for(script: &str, config: SupervisorConfig) -> TelemetryBridge {
    let spawner = TokioProcessSpawner::new(BridgeCommand::new("sh").with_args(["-c", script]));
    TelemetryBridge::new(config, Arc::new(spawner), Arc::new(SystemTimeProvider)).unwrap()
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_timeout_ms: 400,
        stop_grace_ms: 300,
        ..Default::default()
    }
}

async fn reaches(bridge: &TelemetryBridge, target: SupervisorState, within: Duration) -> bool {
    let mut state = bridge.watch_state();
    let reached = matches!(timeout(within, state.wait_for(|s| *s == target)).await, Ok(Ok(_)));
    reached
}

fn pid_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("watchkeeper-{}-{}.pid", name, std::process::id()))
}

#[tokio::test]
async fn test_healthy_bridge_runs_and_delivers_metrics() {
    let bridge = bridge_for(HEALTHY, fast_config());
    let mut events = bridge.subscribe();

    assert_eq!(bridge.start(100).await.unwrap(), SupervisorState::Starting);
    assert!(reaches(&bridge, SupervisorState::Running, Duration::from_secs(5)).await);

    // Several timeout periods pass without a restart
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(bridge.state(), SupervisorState::Running);
    assert_eq!(bridge.failures_in_window().await.unwrap(), 0);

    let metrics = bridge.latest_metrics().expect("metrics cached");
    assert_eq!(metrics.count, 1);
    assert_eq!(metrics.gpus[0]["util"], 42);

    let mut saw_metrics = false;
    while let Ok(event) = events.try_recv() {
        saw_metrics |= event == SupervisorEvent::MetricsUpdated;
    }
    assert!(saw_metrics);

    assert_ok!(bridge.stop().await);
    assert_eq!(bridge.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_silent_bridge_trips_breaker() {
    let bridge = bridge_for("sleep 30", fast_config());
    let mut events = bridge.subscribe();
    bridge.start(100).await.unwrap();

    assert!(reaches(&bridge, SupervisorState::Degraded, Duration::from_secs(3)).await);
    assert!(reaches(&bridge, SupervisorState::BreakerOpen, Duration::from_secs(5)).await);
    assert_eq!(bridge.failures_in_window().await.unwrap(), 3);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::Error(notice) = event {
            kinds.push(notice.kind);
        }
    }
    assert_eq!(
        kinds,
        vec![NoticeKind::Degraded, NoticeKind::Degraded, NoticeKind::Disabled]
    );

    // Disabled for the lifetime of this supervisor
    assert_eq!(bridge.start(100).await.unwrap(), SupervisorState::BreakerOpen);
    assert_ok!(bridge.stop().await);
    assert_eq!(bridge.start(100).await.unwrap(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_crashing_bridge_fails_without_waiting_for_timeout() {
    // Default 6s timeout: only process exit can explain a fast breaker
    let bridge = bridge_for("exit 3", SupervisorConfig::default());
    let begun = Instant::now();
    bridge.start(1000).await.unwrap();

    assert!(reaches(&bridge, SupervisorState::BreakerOpen, Duration::from_secs(4)).await);
    assert!(begun.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_missing_executable_opens_breaker_on_start() {
    let spawner = TokioProcessSpawner::new(BridgeCommand::new("/nonexistent/gpu-bridge"));
    let bridge = TelemetryBridge::new(
        SupervisorConfig::default(),
        Arc::new(spawner),
        Arc::new(SystemTimeProvider),
    )
    .unwrap();

    assert_eq!(bridge.start(1000).await.unwrap(), SupervisorState::BreakerOpen);
    assert_eq!(bridge.failures_in_window().await.unwrap(), 3);
}

#[tokio::test]
async fn test_malformed_output_does_not_keep_bridge_alive() {
    let script = r#"echo '{"type":"heartbeat"}'
while true; do
  echo 'Traceback (most recent call last):'
  echo '{"type":'
  echo '{"kind":"heartbeat"}'
  sleep 0.05
done"#;
    let bridge = bridge_for(script, fast_config());
    bridge.start(100).await.unwrap();

    assert!(reaches(&bridge, SupervisorState::Running, Duration::from_secs(3)).await);
    assert!(reaches(&bridge, SupervisorState::Degraded, Duration::from_secs(3)).await);
    assert!(bridge.failures_in_window().await.unwrap() >= 1);
    assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn test_stop_kills_bridge_ignoring_sigterm() {
    let pid_path = pid_file("stubborn");
    let script = format!(
        r#"trap '' TERM
echo $$ > {}
while true; do echo '{{"type":"heartbeat"}}'; sleep 0.1; done"#,
        pid_path.display()
    );
    let bridge = bridge_for(&script, fast_config());
    bridge.start(100).await.unwrap();
    assert!(reaches(&bridge, SupervisorState::Running, Duration::from_secs(3)).await);

    let pid: u32 = std::fs::read_to_string(&pid_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let begun = Instant::now();
    assert_ok!(bridge.stop().await);
    assert!(begun.elapsed() >= Duration::from_millis(300), "SIGTERM was ignored");
    assert!(begun.elapsed() < Duration::from_secs(3));
    assert_eq!(bridge.state(), SupervisorState::Stopped);

    #[cfg(target_os = "linux")]
    assert!(!PathBuf::from(format!("/proc/{}", pid)).exists());

    // Idempotent
    assert_ok!(bridge.stop().await);
    let _ = std::fs::remove_file(&pid_path);
}

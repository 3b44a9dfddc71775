//! Daemon configuration resolved from environment variables

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

use watchkeeper_core::application::constants::DEFAULT_METRICS_INTERVAL_MS;
use watchkeeper_core::application::{PoolConfig, SupervisorConfig, WatchdogConfig};
use watchkeeper_core::port::{BridgeCommand, INTERVAL_PLACEHOLDER};

use crate::logging::LogFormat;

const DEFAULT_BRIDGE_CMD: &str = "~/.watchkeeper/bin/gpu-bridge";

/// Variables passed through to the bridge; everything else is withheld
pub const BRIDGE_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LD_LIBRARY_PATH",
    "CUDA_VISIBLE_DEVICES",
];

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bridge: BridgeCommand,
    pub interval_ms: u64,
    pub supervisor: SupervisorConfig,
    pub pool: PoolConfig,
    pub watchdog: WatchdogConfig,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = lookup("WATCHKEEPER_BRIDGE_CMD").unwrap_or_else(|| DEFAULT_BRIDGE_CMD.to_string());
        let program = shellexpand::tilde(&program).into_owned();
        let args: Vec<String> = match lookup("WATCHKEEPER_BRIDGE_ARGS") {
            Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
            None => vec!["--interval-ms".to_string(), INTERVAL_PLACEHOLDER.to_string()],
        };

        let interval_ms = parse_or(&lookup, "WATCHKEEPER_INTERVAL_MS", DEFAULT_METRICS_INTERVAL_MS)?;
        if interval_ms == 0 {
            anyhow::bail!("WATCHKEEPER_INTERVAL_MS must be > 0");
        }

        let defaults = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            heartbeat_timeout_ms: parse_or(
                &lookup,
                "WATCHKEEPER_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout_ms,
            )?,
            ..defaults
        };
        supervisor
            .validate()
            .context("Invalid supervisor configuration")?;

        let pool = PoolConfig {
            pool_size: parse_or(&lookup, "WATCHKEEPER_POOL_SIZE", PoolConfig::default().pool_size)?,
            ..PoolConfig::default()
        };

        let log_format = LogFormat::parse(&lookup("WATCHKEEPER_LOG_FORMAT").unwrap_or_default());
        let log_dir = lookup("WATCHKEEPER_LOG_DIR")
            .filter(|dir| !dir.is_empty())
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()));

        Ok(Self {
            bridge: BridgeCommand::new(program).with_args(args),
            interval_ms,
            supervisor,
            pool,
            watchdog: WatchdogConfig::default(),
            log_format,
            log_dir,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

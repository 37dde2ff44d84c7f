use agent_policy_rs::EngineConfig;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

use crate::error::DashboardError;

pub const DEFAULT_BIND: &str = "0.0.0.0:7778";
pub const DEFAULT_AGENT_ROOT: &str = "agents";
pub const DEFAULT_ACTIVE_WINDOW_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_SECS: u64 = 30;

pub const ENV_BIND: &str = "DASHBOARD_BIND";
pub const ENV_AGENT_ROOTS: &str = "DASHBOARD_AGENT_ROOTS";
pub const ENV_LOG_LEVEL: &str = "DASHBOARD_LOG_LEVEL";
pub const ENV_ACTIVE_WINDOW_SECS: &str = "DASHBOARD_ACTIVE_WINDOW_SECS";
pub const ENV_REFRESH_SECS: &str = "DASHBOARD_REFRESH_SECS";

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub bind: SocketAddr,
    pub agent_roots: Vec<PathBuf>,
    pub log_level: LevelFilter,
    /// Scripts modified within this window report as `active`.
    pub active_window: Duration,
    pub refresh_interval: Duration,
    pub engine: EngineConfig,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, DashboardError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DashboardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let bind_raw = value(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse::<SocketAddr>().map_err(|_| {
            DashboardError::InvalidConfig(format!("{ENV_BIND} is not a socket address: {bind_raw}"))
        })?;

        let agent_roots = match value(ENV_AGENT_ROOTS) {
            Some(raw) => env::split_paths(&raw)
                .filter(|path| !path.as_os_str().is_empty())
                .collect(),
            None => vec![PathBuf::from(DEFAULT_AGENT_ROOT)],
        };

        let log_level = match value(ENV_LOG_LEVEL) {
            Some(raw) => raw.parse::<LevelFilter>().map_err(|_| {
                DashboardError::InvalidConfig(format!("{ENV_LOG_LEVEL} is not a log level: {raw}"))
            })?,
            None => LevelFilter::INFO,
        };

        let active_window = parse_secs(
            value(ENV_ACTIVE_WINDOW_SECS),
            ENV_ACTIVE_WINDOW_SECS,
            DEFAULT_ACTIVE_WINDOW_SECS,
        )?;
        let refresh_interval =
            parse_secs(value(ENV_REFRESH_SECS), ENV_REFRESH_SECS, DEFAULT_REFRESH_SECS)?;

        Ok(Self {
            bind,
            agent_roots,
            log_level,
            active_window,
            refresh_interval,
            engine: EngineConfig::from_lookup(&lookup)?,
        })
    }
}

fn parse_secs(raw: Option<String>, key: &str, fallback: u64) -> Result<Duration, DashboardError> {
    match raw {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| DashboardError::InvalidConfig(format!("{key} is not a number: {raw}"))),
        None => Ok(Duration::from_secs(fallback)),
    }
}

//! Configuration – reads `~/.fleet/config.toml` and `FLEET_*` overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use fleet_server::ServerConfig;
use fleet_vehicle::SimConfig;

/// Settings shared by every role.  Every field has a default, so a partial
/// file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator address: where the server listens and clients connect.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Bound on every outbound call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Seconds between a vehicle's stats reports.
    #[serde(default = "default_five_secs")]
    pub report_interval_secs: u64,

    /// Seconds a vehicle waits before reconnecting.
    #[serde(default = "default_five_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_five_secs")]
    pub housekeeping_interval_secs: u64,

    /// Silence after which the coordinator reports a vehicle as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_server_addr() -> String {
    fleet_server::DEFAULT_ADDR.to_string()
}
fn default_call_timeout_ms() -> u64 {
    5000
}
fn default_five_secs() -> u64 {
    5
}
fn default_stale_after_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            call_timeout_ms: default_call_timeout_ms(),
            report_interval_secs: default_five_secs(),
            reconnect_delay_secs: default_five_secs(),
            housekeeping_interval_secs: default_five_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Config {
    /// A zero timeout would fail every call, so it is raised to the floor.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(MIN_CALL_TIMEOUT_MS))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.server_addr.clone(),
            call_timeout: self.call_timeout(),
            housekeeping_interval: secs(self.housekeeping_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            server_addr: self.server_addr.clone(),
            report_interval: secs(self.report_interval_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            call_timeout: self.call_timeout(),
        }
    }
}

const MIN_CALL_TIMEOUT_MS: u64 = 100;

/// Interval periods must be non-zero.
fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

/// Return the path to `~/.fleet/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fleet").join("config.toml")
}

/// Load the config file.  Returns `None` if it does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// File settings (or defaults) with environment overrides applied.  A broken
/// file is reported and replaced by defaults.
pub fn load_or_default() -> Config {
    let mut cfg = match load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => Config::default(),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            Config::default()
        }
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Apply `FLEET_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FLEET_SERVER_ADDR` | `server_addr` |
/// | `FLEET_CALL_TIMEOUT_MS` | `call_timeout_ms` |
/// | `FLEET_REPORT_INTERVAL_SECS` | `report_interval_secs` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FLEET_SERVER_ADDR")
        && !v.trim().is_empty()
    {
        cfg.server_addr = v;
    }
    if let Ok(v) = std::env::var("FLEET_CALL_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.call_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("FLEET_REPORT_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.report_interval_secs = secs;
    }
}

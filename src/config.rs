//! Runtime configuration, grouped by concern (wire protocol, PID gains,
//! monitor thresholds) and matching every row of the protocol's
//! configuration table.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireConfig {
    /// UDP port the Master binds and the Slave targets.
    pub sync_port: u16,
    /// Seconds between sync bursts.
    pub sync_interval_s: f64,
    /// Request/reply rounds per burst.
    pub rounds_per_sync: u32,
    /// Per-round receive timeout, seconds.
    pub sync_timeout_s: f64,
    /// Sequence number wraps at this value + 1.
    pub max_sequence: u16,
}

impl Default for WireConfig {
    fn default() -> Self {
        WireConfig {
            sync_port: 12345,
            sync_interval_s: 5.0,
            rounds_per_sync: 6,
            sync_timeout_s: 1.0,
            max_sequence: 65535,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Integrator saturation, applied as [-bound, +bound].
    pub integral_bound: f64,
    /// Rate-adjustment saturation and the coarse-PID magnitude.
    pub max_rate_adjustment: f64,
    /// Above this |offset|, step instead of disciplining.
    pub step_threshold_s: f64,
    /// Above this |offset| (and at or below `step_threshold_s`), saturate
    /// the rate adjustment instead of running the full PID update.
    pub coarse_pid_threshold_s: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        PidConfig {
            kp: 0.8,
            ki: 0.5,
            kd: 0.1,
            integral_bound: 1.0,
            max_rate_adjustment: 1.0,
            step_threshold_s: 10.0,
            coarse_pid_threshold_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// "In sync" predicate threshold for the success-rate metric.
    pub sync_threshold_s: f64,
    /// Master considered offline after this many seconds without a record.
    pub offline_timeout_s: f64,
    /// Bounded ring capacity for offset/delay history.
    pub chart_max_points: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            sync_threshold_s: 0.001,
            offline_timeout_s: 15.0,
            chart_max_points: 30,
        }
    }
}

/// Top-level configuration shared by both binaries. Either side ignores the
/// fields it doesn't need (e.g. the Master never reads `PidConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub master_addr: SocketAddr,
    pub wire: WireConfig,
    pub pid: PidConfig,
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            master_addr: "127.0.0.1:12345".parse().unwrap(),
            wire: WireConfig::default(),
            pid: PidConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Load a config file, falling back to defaults (logged at `WARN`, not an
/// error) if the file is missing or fails to parse. Writing a fresh file
/// on first run, if wanted, belongs to the binaries, not the library.
pub fn load_config(path: &std::path::Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Config>(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("failed to parse config at {}: {e}, using defaults", path.display());
                Config::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config at {}: {e}, using defaults", path.display());
            Config::default()
        }
    }
}

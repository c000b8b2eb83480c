//! Runtime settings

use std::{fmt, path::PathBuf, time::Duration};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::CliArgs;

pub const DEFAULT_SCAN_INTERVAL_SECS: u16 = 180;
pub const DEFAULT_BGSCAN_SHORT_INTERVAL_SECS: u16 = 30;
pub const DEFAULT_BGSCAN_SIGNAL_THRESHOLD_DBM: i32 = -50;
pub const FAST_SCAN_ATTEMPTS: u32 = 3;
pub const FAST_SCAN_INTERVAL: Duration = Duration::from_secs(10);
pub const PENDING_TIMEOUT: Duration = Duration::from_secs(15);
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay between attempts to reach a station process that went away
pub const STATION_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// BSS entries older than this (plus time since resume) are flushed after resume
pub const MAX_BSS_RESUME_AGE_SECS: u32 = 10;

/// When newly grouped services are announced to the policy layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Register as soon as the first endpoint is grouped
    #[default]
    PerEvent,
    /// Register everything grouped during a scan when the scan completes
    OnScanDone,
}

/// Background scan algorithm requested from the station process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BgscanMethod {
    #[default]
    Simple,
    Learn,
}

impl fmt::Display for BgscanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Learn => f.write_str("learn"),
        }
    }
}

/// Tunables of the connection controller
#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    /// Periodic scan interval once fast scans are used up; 0 disables
    pub scan_interval_secs: u16,
    pub bgscan_method: BgscanMethod,
    pub bgscan_short_interval_secs: u16,
    pub bgscan_signal_threshold_dbm: i32,
    pub fast_scan_attempts: u32,
    pub fast_scan_interval: Duration,
    pub pending_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub registration: RegistrationPolicy,
    pub notification_capacity: usize,
    pub station_retry_interval: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            bgscan_method: BgscanMethod::default(),
            bgscan_short_interval_secs: DEFAULT_BGSCAN_SHORT_INTERVAL_SECS,
            bgscan_signal_threshold_dbm: DEFAULT_BGSCAN_SIGNAL_THRESHOLD_DBM,
            fast_scan_attempts: FAST_SCAN_ATTEMPTS,
            fast_scan_interval: FAST_SCAN_INTERVAL,
            pending_timeout: PENDING_TIMEOUT,
            reconnect_timeout: RECONNECT_TIMEOUT,
            registration: RegistrationPolicy::default(),
            notification_capacity: 100,
            station_retry_interval: STATION_RETRY_INTERVAL,
        }
    }
}

/// Runtime change to one controller tunable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value")]
#[serde(rename_all = "snake_case")]
pub enum ConfigUpdate {
    ScanInterval(u16),
    BgscanMethod(BgscanMethod),
    BgscanShortInterval(u16),
    BgscanSignalThreshold(i32),
}

impl StationConfig {
    /// `bgscan` network parameter: `method:short_interval:signal_threshold:long_interval`
    pub fn bgscan(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.bgscan_method,
            self.bgscan_short_interval_secs,
            self.bgscan_signal_threshold_dbm,
            self.scan_interval_secs
        )
    }

    /// Apply an update, returning whether anything changed
    pub fn apply(&mut self, update: ConfigUpdate) -> bool {
        match update {
            ConfigUpdate::ScanInterval(secs) => {
                std::mem::replace(&mut self.scan_interval_secs, secs) != secs
            }
            ConfigUpdate::BgscanMethod(method) => {
                std::mem::replace(&mut self.bgscan_method, method) != method
            }
            ConfigUpdate::BgscanShortInterval(secs) => {
                std::mem::replace(&mut self.bgscan_short_interval_secs, secs) != secs
            }
            ConfigUpdate::BgscanSignalThreshold(dbm) => {
                std::mem::replace(&mut self.bgscan_signal_threshold_dbm, dbm) != dbm
            }
        }
    }
}

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub interface: String,
    pub enable_unix_socket: bool,
    pub socket_path: String,
    pub socket_mode: u32,
    pub profiles: Option<PathBuf>,
    pub station: StationConfig,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        // Parse octal socket mode
        let socket_mode = u32::from_str_radix(&args.socket_mode, 8).unwrap_or(0o660);

        Settings {
            interface: args.interface,
            enable_unix_socket: args.enable_unix_socket,
            socket_path: args.socket_path,
            socket_mode,
            profiles: args.profiles,
            station: StationConfig {
                scan_interval_secs: args.scan_interval,
                bgscan_method: args.bgscan_method,
                bgscan_short_interval_secs: args.bgscan_short_interval,
                bgscan_signal_threshold_dbm: args.bgscan_signal_threshold,
                registration: args.registration,
                ..StationConfig::default()
            },
        }
    }
}

//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::settings::{
    BgscanMethod, DEFAULT_BGSCAN_SHORT_INTERVAL_SECS, DEFAULT_BGSCAN_SIGNAL_THRESHOLD_DBM,
    DEFAULT_SCAN_INTERVAL_SECS, RegistrationPolicy,
};

#[derive(Parser, Debug, Clone)]
#[clap(name = "wifi-connection-manager", version, author)]
#[clap(about = "WiFi connection manager driving wpa_supplicant")]
pub struct CliArgs {
    /// Wireless network interface name
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Enable Unix socket transport
    #[clap(long)]
    pub enable_unix_socket: bool,

    /// Path for Unix socket
    #[clap(long, default_value = "/run/wifi-connection-manager.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660")]
    pub socket_mode: String,

    /// JSON file with stored network profiles (hidden networks are preloaded)
    #[clap(long)]
    pub profiles: Option<PathBuf>,

    /// Periodic scan interval in seconds (0 disables periodic scanning)
    #[clap(long, default_value_t = DEFAULT_SCAN_INTERVAL_SECS)]
    pub scan_interval: u16,

    /// Background scan method
    #[clap(long, value_enum, default_value_t = BgscanMethod::Simple)]
    pub bgscan_method: BgscanMethod,

    /// Background scan interval in seconds while signal is weak
    #[clap(long, default_value_t = DEFAULT_BGSCAN_SHORT_INTERVAL_SECS)]
    pub bgscan_short_interval: u16,

    /// Signal threshold in dBm below which background scans speed up
    #[clap(long, default_value_t = DEFAULT_BGSCAN_SIGNAL_THRESHOLD_DBM, allow_hyphen_values = true)]
    pub bgscan_signal_threshold: i32,

    /// When newly discovered networks are announced
    #[clap(long, value_enum, default_value_t = RegistrationPolicy::PerEvent)]
    pub registration: RegistrationPolicy,
}

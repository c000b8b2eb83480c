//! WiFi Connection Manager
//!
//! Connection-management core of a wireless daemon: groups the access points
//! reported by `wpa_supplicant` into logical services and drives one
//! connection at a time on behalf of a policy client.
//! - `backend`: station process adapter (D-Bus and a recording mock)
//! - `core`: endpoint registry, service directory, timers, controller
//! - `transport`: JSON-RPC 2.0 over a Unix domain socket

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    dispatcher::{DeviceHandle, ServiceHandle},
    error::{ControllerError, StationError, TransportError},
    types::{FailureReason, Outcome, ServiceId, ServiceState, StationState},
};

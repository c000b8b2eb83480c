//! Domain types for wireless connection management

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{ControllerError, ControllerResult};

/// Raw network name as broadcast by an access point (up to 32 arbitrary bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ssid(Vec<u8>);

impl Ssid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex rendering, used where the raw bytes must survive a text channel
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<&str> for Ssid {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

/// Printable ASCII is kept, everything else is rendered as `[xx]`
impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "[{byte:02x}]")?;
            }
        }
        Ok(())
    }
}

/// Hardware address of an access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bssid([u8; 6]);

impl Bssid {
    pub fn from_bytes(bytes: &[u8]) -> ControllerResult<Self> {
        let octets: [u8; 6] = bytes.try_into().map_err(|_| {
            ControllerError::MalformedEvent(format!(
                "BSSID must be 6 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(octets))
    }
}

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Operating mode of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    Infrastructure,
    AdHoc,
}

impl NetworkMode {
    /// Parses the station process's mode string; access-point mode is not supported
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "infrastructure" => Some(Self::Infrastructure),
            "ad-hoc" => Some(Self::AdHoc),
            _ => None,
        }
    }

    /// Numeric value of the `mode` network parameter
    pub fn network_mode(&self) -> u32 {
        match self {
            Self::Infrastructure => 0,
            Self::AdHoc => 1,
        }
    }
}

/// Security classification, part of the grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    Open,
    Wep,
    Wpa,
    /// RSN with pre-shared key
    Rsn,
    #[serde(rename = "802_1x")]
    Ieee8021x,
    Unknown,
}

impl Security {
    /// Default `key_mgmt` for a network entry of this class
    pub fn key_management(&self) -> &'static str {
        match self {
            Self::Open | Self::Wep | Self::Unknown => "NONE",
            Self::Wpa | Self::Rsn => "WPA-PSK",
            Self::Ieee8021x => "WPA-EAP",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "none",
            Self::Wep => "wep",
            Self::Wpa => "wpa",
            Self::Rsn => "rsn",
            Self::Ieee8021x => "802_1x",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Identifier of a service in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u32);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Opaque handle the station process assigns to an observed BSS
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointHandle(pub String);

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle of a network entry created by `AddNetwork`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle(pub String);

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one connect attempt; replies carrying an older id are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

/// Connection state exposed upward for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Idle,
    Associating,
    Configuring,
    Connected,
    Portal,
    Online,
    Failure,
}

impl ServiceState {
    /// Progress rank; forward-only updates compare on this
    fn rank(&self) -> u8 {
        match self {
            Self::Idle | Self::Failure => 0,
            Self::Associating => 1,
            Self::Configuring => 2,
            Self::Connected | Self::Portal | Self::Online => 3,
        }
    }

    pub fn is_forward_of(&self, other: ServiceState) -> bool {
        self.rank() > other.rank()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Portal | Self::Online)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Associating => "associating",
            Self::Configuring => "configuring",
            Self::Connected => "connected",
            Self::Portal => "portal",
            Self::Online => "online",
            Self::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Why a service entered `Failure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unknown,
    OutOfRange,
    Connect,
    Dhcp,
    BadPassphrase,
    BadWepKey,
    EapAuthentication,
}

/// Connectivity result reported by the address-configuration collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Portal,
    Online,
    Failed,
}

/// Link state reported by the station process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StationState {
    #[default]
    Unknown,
    Disconnected,
    Scanning,
    Authenticating,
    Associating,
    Associated,
    FourWayHandshake,
    GroupHandshake,
    Completed,
}

impl StationState {
    pub fn parse(value: &str) -> ControllerResult<Self> {
        let state = match value {
            "disconnected" | "inactive" | "interface_disabled" => Self::Disconnected,
            "scanning" => Self::Scanning,
            "authenticating" => Self::Authenticating,
            "associating" => Self::Associating,
            "associated" => Self::Associated,
            "4way_handshake" | "4-way-handshake" => Self::FourWayHandshake,
            "group_handshake" | "group-handshake" => Self::GroupHandshake,
            "completed" => Self::Completed,
            other => {
                return Err(ControllerError::MalformedEvent(format!(
                    "unknown station state {other:?}"
                )));
            }
        };
        Ok(state)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Disconnected => 1,
            Self::Scanning => 2,
            Self::Authenticating => 3,
            Self::Associating => 4,
            Self::Associated => 5,
            Self::FourWayHandshake => 6,
            Self::GroupHandshake => 7,
            Self::Completed => 8,
        }
    }

    /// True when moving from `previous` to `self` is progress toward `completed`
    pub fn is_forward_of(&self, previous: StationState) -> bool {
        self.rank() > previous.rank()
    }

    /// States in which a disconnect points at rejected credentials
    pub fn is_credential_phase(&self) -> bool {
        matches!(
            self,
            Self::Authenticating
                | Self::Associating
                | Self::Associated
                | Self::FourWayHandshake
                | Self::GroupHandshake
        )
    }
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Authenticating => "authenticating",
            Self::Associating => "associating",
            Self::Associated => "associated",
            Self::FourWayHandshake => "4way_handshake",
            Self::GroupHandshake => "group_handshake",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// How many endpoints currently back a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    None,
    Single,
    Multiple,
}

impl Visibility {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1 => Self::Single,
            _ => Self::Multiple,
        }
    }
}

/// Outcome of a policy-facing operation that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    AlreadyInState,
}

/// Session identifier for transport connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Request message types

use serde::{Deserialize, Serialize};

use crate::{
    backend::properties::PropertyMap,
    config::ConfigUpdate,
    core::{
        directory::{ServiceRequest, ServiceSettings},
        types::{Connectivity, NetworkMode, Security, ServiceId, Ssid},
    },
};

/// Request messages from the policy client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Trigger an active scan
    Scan,

    /// Snapshot of every registered service
    ListServices,

    /// Find a service by identity, creating a hidden one if needed
    GetService(GetServiceParams),

    /// Update favorite flag and credentials
    ConfigureService(ConfigureServiceParams),

    Connect(ServiceParams),

    Disconnect(ServiceParams),

    /// Disable the service's network entry without forgetting credentials
    DisableService(ServiceParams),

    /// Remove the service's network entry and the credentials cached with it
    ClearCredentials(ServiceParams),

    /// Device-level status
    GetStatus,

    /// Result from the address-configuration collaborator
    ReportConnectivity(ReportConnectivityParams),

    /// Change one tunable at runtime
    UpdateConfig(ConfigUpdate),

    /// The host resumed from suspend
    AfterResume,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceParams {
    pub id: ServiceId,
}

/// Service identity; exactly one of `ssid` and `ssid_hex` must be set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetServiceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Raw SSID bytes for names that are not valid UTF-8
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid_hex: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: NetworkMode,
    pub security: Security,
    #[serde(default)]
    pub hidden: bool,
}

fn default_mode() -> NetworkMode {
    NetworkMode::Infrastructure
}

impl GetServiceParams {
    pub fn to_service_request(&self) -> Result<ServiceRequest, String> {
        let ssid = match (&self.ssid, &self.ssid_hex) {
            (Some(ssid), None) => Ssid::from(ssid.as_str()),
            (None, Some(encoded)) => {
                Ssid::new(hex::decode(encoded).map_err(|e| format!("Invalid ssid_hex: {}", e))?)
            }
            _ => return Err("Exactly one of ssid and ssid_hex is required".to_string()),
        };
        if ssid.is_empty() || ssid.as_bytes().len() > 32 {
            return Err(format!(
                "SSID must be 1 to 32 bytes, got {}",
                ssid.as_bytes().len()
            ));
        }

        Ok(ServiceRequest {
            ssid,
            mode: self.mode,
            security: self.security,
            hidden: self.hidden,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigureServiceParams {
    pub id: ServiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    /// Opaque network parameters merged into the network entry on connect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PropertyMap>,
}

impl ConfigureServiceParams {
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            favorite: self.favorite,
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportConnectivityParams {
    pub id: ServiceId,
    pub connectivity: Connectivity,
}

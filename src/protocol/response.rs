//! Response message types

use serde::{Deserialize, Serialize};

use crate::core::{controller::DeviceStatus, directory::ServiceSnapshot, types::Outcome};

/// Response messages to the policy client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    /// Result of a state-changing request
    Outcome(OutcomeResponse),

    /// A single service
    Service(ServiceResponse),

    /// Every registered service
    Services(ServicesResponse),

    /// Device-level status
    Status(StatusResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeResponse {
    pub status: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceResponse {
    pub status: String,
    pub service: ServiceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicesResponse {
    pub status: String,
    pub services: Vec<ServiceSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(flatten)]
    pub device: DeviceStatus,
}

impl OutcomeResponse {
    pub fn ok(outcome: Outcome) -> Self {
        Self {
            status: "ok".to_string(),
            outcome,
        }
    }
}

impl ServiceResponse {
    pub fn ok(service: ServiceSnapshot) -> Self {
        Self {
            status: "ok".to_string(),
            service,
        }
    }
}

impl ServicesResponse {
    pub fn ok(services: Vec<ServiceSnapshot>) -> Self {
        Self {
            status: "ok".to_string(),
            services,
        }
    }
}

impl StatusResponse {
    pub fn ok(device: DeviceStatus) -> Self {
        Self {
            status: "ok".to_string(),
            device,
        }
    }
}

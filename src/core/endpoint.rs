//! Endpoint registry
//!
//! Tracks every BSS the station process reports, keyed by its opaque handle.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    backend::properties::{self, PropertyMap, bss},
    core::{
        error::{ControllerError, ControllerResult},
        types::{Bssid, EndpointHandle, NetworkMode, Security, ServiceId, Ssid},
    },
};

/// Grouping key shared by all endpoints of one service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub ssid: Ssid,
    pub mode: NetworkMode,
    pub security: Security,
}

/// One observed access point
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub handle: EndpointHandle,
    pub ssid: Ssid,
    pub bssid: Bssid,
    pub signal: i16,
    pub mode: NetworkMode,
    pub security: Security,
    /// Service this endpoint is grouped into, if any
    pub service: Option<ServiceId>,
}

impl Endpoint {
    /// Build an endpoint from a BSS property bag
    pub fn from_properties(handle: EndpointHandle, props: &PropertyMap) -> ControllerResult<Self> {
        let ssid = Ssid::new(properties::get_bytes(props, bss::SSID)?);
        let bssid = Bssid::from_bytes(properties::get_bytes(props, bss::BSSID)?)?;
        let signal = properties::get_i16(props, bss::SIGNAL)?;
        let mode_name = properties::get_str(props, bss::MODE)?;
        let mode = NetworkMode::parse(mode_name).ok_or_else(|| {
            ControllerError::MalformedEvent(format!(
                "unsupported mode {mode_name:?}"
            ))
        })?;
        let security = parse_security(props)?;

        Ok(Self {
            handle,
            ssid,
            bssid,
            signal,
            mode,
            security,
            service: None,
        })
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            ssid: self.ssid.clone(),
            mode: self.mode,
            security: self.security,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct KeyManagement {
    present: bool,
    eap: bool,
    psk: bool,
    other: bool,
}

fn key_management(props: &PropertyMap, key: &str) -> ControllerResult<KeyManagement> {
    let Some(dict) = properties::get_dict(props, key)? else {
        return Ok(KeyManagement::default());
    };

    let mut parsed = KeyManagement {
        present: true,
        ..Default::default()
    };
    for method in properties::get_strings(dict, bss::KEY_MGMT)? {
        let method = method.to_ascii_lowercase();
        if method.ends_with("-eap") {
            parsed.eap = true;
        } else if method.ends_with("-psk") {
            parsed.psk = true;
        } else {
            parsed.other = true;
        }
    }
    Ok(parsed)
}

/// Classify security from the `RSN`, `WPA` and `Privacy` properties
pub fn parse_security(props: &PropertyMap) -> ControllerResult<Security> {
    let rsn = key_management(props, bss::RSN)?;
    let wpa = key_management(props, bss::WPA)?;
    let privacy = properties::get_flag(props, bss::PRIVACY)?;

    let security = if rsn.eap || wpa.eap {
        Security::Ieee8021x
    } else if rsn.psk {
        Security::Rsn
    } else if wpa.psk {
        Security::Wpa
    } else if privacy {
        Security::Wep
    } else if (rsn.present && rsn.other) || (wpa.present && wpa.other) {
        Security::Unknown
    } else {
        Security::Open
    };
    Ok(security)
}

/// Result of feeding a `BSSAdded` report into the registry
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// First sighting of this handle
    New,
    /// Known handle; grouping must be re-evaluated when the key changed
    Refreshed { previous_key: ServiceKey },
}

/// All endpoints currently known to the station process
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointHandle, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered BSS, refreshing signal and security of known ones
    pub fn on_discovered(
        &mut self,
        handle: EndpointHandle,
        props: &PropertyMap,
    ) -> ControllerResult<Discovery> {
        let parsed = Endpoint::from_properties(handle.clone(), props)?;

        if let Some(existing) = self.endpoints.get_mut(&handle) {
            let previous_key = existing.key();
            existing.signal = parsed.signal;
            existing.security = parsed.security;
            trace!(%handle, signal = parsed.signal, "endpoint refreshed");
            return Ok(Discovery::Refreshed { previous_key });
        }

        debug!(
            %handle,
            ssid = %parsed.ssid,
            bssid = %parsed.bssid,
            signal = parsed.signal,
            security = %parsed.security,
            "endpoint discovered"
        );
        self.endpoints.insert(handle, parsed);
        Ok(Discovery::New)
    }

    /// Forget a BSS; unknown handles yield `None`
    pub fn on_removed(&mut self, handle: &EndpointHandle) -> Option<Endpoint> {
        let removed = self.endpoints.remove(handle);
        if removed.is_none() {
            debug!(%handle, "removal of unknown endpoint ignored");
        }
        removed
    }

    pub fn get(&self, handle: &EndpointHandle) -> Option<&Endpoint> {
        self.endpoints.get(handle)
    }

    pub fn set_service(&mut self, handle: &EndpointHandle, service: Option<ServiceId>) {
        if let Some(endpoint) = self.endpoints.get_mut(handle) {
            endpoint.service = service;
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.endpoints.clear();
    }

    /// Forget every endpoint, returning what was known
    pub fn drain(&mut self) -> Vec<Endpoint> {
        self.endpoints.drain().map(|(_, endpoint)| endpoint).collect()
    }
}

//! Service directory and endpoint grouping
//!
//! Endpoints sharing (SSID, mode, security) are grouped into one [`Service`].
//! The directory owns every live service and announces registration, updates
//! and removal to the policy layer through the [`Notifier`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    backend::properties::PropertyMap,
    config::{RegistrationPolicy, StoredProfile},
    core::{
        endpoint::{Endpoint, ServiceKey},
        notification::{Notification, Notifier, ServiceDeregisteredParams},
        types::{
            EndpointHandle, FailureReason, NetworkMode, Security, ServiceId, ServiceState, Ssid,
            StationState, Visibility,
        },
    },
};

/// A logical network reachable through one or more endpoints
#[derive(Debug, Clone)]
pub struct Service {
    pub id: ServiceId,
    pub ssid: Ssid,
    pub mode: NetworkMode,
    pub security: Security,
    pub hidden: bool,
    pub favorite: bool,
    pub state: ServiceState,
    pub failure: Option<FailureReason>,
    /// Last sub-state the station process reported while this service was active
    pub station_state: StationState,
    pub registered: bool,
    pub has_ever_connected: bool,
    pub current_endpoint: Option<EndpointHandle>,
    /// Opaque parameters merged into the network entry on connect
    pub credentials: PropertyMap,
    members: BTreeMap<EndpointHandle, i16>,
}

impl Service {
    fn new(id: ServiceId, key: ServiceKey) -> Self {
        Self {
            id,
            ssid: key.ssid,
            mode: key.mode,
            security: key.security,
            hidden: false,
            favorite: false,
            state: ServiceState::Idle,
            failure: None,
            station_state: StationState::Unknown,
            registered: false,
            has_ever_connected: false,
            current_endpoint: None,
            credentials: PropertyMap::new(),
            members: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            ssid: self.ssid.clone(),
            mode: self.mode,
            security: self.security,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_endpoint(&self, handle: &EndpointHandle) -> bool {
        self.members.contains_key(handle)
    }

    /// Strongest signal among member endpoints
    pub fn signal(&self) -> Option<i16> {
        self.members.values().copied().max()
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            id: self.id,
            ssid: self.ssid.to_string(),
            ssid_hex: self.ssid.to_hex(),
            mode: self.mode,
            security: self.security,
            hidden: self.hidden,
            favorite: self.favorite,
            state: self.state,
            failure: self.failure,
            station_state: self.station_state,
            visibility: Visibility::from_count(self.members.len()),
            endpoint_count: self.members.len(),
            signal: self.signal(),
        }
    }
}

/// Serializable view of a service handed to the policy layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSnapshot {
    pub id: ServiceId,
    pub ssid: String,
    pub ssid_hex: String,
    pub mode: NetworkMode,
    pub security: Security,
    pub hidden: bool,
    pub favorite: bool,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub station_state: StationState,
    pub visibility: Visibility,
    pub endpoint_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i16>,
}

/// Policy request to find or create a service by its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub ssid: Ssid,
    pub mode: NetworkMode,
    pub security: Security,
    pub hidden: bool,
}

/// Policy-owned attributes of a service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSettings {
    pub favorite: Option<bool>,
    pub credentials: Option<PropertyMap>,
}

/// What happened to a service after one of its endpoints went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The endpoint was not a member
    NotMember,
    /// Other endpoints remain
    Remaining,
    /// No endpoints remain but the service is kept (hidden favorite)
    Retained,
    /// No endpoints remain and the service was removed
    Destroyed,
}

/// Ordered registry of live services
#[derive(Debug)]
pub struct ServiceDirectory {
    services: BTreeMap<ServiceId, Service>,
    by_key: HashMap<ServiceKey, ServiceId>,
    next_id: u32,
    registration: RegistrationPolicy,
    notifier: Notifier,
}

impl ServiceDirectory {
    pub fn new(registration: RegistrationPolicy, notifier: Notifier) -> Self {
        Self {
            services: BTreeMap::new(),
            by_key: HashMap::new(),
            next_id: 0,
            registration,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn get(&self, id: ServiceId) -> Option<&Service> {
        self.services.get(&id)
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.services.contains_key(&id)
    }

    pub fn find(&self, key: &ServiceKey) -> Option<ServiceId> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        self.services.values().map(Service::snapshot).collect()
    }

    fn create(&mut self, key: ServiceKey) -> ServiceId {
        let id = ServiceId(self.next_id);
        self.next_id += 1;

        debug!(%id, ssid = %key.ssid, security = %key.security, "service created");
        self.by_key.insert(key.clone(), id);
        self.services.insert(id, Service::new(id, key));
        id
    }

    fn register(&mut self, id: ServiceId) {
        if let Some(service) = self.services.get_mut(&id) {
            if service.registered {
                return;
            }
            service.registered = true;
            info!(%id, ssid = %service.ssid, "service registered");
            self.notifier
                .send(Notification::ServiceRegistered(service.snapshot()));
        }
    }

    fn notify_updated(&self, id: ServiceId) {
        if let Some(service) = self.services.get(&id)
            && service.registered
        {
            self.notifier
                .send(Notification::ServiceUpdated(service.snapshot()));
        }
    }

    /// Group an endpoint into the service matching its key, creating one if needed
    ///
    /// Endpoints without an SSID are never grouped.
    pub fn attach_endpoint(&mut self, endpoint: &Endpoint) -> Option<ServiceId> {
        if endpoint.ssid.is_empty() {
            debug!(handle = %endpoint.handle, "endpoint without SSID left ungrouped");
            return None;
        }

        let key = endpoint.key();
        let id = match self.find(&key) {
            Some(id) => id,
            None => self.create(key),
        };

        let registered = match self.services.get_mut(&id) {
            Some(service) => {
                service
                    .members
                    .insert(endpoint.handle.clone(), endpoint.signal);
                service.registered
            }
            None => return None,
        };

        if registered {
            self.notify_updated(id);
        } else if self.registration == RegistrationPolicy::PerEvent {
            self.register(id);
        }
        Some(id)
    }

    /// Refresh the signal of a member endpoint
    pub fn refresh_endpoint(&mut self, id: ServiceId, endpoint: &Endpoint) {
        if let Some(service) = self.services.get_mut(&id)
            && let Some(signal) = service.members.get_mut(&endpoint.handle)
        {
            *signal = endpoint.signal;
            self.notify_updated(id);
        }
    }

    /// Remove an endpoint from its service, destroying the service when it empties
    pub fn detach_endpoint(&mut self, id: ServiceId, handle: &EndpointHandle) -> Detached {
        let Some(service) = self.services.get_mut(&id) else {
            return Detached::NotMember;
        };
        if service.members.remove(handle).is_none() {
            return Detached::NotMember;
        }
        if service.current_endpoint.as_ref() == Some(handle) {
            service.current_endpoint = None;
        }

        if !service.members.is_empty() {
            self.notify_updated(id);
            Detached::Remaining
        } else if service.hidden && service.favorite {
            debug!(%id, "hidden favorite service kept without endpoints");
            self.notify_updated(id);
            Detached::Retained
        } else {
            self.remove(id);
            Detached::Destroyed
        }
    }

    /// Destroy a service, deregistering it if it was announced
    pub fn remove(&mut self, id: ServiceId) -> Option<Service> {
        let service = self.services.remove(&id)?;
        self.by_key.remove(&service.key());
        info!(%id, ssid = %service.ssid, "service removed");
        if service.registered {
            self.notifier
                .send(Notification::ServiceDeregistered(ServiceDeregisteredParams { id }));
        }
        Some(service)
    }

    /// Find or create a service on behalf of the policy layer
    pub fn get_or_create(&mut self, request: ServiceRequest) -> ServiceId {
        let key = ServiceKey {
            ssid: request.ssid,
            mode: request.mode,
            security: request.security,
        };
        if let Some(id) = self.find(&key) {
            if request.hidden {
                self.mark_hidden(id);
            }
            return id;
        }

        let id = self.create(key);
        if request.hidden {
            if let Some(service) = self.services.get_mut(&id) {
                service.hidden = true;
            }
            // Hidden services never show up in a scan; announce them now.
            self.register(id);
        }
        id
    }

    /// An existing service turned out to be hidden; probe for it from now on
    fn mark_hidden(&mut self, id: ServiceId) {
        let Some(service) = self.services.get_mut(&id) else {
            return;
        };
        if service.hidden {
            return;
        }
        debug!(%id, ssid = %service.ssid, "service marked hidden");
        service.hidden = true;
        if service.registered {
            self.notify_updated(id);
        } else {
            self.register(id);
        }
    }

    /// Apply policy-owned settings; returns false when nothing changed
    pub fn configure(&mut self, id: ServiceId, settings: ServiceSettings) -> Option<bool> {
        let service = self.services.get_mut(&id)?;
        let mut changed = false;
        if let Some(favorite) = settings.favorite
            && service.favorite != favorite
        {
            service.favorite = favorite;
            changed = true;
        }
        if let Some(credentials) = settings.credentials
            && service.credentials != credentials
        {
            service.credentials = credentials;
            changed = true;
        }

        if changed {
            self.notify_updated(id);
        }
        Some(changed)
    }

    /// Recreate hidden services from stored profiles, returning how many were added
    pub fn load_hidden_services(&mut self, profiles: &[StoredProfile]) -> usize {
        let mut created = 0;
        for profile in profiles {
            if profile.hidden != Some(true) {
                continue;
            }
            let Some(ssid) = profile.ssid.as_deref().filter(|ssid| !ssid.is_empty()) else {
                debug!("hidden profile without SSID skipped");
                continue;
            };

            let key = ServiceKey {
                ssid: Ssid::from(ssid),
                mode: profile.mode.unwrap_or(NetworkMode::Infrastructure),
                security: profile.security.unwrap_or(Security::Open),
            };
            if self.find(&key).is_some() {
                debug!(ssid, "hidden profile already has a service");
                continue;
            }

            let id = self.create(key);
            if let Some(service) = self.services.get_mut(&id) {
                service.hidden = true;
                service.favorite = true;
            }
            self.register(id);
            created += 1;
        }

        if created > 0 {
            info!(count = created, "hidden services loaded");
        }
        created
    }

    /// SSIDs that must be probed explicitly
    pub fn hidden_ssids(&self) -> Vec<Vec<u8>> {
        self.services
            .values()
            .filter(|service| service.hidden && service.favorite)
            .map(|service| service.ssid.as_bytes().to_vec())
            .collect()
    }

    /// Announce every grouped service not yet registered
    pub fn register_grouped(&mut self) {
        let unregistered: Vec<ServiceId> = self
            .services
            .values()
            .filter(|service| !service.registered && service.endpoint_count() > 0)
            .map(|service| service.id)
            .collect();
        for id in unregistered {
            self.register(id);
        }
    }

    /// Set the connection state; the failure reason is kept only for `Failure`
    pub fn set_state(&mut self, id: ServiceId, state: ServiceState) {
        let Some(service) = self.services.get_mut(&id) else {
            return;
        };
        if service.state == state && (state == ServiceState::Failure || service.failure.is_none())
        {
            return;
        }

        debug!(%id, from = %service.state, to = %state, "service state");
        service.state = state;
        if state != ServiceState::Failure {
            service.failure = None;
        }
        if state.is_connected() {
            service.has_ever_connected = true;
        }
        self.notify_updated(id);
    }

    /// Move forward only; returns whether the state changed
    pub fn advance_state(&mut self, id: ServiceId, state: ServiceState) -> bool {
        match self.services.get(&id) {
            Some(service) if state.is_forward_of(service.state) => {
                self.set_state(id, state);
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self, id: ServiceId, reason: FailureReason) {
        let Some(service) = self.services.get_mut(&id) else {
            return;
        };
        info!(%id, ssid = %service.ssid, ?reason, "service failed");
        service.state = ServiceState::Failure;
        service.failure = Some(reason);
        self.notify_updated(id);
    }

    pub fn set_station_state(&mut self, id: ServiceId, state: StationState) {
        if let Some(service) = self.services.get_mut(&id) {
            service.station_state = state;
        }
    }

    pub fn set_current_endpoint(&mut self, id: ServiceId, handle: Option<EndpointHandle>) {
        if let Some(service) = self.services.get_mut(&id) {
            service.current_endpoint = handle;
        }
    }

    /// Drop every service, deregistering the announced ones
    pub fn clear(&mut self) {
        let ids: Vec<ServiceId> = self.services.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }
}

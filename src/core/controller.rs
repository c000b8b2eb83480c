//! Connection controller
//!
//! Owns the current and pending service slots. Every input (station events,
//! command replies, timer expirations, policy requests) is handled to
//! completion by one dispatcher task, so nothing here is locked. Outbound
//! calls are queued as [`Command`]s and never awaited; their results come back
//! later through [`Controller::handle_reply`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    backend::{
        Command, CommandReply, StationEvent,
        properties::{self, PropertyMap, PropertyValue, interface, network, scan},
    },
    config::{
        ConfigUpdate, RegistrationPolicy, StationConfig, StoredProfile,
        settings::MAX_BSS_RESUME_AGE_SECS,
    },
    core::{
        directory::{Detached, ServiceDirectory, ServiceRequest, ServiceSettings, ServiceSnapshot},
        dispatcher::Event,
        endpoint::{Discovery, EndpointRegistry},
        error::{ControllerError, ControllerResult},
        notification::{EapEventParams, Notification, Notifier},
        timers::{ScanSchedule, TimerFired, TimerKind, Timers},
        types::{
            AttemptId, Connectivity, EndpointHandle, FailureReason, NetworkHandle, Outcome,
            Security, ServiceId, ServiceState, StationState,
        },
    },
};

/// Snapshot of the controller's own bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub station_state: StationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_service: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_service: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_bss: Option<EndpointHandle>,
    pub scan_pending: bool,
    pub service_count: usize,
    pub endpoint_count: usize,
}

/// The connection state machine of one wireless interface
#[derive(Debug)]
pub struct Controller {
    config: StationConfig,
    endpoints: EndpointRegistry,
    directory: ServiceDirectory,
    commands: mpsc::UnboundedSender<Command>,
    timers: Timers,
    schedule: ScanSchedule,

    station_state: StationState,
    current_bss: Option<EndpointHandle>,
    current: Option<ServiceId>,
    pending: Option<ServiceId>,
    /// Service the policy layer asked to disconnect; its BSS loss ends in Idle
    disconnecting: Option<ServiceId>,

    next_attempt: u64,
    /// Live attempt per service; replies for any other attempt are stale
    attempts: HashMap<ServiceId, AttemptId>,
    networks: HashMap<ServiceId, NetworkHandle>,
    attempt_completed: bool,

    scan_pending: bool,
    resumed_at: Option<Instant>,
}

impl Controller {
    pub fn new(
        config: StationConfig,
        notifier: Notifier,
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let schedule = ScanSchedule::new(config.fast_scan_attempts, config.fast_scan_interval);
        Self {
            directory: ServiceDirectory::new(config.registration, notifier),
            config,
            endpoints: EndpointRegistry::new(),
            commands,
            timers: Timers::new(events),
            schedule,
            station_state: StationState::Unknown,
            current_bss: None,
            current: None,
            pending: None,
            disconnecting: None,
            next_attempt: 0,
            attempts: HashMap::new(),
            networks: HashMap::new(),
            attempt_completed: false,
            scan_pending: false,
            resumed_at: None,
        }
    }

    /// Take over the interface state read at startup
    pub fn seed(&mut self, properties: &PropertyMap) {
        if let Ok(state) = properties::get_str(properties, interface::STATE) {
            match StationState::parse(state) {
                Ok(state) => self.station_state = state,
                Err(error) => warn!(%error, "ignoring initial station state"),
            }
        }
        if let Ok(path) = properties::get_str(properties, interface::CURRENT_BSS)
            && path != interface::NULL_PATH
        {
            self.current_bss = Some(EndpointHandle(path.to_string()));
        }
        debug!(state = %self.station_state, bss = ?self.current_bss, "interface state seeded");
    }

    pub fn load_hidden_services(&mut self, profiles: &[StoredProfile]) -> usize {
        self.directory.load_hidden_services(profiles)
    }

    /// Scan once and start the periodic scan cadence
    pub fn start(&mut self) {
        info!("connection controller started");
        if !self.scan_pending {
            self.issue_scan();
        }
        self.restart_fast_scan();
    }

    /// Tear down: timers first, then slots, services and endpoints
    pub fn stop(&mut self) {
        self.timers.cancel_all();
        self.current = None;
        self.pending = None;
        self.disconnecting = None;
        self.attempts.clear();
        self.networks.clear();
        self.scan_pending = false;
        self.resumed_at = None;
        self.directory.clear();
        self.endpoints.clear();
        info!("connection controller stopped");
    }

    /// The station process went away; every handle it issued is void
    pub fn station_lost(&mut self) {
        warn!("station process vanished, resetting connection state");
        self.timers.cancel_all();
        for id in [self.current.take(), self.pending.take()].into_iter().flatten() {
            self.directory.set_current_endpoint(id, None);
            self.directory.set_state(id, ServiceState::Idle);
        }
        self.disconnecting = None;
        self.attempts.clear();
        // entries died with the process, nothing to remove
        self.networks.clear();
        self.attempt_completed = false;
        self.scan_pending = false;
        self.resumed_at = None;
        self.station_state = StationState::Unknown;
        self.current_bss = None;

        for endpoint in self.endpoints.drain() {
            if let Some(id) = endpoint.service {
                self.directory.detach_endpoint(id, &endpoint.handle);
            }
        }
    }

    /// The station process is back and was brought to a known state
    pub fn station_restored(&mut self, properties: &PropertyMap) {
        info!("station process reappeared");
        self.seed(properties);
        self.start();
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.directory.notifier().subscribe()
    }

    // Queries

    pub fn services(&self) -> Vec<ServiceSnapshot> {
        self.directory.snapshots()
    }

    pub fn service(&self, id: ServiceId) -> Option<ServiceSnapshot> {
        self.directory.get(id).map(|service| service.snapshot())
    }

    pub fn current_service(&self) -> Option<ServiceId> {
        self.current
    }

    pub fn pending_service(&self) -> Option<ServiceId> {
        self.pending
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            station_state: self.station_state,
            current_service: self.current,
            pending_service: self.pending,
            current_bss: self.current_bss.clone(),
            scan_pending: self.scan_pending,
            service_count: self.directory.len(),
            endpoint_count: self.endpoints.len(),
        }
    }

    // Policy operations

    /// Find or create the service for `request`
    pub fn get_service(&mut self, request: ServiceRequest) -> ControllerResult<ServiceSnapshot> {
        let id = self.directory.get_or_create(request);
        self.service(id).ok_or(ControllerError::UnknownService(id))
    }

    pub fn configure_service(
        &mut self,
        id: ServiceId,
        settings: ServiceSettings,
    ) -> ControllerResult<Outcome> {
        match self.directory.configure(id, settings) {
            Some(true) => Ok(Outcome::Done),
            Some(false) => Ok(Outcome::AlreadyInState),
            None => Err(ControllerError::UnknownService(id)),
        }
    }

    pub fn connect_to(&mut self, id: ServiceId) -> ControllerResult<Outcome> {
        if !self.directory.contains(id) {
            return Err(ControllerError::UnknownService(id));
        }
        if self.current == Some(id) || self.pending == Some(id) {
            debug!(%id, "connect ignored, already current or pending");
            return Ok(Outcome::AlreadyInState);
        }
        let params = self.network_params(id);

        if let Some(previous) = self.pending.take() {
            info!(%previous, next = %id, "abandoning pending connection");
            self.timers.stop(TimerKind::Pending);
            self.directory.set_state(previous, ServiceState::Idle);
            self.release_network(previous);
            self.issue(Command::Disconnect { service: None });
        }
        self.release_network(id);

        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        self.attempts.insert(id, attempt);
        self.attempt_completed = false;
        if self.disconnecting == Some(id) {
            self.disconnecting = None;
        }

        info!(%id, attempt = attempt.0, "connecting");
        self.issue(Command::Connect {
            attempt,
            service: id,
            params,
        });
        self.pending = Some(id);
        self.directory.set_state(id, ServiceState::Associating);
        self.timers
            .start(TimerKind::Pending, self.config.pending_timeout);
        Ok(Outcome::Done)
    }

    pub fn disconnect_from(&mut self, id: ServiceId) -> ControllerResult<Outcome> {
        if !self.directory.contains(id) {
            return Err(ControllerError::UnknownService(id));
        }

        if self.pending == Some(id) {
            info!(%id, "cancelling pending connection");
            self.pending = None;
            self.timers.stop(TimerKind::Pending);
            self.directory.set_state(id, ServiceState::Idle);
            self.release_network(id);
            self.issue(Command::Disconnect { service: None });
            return Ok(Outcome::Done);
        }

        if self.current == Some(id) {
            if let Some(pending) = self.pending {
                return Err(ControllerError::InvalidOperation(format!(
                    "{id} is being replaced by pending {pending}"
                )));
            }
            info!(%id, "disconnecting");
            self.disconnecting = Some(id);
            self.timers.stop(TimerKind::Reconnect);
            self.issue(Command::Disconnect { service: Some(id) });
            return Ok(Outcome::Done);
        }

        Err(ControllerError::InvalidOperation(format!(
            "{id} is neither current nor pending"
        )))
    }

    /// Disable the service's network entry; the station process keeps its
    /// cached credentials and drops the association if there is one
    pub fn disable_service(&mut self, id: ServiceId) -> ControllerResult<Outcome> {
        if !self.directory.contains(id) {
            return Err(ControllerError::UnknownService(id));
        }
        let Some(network) = self.networks.get(&id).cloned() else {
            return Err(ControllerError::InvalidOperation(format!(
                "{id} has no network entry"
            )));
        };

        info!(%id, %network, "disabling network entry");
        if self.current == Some(id) {
            self.disconnecting = Some(id);
            self.timers.stop(TimerKind::Reconnect);
        }
        self.issue(Command::DisableNetwork { network });
        Ok(Outcome::Done)
    }

    /// Remove the service's network entry so the station process forgets the
    /// credentials it cached for it
    pub fn clear_credentials(&mut self, id: ServiceId) -> ControllerResult<Outcome> {
        if !self.directory.contains(id) {
            return Err(ControllerError::UnknownService(id));
        }
        if !self.networks.contains_key(&id) {
            return Ok(Outcome::AlreadyInState);
        }

        info!(%id, "clearing cached credentials");
        if self.pending == Some(id) {
            self.pending = None;
            self.timers.stop(TimerKind::Pending);
            self.directory.set_state(id, ServiceState::Idle);
        } else if self.current == Some(id) {
            // removing the entry drops the association
            self.disconnecting = Some(id);
            self.timers.stop(TimerKind::Reconnect);
        }
        self.release_network(id);
        Ok(Outcome::Done)
    }

    pub fn scan(&mut self) -> ControllerResult<Outcome> {
        if self.scan_pending {
            return Ok(Outcome::AlreadyInState);
        }
        self.issue_scan();
        Ok(Outcome::Done)
    }

    /// Result of address configuration for the current service
    pub fn report_connectivity(
        &mut self,
        id: ServiceId,
        connectivity: Connectivity,
    ) -> ControllerResult<Outcome> {
        if self.current != Some(id) {
            return Err(ControllerError::InvalidOperation(format!(
                "{id} is not the current service"
            )));
        }

        let state = match connectivity {
            Connectivity::Connected => ServiceState::Connected,
            Connectivity::Portal => ServiceState::Portal,
            Connectivity::Online => ServiceState::Online,
            Connectivity::Failed => {
                warn!(%id, "address configuration failed");
                self.directory.fail(id, FailureReason::Dhcp);
                self.issue(Command::Disconnect { service: None });
                return Ok(Outcome::Done);
            }
        };

        if self.directory.get(id).map(|service| service.state) == Some(state) {
            return Ok(Outcome::AlreadyInState);
        }
        self.directory.set_state(id, state);
        Ok(Outcome::Done)
    }

    pub fn update_config(&mut self, update: ConfigUpdate) -> Outcome {
        if !self.config.apply(update) {
            return Outcome::AlreadyInState;
        }
        info!(?update, "configuration updated");
        if let ConfigUpdate::ScanInterval(_) = update {
            self.arm_scan_timer();
        }
        Outcome::Done
    }

    /// The host resumed from suspend; cached BSS entries may be stale
    pub fn after_resume(&mut self) {
        info!("resumed from suspend");
        self.resumed_at = Some(Instant::now());
        self.schedule.restart();
        if self.is_idle() && !self.scan_pending {
            self.issue_scan();
        }
        self.arm_scan_timer();
    }

    // Station events

    pub fn handle_station_event(&mut self, event: StationEvent) -> ControllerResult<()> {
        match event {
            StationEvent::BssAdded { handle, properties } => {
                self.on_bss_added(handle, &properties)
            }
            StationEvent::BssRemoved { handle } => {
                self.on_bss_removed(&handle);
                Ok(())
            }
            StationEvent::PropertiesChanged(properties) => {
                self.on_properties_changed(&properties)
            }
            StationEvent::ScanDone => {
                self.on_scan_done();
                Ok(())
            }
            StationEvent::Certification(properties) => {
                self.directory
                    .notifier()
                    .send(Notification::Certification(properties));
                Ok(())
            }
            StationEvent::Eap { status, parameter } => {
                debug!(%status, %parameter, "EAP event");
                self.directory
                    .notifier()
                    .send(Notification::EapEvent(EapEventParams { status, parameter }));
                Ok(())
            }
        }
    }

    fn on_bss_added(&mut self, handle: EndpointHandle, props: &PropertyMap) -> ControllerResult<()> {
        match self.endpoints.on_discovered(handle.clone(), props)? {
            Discovery::New => self.group(&handle),
            Discovery::Refreshed { previous_key } => {
                let Some(endpoint) = self.endpoints.get(&handle).cloned() else {
                    return Ok(());
                };
                match endpoint.service {
                    Some(id) if endpoint.key() == previous_key => {
                        self.directory.refresh_endpoint(id, &endpoint);
                    }
                    Some(id) => {
                        debug!(%handle, %id, "endpoint changed security, regrouping");
                        self.detach(id, &handle);
                        self.group(&handle);
                    }
                    None => self.group(&handle),
                }
            }
        }
        Ok(())
    }

    fn group(&mut self, handle: &EndpointHandle) {
        let Some(endpoint) = self.endpoints.get(handle) else {
            return;
        };
        let id = self.directory.attach_endpoint(endpoint);
        self.endpoints.set_service(handle, id);
    }

    fn on_bss_removed(&mut self, handle: &EndpointHandle) {
        let Some(endpoint) = self.endpoints.on_removed(handle) else {
            return;
        };
        if let Some(id) = endpoint.service {
            self.detach(id, handle);
        }
    }

    /// Drop an endpoint from its service; losing the last endpoint of the
    /// active service disconnects it
    fn detach(&mut self, id: ServiceId, handle: &EndpointHandle) {
        let active = self.current == Some(id) || self.pending == Some(id);
        match self.directory.detach_endpoint(id, handle) {
            Detached::NotMember | Detached::Remaining => {}
            Detached::Retained if active => {
                info!(%id, "last endpoint of active service gone");
                if let Err(error) = self.disconnect_from(id) {
                    debug!(%error, "implicit disconnect skipped");
                }
            }
            Detached::Retained => {}
            Detached::Destroyed if active => {
                info!(%id, "active service destroyed");
                self.issue(Command::Disconnect { service: None });
                if self.current == Some(id) {
                    self.current = None;
                }
                if self.pending == Some(id) {
                    self.pending = None;
                    self.timers.stop(TimerKind::Pending);
                }
                if self.disconnecting == Some(id) {
                    self.disconnecting = None;
                }
                self.release_network(id);
            }
            Detached::Destroyed => {}
        }
    }

    fn on_properties_changed(&mut self, props: &PropertyMap) -> ControllerResult<()> {
        let mut result = Ok(());

        if props.contains_key(interface::CURRENT_BSS) {
            match properties::get_str(props, interface::CURRENT_BSS) {
                Ok(path) if path == interface::NULL_PATH => self.on_bss_lost(),
                Ok(path) => self.on_current_bss(EndpointHandle(path.to_string())),
                Err(error) => result = Err(error),
            }
        }

        if props.contains_key(interface::STATE) {
            match properties::get_str(props, interface::STATE).and_then(StationState::parse) {
                Ok(state) => self.on_state_changed(state),
                Err(error) => {
                    if result.is_ok() {
                        result = Err(error);
                    } else {
                        warn!(%error, "malformed station state");
                    }
                }
            }
        }

        result
    }

    fn on_bss_lost(&mut self) {
        self.current_bss = None;
        self.timers.stop(TimerKind::Reconnect);

        if let Some(id) = self.current.or(self.pending) {
            let phase = self.station_state;
            if self.current == Some(id) {
                self.current = None;
            }
            if self.pending == Some(id) {
                self.pending = None;
                self.timers.stop(TimerKind::Pending);
            }
            self.directory.set_current_endpoint(id, None);

            let requested = self.disconnecting == Some(id);
            let state = self.directory.get(id).map(|service| service.state);
            match state {
                _ if requested => self.directory.set_state(id, ServiceState::Idle),
                Some(ServiceState::Failure) => {}
                Some(state) if state.is_connected() => {
                    self.directory.set_state(id, ServiceState::Idle)
                }
                Some(_) => {
                    let reason = self
                        .credential_suspect(id, phase)
                        .unwrap_or(FailureReason::Unknown);
                    self.directory.fail(id, reason);
                }
                None => {}
            }
            info!(%id, requested, "association lost");

            if requested {
                self.disconnecting = None;
            }
            self.release_network(id);
        }

        self.restart_fast_scan();
        if !self.directory.hidden_ssids().is_empty() && !self.scan_pending {
            debug!("scanning for hidden services");
            self.issue_scan();
        }
    }

    fn on_current_bss(&mut self, handle: EndpointHandle) {
        self.timers.stop(TimerKind::Reconnect);
        self.current_bss = Some(handle.clone());

        let Some(endpoint) = self.endpoints.get(&handle) else {
            warn!(%handle, "current BSS is not a known endpoint");
            return;
        };
        let Some(id) = endpoint.service else {
            warn!(%handle, "current BSS belongs to no service");
            return;
        };

        if self.current == Some(id) {
            debug!(%id, %handle, "roamed within service");
            self.directory.set_current_endpoint(id, Some(handle));
            return;
        }

        if let Some(previous) = self.current.take() {
            info!(%previous, next = %id, "switched service");
            self.directory.set_current_endpoint(previous, None);
            self.directory.set_state(previous, ServiceState::Idle);
            self.release_network(previous);
            if self.disconnecting == Some(previous) {
                self.disconnecting = None;
            }
        }

        self.current = Some(id);
        if self.pending == Some(id) {
            self.pending = None;
            self.timers.stop(TimerKind::Pending);
        }
        info!(%id, %handle, "associated");
        self.directory.set_current_endpoint(id, Some(handle));
        self.directory.advance_state(id, ServiceState::Configuring);
    }

    fn on_state_changed(&mut self, state: StationState) {
        let previous = self.station_state;
        if state == previous {
            return;
        }
        self.station_state = state;
        debug!(from = %previous, to = %state, "station state");

        let affected = self.pending.or(self.current);
        if let Some(id) = affected {
            self.directory.set_station_state(id, state);
        }

        if state == StationState::Completed {
            self.timers.stop(TimerKind::Reconnect);
            self.timers.stop(TimerKind::Pending);
            self.attempt_completed = true;
            if let Some(id) = affected
                && state.is_forward_of(previous)
            {
                self.directory.advance_state(id, ServiceState::Configuring);
            }
            return;
        }

        if state.is_forward_of(previous) {
            if state.is_credential_phase()
                && let Some(id) = affected
            {
                self.directory.advance_state(id, ServiceState::Associating);
            }
            return;
        }

        if state != StationState::Disconnected {
            return;
        }

        if let Some(id) = affected
            && let Some(reason) = self.credential_suspect(id, previous)
        {
            warn!(%id, ?reason, phase = %previous, "disconnected during authentication");
            self.directory.fail(id, reason);
            if self.pending == Some(id) {
                self.pending = None;
                self.timers.stop(TimerKind::Pending);
                self.release_network(id);
            }
        }

        if let Some(id) = self.current
            && self
                .directory
                .get(id)
                .is_some_and(|service| service.state.is_connected())
        {
            debug!(%id, "link dropped, waiting for the station process to recover");
            self.timers
                .start(TimerKind::Reconnect, self.config.reconnect_timeout);
        }
    }

    fn on_scan_done(&mut self) {
        self.scan_pending = false;
        if let Some(resumed_at) = self.resumed_at.take() {
            let since_resume = u32::try_from(resumed_at.elapsed().as_secs()).unwrap_or(u32::MAX);
            let max_age_secs = MAX_BSS_RESUME_AGE_SECS.saturating_add(since_resume);
            debug!(max_age_secs, "flushing BSS entries cached before resume");
            self.issue(Command::FlushBss { max_age_secs });
        }
        if self.config.registration == RegistrationPolicy::OnScanDone {
            self.directory.register_grouped();
        }
    }

    /// Failure reason when a disconnect during `phase` points at bad credentials
    fn credential_suspect(&self, id: ServiceId, phase: StationState) -> Option<FailureReason> {
        if self.attempt_completed || !phase.is_credential_phase() {
            return None;
        }
        let service = self.directory.get(id)?;
        // credentials that worked once are not blamed for a single drop
        if service.has_ever_connected {
            return None;
        }
        match service.security {
            Security::Wpa | Security::Rsn => Some(FailureReason::BadPassphrase),
            Security::Wep => Some(FailureReason::BadWepKey),
            Security::Ieee8021x => Some(FailureReason::EapAuthentication),
            Security::Open | Security::Unknown => None,
        }
    }

    // Command replies

    pub fn handle_reply(&mut self, reply: CommandReply) -> ControllerResult<()> {
        match reply {
            CommandReply::ScanFailed(error) => {
                self.scan_pending = false;
                Err(ControllerError::RpcFailure(error))
            }

            CommandReply::NetworkSelected {
                attempt,
                service,
                network,
            } => {
                if self.attempts.get(&service) != Some(&attempt) {
                    self.issue(Command::RemoveNetwork { network });
                    return Err(ControllerError::StaleCallback(format!(
                        "network selected for superseded attempt {} of {service}",
                        attempt.0
                    )));
                }
                debug!(%service, %network, "network selected");
                self.networks.insert(service, network);
                Ok(())
            }

            CommandReply::ConnectFailed {
                attempt,
                service,
                network,
                error,
            } => {
                if let Some(network) = network {
                    self.issue(Command::RemoveNetwork { network });
                }
                if self.attempts.get(&service) != Some(&attempt) {
                    return Err(ControllerError::StaleCallback(format!(
                        "connect failure for superseded attempt {} of {service}",
                        attempt.0
                    )));
                }
                debug!(%service, "connect request failed");
                self.attempts.remove(&service);
                if self.pending == Some(service) {
                    self.pending = None;
                    self.timers.stop(TimerKind::Pending);
                }
                self.directory.fail(service, FailureReason::Connect);
                Err(ControllerError::RpcFailure(error))
            }

            CommandReply::DisconnectFailed { service, error } => {
                let Some(id) = service.filter(|id| self.current == Some(*id)) else {
                    debug!(%error, "disconnect failure for a service no longer current");
                    return Ok(());
                };
                info!(%id, "disconnect failed, cleaning up locally");
                self.current = None;
                self.current_bss = None;
                self.disconnecting = None;
                self.directory.set_current_endpoint(id, None);
                self.directory.set_state(id, ServiceState::Idle);
                self.release_network(id);
                self.restart_fast_scan();
                Err(ControllerError::RpcFailure(error))
            }

            CommandReply::CleanupFailed { operation, error } => {
                debug!(operation, %error, "cleanup call failed");
                Ok(())
            }
        }
    }

    // Timers

    pub fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            debug!(?fired, "stale timer expiration ignored");
            return;
        }

        match fired.kind {
            TimerKind::Scan => {
                if self.is_idle() && !self.scan_pending {
                    self.issue_scan();
                    self.schedule.consume();
                }
                self.arm_scan_timer();
            }
            TimerKind::Pending => {
                if let Some(id) = self.pending.take() {
                    warn!(%id, "connection attempt timed out");
                    self.directory.fail(id, FailureReason::OutOfRange);
                    self.release_network(id);
                    self.issue(Command::Disconnect { service: None });
                }
            }
            TimerKind::Reconnect => {
                if let Some(id) = self.current {
                    warn!(%id, "link did not recover");
                    self.directory.fail(id, FailureReason::Connect);
                    self.issue(Command::Disconnect { service: None });
                }
            }
        }
    }

    // Helpers

    fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_none()
    }

    fn issue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("command worker is gone, dropping command");
        }
    }

    fn issue_scan(&mut self) {
        let mut ssids = self.directory.hidden_ssids();
        // Broadcast probe
        ssids.push(Vec::new());

        let mut args = PropertyMap::new();
        args.insert(
            scan::TYPE.into(),
            PropertyValue::String(scan::TYPE_ACTIVE.into()),
        );
        args.insert(scan::SSIDS.into(), PropertyValue::ByteArrays(ssids));

        debug!("requesting scan");
        self.scan_pending = true;
        self.issue(Command::Scan { args });
    }

    fn restart_fast_scan(&mut self) {
        self.schedule.restart();
        self.arm_scan_timer();
    }

    fn arm_scan_timer(&mut self) {
        match self.schedule.interval(self.config.scan_interval_secs) {
            Some(after) => self.timers.start(TimerKind::Scan, after),
            None => {
                self.timers.stop(TimerKind::Scan);
            }
        }
    }

    /// Forget the service's attempt and remove its network entry, if any
    fn release_network(&mut self, id: ServiceId) {
        self.attempts.remove(&id);
        if let Some(network) = self.networks.remove(&id) {
            debug!(%id, %network, "releasing network entry");
            self.issue(Command::RemoveNetwork { network });
        }
    }

    fn network_params(&self, id: ServiceId) -> PropertyMap {
        let Some(service) = self.directory.get(id) else {
            return PropertyMap::new();
        };

        let mut params = service.credentials.clone();
        params.insert(
            network::SSID.into(),
            PropertyValue::Bytes(service.ssid.as_bytes().to_vec()),
        );
        params.insert(
            network::SCAN_SSID.into(),
            PropertyValue::U32(u32::from(service.hidden)),
        );
        params.insert(
            network::MODE.into(),
            PropertyValue::U32(service.mode.network_mode()),
        );
        params
            .entry(network::KEY_MGMT.into())
            .or_insert_with(|| PropertyValue::String(service.security.key_management().into()));
        params.insert(
            network::BGSCAN.into(),
            PropertyValue::String(self.config.bgscan()),
        );
        params
    }
}

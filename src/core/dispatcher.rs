//! Event dispatcher
//!
//! One task owns the [`Controller`] and handles [`Event`]s strictly one at a
//! time. Station events, command replies, timer expirations and policy
//! requests all arrive on the same channel.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{CommandReply, CommandWorker, StationBackend, StationEvent, properties::PropertyMap},
    config::{ConfigUpdate, StationConfig, StoredProfile},
    core::{
        controller::{Controller, DeviceStatus},
        directory::{ServiceRequest, ServiceSettings, ServiceSnapshot},
        error::{ControllerError, ControllerResult, StationResult},
        notification::{Notification, Notifier},
        timers::TimerFired,
        types::{Connectivity, Outcome, ServiceId},
    },
};

/// Everything the dispatcher reacts to
#[derive(Debug)]
pub enum Event {
    Station(StationEvent),
    /// The station event stream ended
    StationLost,
    /// The station process is reachable again; carries its interface properties
    StationRestored(PropertyMap),
    Reply(CommandReply),
    Timer(TimerFired),
    Request(Request),
}

type Reply<T> = oneshot::Sender<T>;

/// Policy-layer request with its reply channel
#[derive(Debug)]
pub enum Request {
    ConnectTo {
        service: ServiceId,
        reply: Reply<ControllerResult<Outcome>>,
    },
    DisconnectFrom {
        service: ServiceId,
        reply: Reply<ControllerResult<Outcome>>,
    },
    DisableService {
        service: ServiceId,
        reply: Reply<ControllerResult<Outcome>>,
    },
    ClearCredentials {
        service: ServiceId,
        reply: Reply<ControllerResult<Outcome>>,
    },
    Scan {
        reply: Reply<ControllerResult<Outcome>>,
    },
    GetService {
        request: ServiceRequest,
        reply: Reply<ControllerResult<ServiceSnapshot>>,
    },
    ConfigureService {
        service: ServiceId,
        settings: ServiceSettings,
        reply: Reply<ControllerResult<Outcome>>,
    },
    ReportConnectivity {
        service: ServiceId,
        connectivity: Connectivity,
        reply: Reply<ControllerResult<Outcome>>,
    },
    UpdateConfig {
        update: ConfigUpdate,
        reply: Reply<Outcome>,
    },
    AfterResume {
        reply: Reply<()>,
    },
    Services {
        reply: Reply<Vec<ServiceSnapshot>>,
    },
    Service {
        service: ServiceId,
        reply: Reply<Option<ServiceSnapshot>>,
    },
    Status {
        reply: Reply<DeviceStatus>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Bring the station interface to a known state and start dispatching
///
/// The backend calls made here complete before any event is handled.
pub async fn start<B: StationBackend>(
    backend: Arc<B>,
    config: StationConfig,
    profiles: &[StoredProfile],
) -> StationResult<DeviceHandle> {
    let (station_events, interface) = attach(backend.as_ref()).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let notifier = Notifier::new(config.notification_capacity);
    let retry = config.station_retry_interval;

    let mut controller = Controller::new(config, notifier.clone(), commands_tx, events_tx.clone());
    controller.seed(&interface);
    controller.load_hidden_services(profiles);

    let replies = events_tx.clone();
    tokio::spawn(CommandWorker::new(backend.clone()).run(commands_rx, move |reply| {
        let _ = replies.send(Event::Reply(reply));
    }));

    let station = tokio::spawn(watch_station(
        backend,
        station_events,
        events_tx.clone(),
        retry,
    ));

    controller.start();
    tokio::spawn(run(controller, events_rx, station));

    Ok(DeviceHandle {
        events: events_tx,
        notifier,
    })
}

/// Subscribe to events and bring the interface to a known state
async fn attach<B: StationBackend>(
    backend: &B,
) -> StationResult<(BoxStream<'static, StationEvent>, PropertyMap)> {
    let station_events = backend.events().await?;
    backend.remove_all_networks().await?;
    backend.flush_bss(0).await?;
    let interface = backend.interface_properties().await?;
    Ok((station_events, interface))
}

/// Forward station events; when the stream ends, re-attach every `retry`
/// until the station process answers again
async fn watch_station<B: StationBackend>(
    backend: Arc<B>,
    mut station_events: BoxStream<'static, StationEvent>,
    events: mpsc::UnboundedSender<Event>,
    retry: Duration,
) {
    loop {
        while let Some(event) = station_events.next().await {
            if events.send(Event::Station(event)).is_err() {
                return;
            }
        }
        warn!("station event stream ended");
        if events.send(Event::StationLost).is_err() {
            return;
        }

        let interface = loop {
            match attach(backend.as_ref()).await {
                Ok((stream, interface)) => {
                    station_events = stream;
                    break interface;
                }
                Err(error) => {
                    debug!(%error, ?retry, "station process still unavailable");
                    tokio::time::sleep(retry).await;
                }
            }
        };
        if events.send(Event::StationRestored(interface)).is_err() {
            return;
        }
    }
}

async fn run(
    mut controller: Controller,
    mut events: mpsc::UnboundedReceiver<Event>,
    station: JoinHandle<()>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Station(event) => {
                if let Err(error) = controller.handle_station_event(event) {
                    warn!(%error, "station event dropped");
                }
            }
            Event::StationLost => controller.station_lost(),
            Event::StationRestored(interface) => controller.station_restored(&interface),
            Event::Reply(reply) => match controller.handle_reply(reply) {
                Ok(()) => {}
                Err(error @ ControllerError::StaleCallback(_)) => {
                    debug!(%error, "command reply ignored");
                }
                Err(error) => warn!(%error, "station call failed"),
            },
            Event::Timer(fired) => controller.handle_timer(fired),
            Event::Request(Request::Shutdown { reply }) => {
                controller.stop();
                let _ = reply.send(());
                break;
            }
            Event::Request(request) => handle_request(&mut controller, request),
        }
    }

    station.abort();
    info!("dispatcher stopped");
}

fn handle_request(controller: &mut Controller, request: Request) {
    // A dropped reply receiver only means the caller stopped waiting.
    match request {
        Request::ConnectTo { service, reply } => {
            let _ = reply.send(controller.connect_to(service));
        }
        Request::DisconnectFrom { service, reply } => {
            let _ = reply.send(controller.disconnect_from(service));
        }
        Request::DisableService { service, reply } => {
            let _ = reply.send(controller.disable_service(service));
        }
        Request::ClearCredentials { service, reply } => {
            let _ = reply.send(controller.clear_credentials(service));
        }
        Request::Scan { reply } => {
            let _ = reply.send(controller.scan());
        }
        Request::GetService { request, reply } => {
            let _ = reply.send(controller.get_service(request));
        }
        Request::ConfigureService {
            service,
            settings,
            reply,
        } => {
            let _ = reply.send(controller.configure_service(service, settings));
        }
        Request::ReportConnectivity {
            service,
            connectivity,
            reply,
        } => {
            let _ = reply.send(controller.report_connectivity(service, connectivity));
        }
        Request::UpdateConfig { update, reply } => {
            let _ = reply.send(controller.update_config(update));
        }
        Request::AfterResume { reply } => {
            controller.after_resume();
            let _ = reply.send(());
        }
        Request::Services { reply } => {
            let _ = reply.send(controller.services());
        }
        Request::Service { service, reply } => {
            let _ = reply.send(controller.service(service));
        }
        Request::Status { reply } => {
            let _ = reply.send(controller.status());
        }
        Request::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

/// Policy-layer handle to a running device
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    events: mpsc::UnboundedSender<Event>,
    notifier: Notifier,
}

impl DeviceHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> ControllerResult<T> {
        request(&self.events, build).await
    }

    pub async fn connect_to(&self, service: ServiceId) -> ControllerResult<Outcome> {
        self.request(|reply| Request::ConnectTo { service, reply })
            .await?
    }

    pub async fn disconnect_from(&self, service: ServiceId) -> ControllerResult<Outcome> {
        self.request(|reply| Request::DisconnectFrom { service, reply })
            .await?
    }

    pub async fn disable_service(&self, service: ServiceId) -> ControllerResult<Outcome> {
        self.request(|reply| Request::DisableService { service, reply })
            .await?
    }

    pub async fn clear_credentials(&self, service: ServiceId) -> ControllerResult<Outcome> {
        self.request(|reply| Request::ClearCredentials { service, reply })
            .await?
    }

    pub async fn scan(&self) -> ControllerResult<Outcome> {
        self.request(|reply| Request::Scan { reply }).await?
    }

    pub async fn get_service(&self, request: ServiceRequest) -> ControllerResult<ServiceSnapshot> {
        self.request(|reply| Request::GetService { request, reply })
            .await?
    }

    pub async fn configure_service(
        &self,
        service: ServiceId,
        settings: ServiceSettings,
    ) -> ControllerResult<Outcome> {
        self.request(|reply| Request::ConfigureService {
            service,
            settings,
            reply,
        })
        .await?
    }

    pub async fn report_connectivity(
        &self,
        service: ServiceId,
        connectivity: Connectivity,
    ) -> ControllerResult<Outcome> {
        self.request(|reply| Request::ReportConnectivity {
            service,
            connectivity,
            reply,
        })
        .await?
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> ControllerResult<Outcome> {
        self.request(|reply| Request::UpdateConfig { update, reply })
            .await
    }

    pub async fn after_resume(&self) -> ControllerResult<()> {
        self.request(|reply| Request::AfterResume { reply }).await
    }

    pub async fn services(&self) -> ControllerResult<Vec<ServiceSnapshot>> {
        self.request(|reply| Request::Services { reply }).await
    }

    pub async fn service_snapshot(&self, service: ServiceId) -> ControllerResult<ServiceSnapshot> {
        self.request(|reply| Request::Service { service, reply })
            .await?
            .ok_or(ControllerError::UnknownService(service))
    }

    pub async fn status(&self) -> ControllerResult<DeviceStatus> {
        self.request(|reply| Request::Status { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Handle for one service that does not keep the device alive
    pub fn service(&self, id: ServiceId) -> ServiceHandle {
        ServiceHandle {
            id,
            events: self.events.downgrade(),
        }
    }

    /// Stop the controller; later requests fail with `DeviceGone`
    pub async fn shutdown(&self) -> ControllerResult<()> {
        self.request(|reply| Request::Shutdown { reply }).await
    }
}

/// Service-scoped operations
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    id: ServiceId,
    events: mpsc::WeakUnboundedSender<Event>,
}

impl ServiceHandle {
    pub fn id(&self) -> ServiceId {
        self.id
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> ControllerResult<T> {
        let events = self.events.upgrade().ok_or(ControllerError::DeviceGone)?;
        request(&events, build).await
    }

    pub async fn connect(&self) -> ControllerResult<Outcome> {
        let service = self.id;
        self.request(|reply| Request::ConnectTo { service, reply })
            .await?
    }

    pub async fn disconnect(&self) -> ControllerResult<Outcome> {
        let service = self.id;
        self.request(|reply| Request::DisconnectFrom { service, reply })
            .await?
    }

    pub async fn snapshot(&self) -> ControllerResult<ServiceSnapshot> {
        let service = self.id;
        self.request(|reply| Request::Service { service, reply })
            .await?
            .ok_or(ControllerError::UnknownService(service))
    }
}

async fn request<T>(
    events: &mpsc::UnboundedSender<Event>,
    build: impl FnOnce(Reply<T>) -> Request,
) -> ControllerResult<T> {
    let (tx, rx) = oneshot::channel();
    events
        .send(Event::Request(build(tx)))
        .map_err(|_| ControllerError::DeviceGone)?;
    rx.await.map_err(|_| ControllerError::DeviceGone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            MockStationBackend,
            mock_backend::StationCall,
            properties::{PropertyMap, PropertyValue, interface, scan},
        },
        core::{
            endpoint::tests::bss_properties,
            types::{EndpointHandle, NetworkMode, Security, ServiceState, Ssid},
        },
    };
    use pretty_assertions::assert_eq;

    fn bss(n: u8) -> EndpointHandle {
        EndpointHandle(format!("/fi/w1/wpa_supplicant1/Interfaces/0/BSSs/{n}"))
    }

    async fn next_registered(notifications: &mut broadcast::Receiver<Notification>) -> ServiceSnapshot {
        loop {
            if let Notification::ServiceRegistered(snapshot) = notifications.recv().await.unwrap() {
                return snapshot;
            }
        }
    }

    async fn started(profiles: &[StoredProfile]) -> (MockStationBackend, DeviceHandle) {
        let backend = MockStationBackend::new();
        let device = start(Arc::new(backend.clone()), StationConfig::default(), profiles)
            .await
            .unwrap();
        (backend, device)
    }

    #[tokio::test]
    async fn test_startup_sequence() {
        let profiles = [StoredProfile {
            ssid: Some("attic".into()),
            hidden: Some(true),
            mode: None,
            security: None,
        }];
        let (backend, device) = started(&profiles).await;

        let calls = backend.wait_for_calls(3).await;
        assert_eq!(calls[0], StationCall::RemoveAllNetworks);
        assert_eq!(calls[1], StationCall::FlushBss(0));
        let StationCall::Scan(args) = &calls[2] else {
            panic!("expected a scan, got {:?}", calls[2]);
        };
        assert_eq!(
            args[scan::SSIDS],
            PropertyValue::ByteArrays(vec![b"attic".to_vec(), Vec::new()])
        );

        let services = device.services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert!(services[0].hidden);
        assert!(device.status().await.unwrap().scan_pending);

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_through_handle() {
        let (backend, device) = started(&[]).await;
        let mut notifications = device.subscribe();

        backend
            .emit(StationEvent::BssAdded {
                handle: bss(1),
                properties: bss_properties(
                    "home",
                    [2, 0, 0, 0, 0, 1],
                    -45,
                    "infrastructure",
                    Security::Rsn,
                ),
            })
            .await;
        let snapshot = next_registered(&mut notifications).await;
        assert_eq!(snapshot.ssid, "home");

        let service = device.service(snapshot.id);
        assert_eq!(service.connect().await.unwrap(), Outcome::Done);

        let calls = backend.wait_for_calls(5).await;
        assert!(matches!(calls[3], StationCall::AddNetwork(_)));
        assert!(matches!(calls[4], StationCall::SelectNetwork(_)));

        let mut props = PropertyMap::new();
        props.insert(interface::CURRENT_BSS.into(), PropertyValue::ObjectPath(bss(1).0));
        props.insert(interface::STATE.into(), PropertyValue::String("completed".into()));
        backend.emit(StationEvent::PropertiesChanged(props)).await;

        loop {
            let status = device.status().await.unwrap();
            if status.current_service == Some(snapshot.id) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            device
                .report_connectivity(snapshot.id, Connectivity::Online)
                .await
                .unwrap(),
            Outcome::Done
        );
        assert_eq!(service.snapshot().await.unwrap().state, ServiceState::Online);

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_service_creates_hidden_service() {
        let (_backend, device) = started(&[]).await;

        let request = ServiceRequest {
            ssid: Ssid::from("vault"),
            mode: NetworkMode::Infrastructure,
            security: Security::Wpa,
            hidden: true,
        };
        let created = device.get_service(request.clone()).await.unwrap();
        let again = device.get_service(request).await.unwrap();

        assert_eq!(created.id, again.id);
        assert!(created.hidden);
        assert_eq!(
            device
                .configure_service(
                    created.id,
                    ServiceSettings {
                        favorite: Some(true),
                        credentials: None,
                    }
                )
                .await
                .unwrap(),
            Outcome::Done
        );
        assert!(device.service_snapshot(created.id).await.unwrap().favorite);

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let (_backend, device) = started(&[]).await;
        let service = device.service(ServiceId(0));

        device.shutdown().await.unwrap();

        assert_eq!(device.scan().await, Err(ControllerError::DeviceGone));
        assert_eq!(service.connect().await, Err(ControllerError::DeviceGone));
    }

    #[tokio::test]
    async fn test_service_handle_after_device_dropped() {
        let (_backend, device) = started(&[]).await;
        let service = device.service(ServiceId(0));
        device.shutdown().await.unwrap();
        drop(device);

        assert_eq!(service.snapshot().await, Err(ControllerError::DeviceGone));
    }

    #[tokio::test]
    async fn test_startup_failure_is_reported() {
        let backend = MockStationBackend::new();
        // consume the single subscription so start cannot subscribe
        let _events = backend.events().await.unwrap();

        let result = start(Arc::new(backend), StationConfig::default(), &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_station_restart_resets_and_reseeds() {
        let (backend, device) = started(&[]).await;
        let mut notifications = device.subscribe();

        backend
            .emit(StationEvent::BssAdded {
                handle: bss(1),
                properties: bss_properties(
                    "home",
                    [2, 0, 0, 0, 0, 1],
                    -45,
                    "infrastructure",
                    Security::Open,
                ),
            })
            .await;
        let snapshot = next_registered(&mut notifications).await;
        device.connect_to(snapshot.id).await.unwrap();
        backend.wait_for_calls(5).await;
        backend.clear_calls().await;

        backend.vanish().await;

        loop {
            if let Notification::ServiceDeregistered(params) = notifications.recv().await.unwrap() {
                assert_eq!(params.id, snapshot.id);
                break;
            }
        }
        let calls = backend.wait_for_calls(3).await;
        assert_eq!(calls[0], StationCall::RemoveAllNetworks);
        assert_eq!(calls[1], StationCall::FlushBss(0));
        assert!(matches!(calls[2], StationCall::Scan(_)));

        let status = device.status().await.unwrap();
        assert_eq!(status.pending_service, None);
        assert_eq!(status.current_service, None);
        assert_eq!(status.endpoint_count, 0);

        // events from the new subscription are handled
        backend
            .emit(StationEvent::BssAdded {
                handle: bss(2),
                properties: bss_properties(
                    "work",
                    [2, 0, 0, 0, 0, 2],
                    -50,
                    "infrastructure",
                    Security::Open,
                ),
            })
            .await;
        assert_eq!(next_registered(&mut notifications).await.ssid, "work");

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_after_resume_through_handle() {
        let (backend, device) = started(&[]).await;
        backend.wait_for_calls(3).await;
        backend.emit(StationEvent::ScanDone).await;

        loop {
            if !device.status().await.unwrap().scan_pending {
                break;
            }
            tokio::task::yield_now().await;
        }
        device.after_resume().await.unwrap();
        assert!(device.status().await.unwrap().scan_pending);

        backend.emit(StationEvent::ScanDone).await;
        let calls = backend.wait_for_calls(5).await;
        assert!(matches!(calls[3], StationCall::Scan(_)));
        assert!(matches!(calls[4], StationCall::FlushBss(age) if age >= 10));

        device.shutdown().await.unwrap();
    }
}

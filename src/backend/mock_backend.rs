//! Mock station backend for testing

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::{Mutex, Notify, mpsc};

use crate::{
    backend::{StationBackend, StationEvent, properties::PropertyMap},
    core::{
        error::{StationError, StationResult},
        types::NetworkHandle,
    },
};

const NETWORK_PATH_PREFIX: &str = "/fi/w1/wpa_supplicant1/Interfaces/0/Networks";

/// A recorded command call
#[derive(Debug, Clone, PartialEq)]
pub enum StationCall {
    Scan(PropertyMap),
    AddNetwork(PropertyMap),
    SelectNetwork(NetworkHandle),
    DisableNetwork(NetworkHandle),
    RemoveNetwork(NetworkHandle),
    RemoveAllNetworks,
    Disconnect,
    FlushBss(u32),
}

#[derive(Debug, Default)]
struct Failures {
    scan: Option<StationError>,
    add: Option<StationError>,
    select: Option<StationError>,
    disconnect: Option<StationError>,
    remove: Option<StationError>,
}

#[derive(Debug)]
struct MockState {
    calls: Vec<StationCall>,
    interface: PropertyMap,
    networks: Vec<NetworkHandle>,
    next_network: u32,
    failures: Failures,
    events_tx: mpsc::UnboundedSender<StationEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<StationEvent>>,
}

/// Mock station backend for testing
///
/// Records every command, hands out network handles in the station process's
/// path format and lets tests inject events and one-shot failures.
#[derive(Debug, Clone)]
pub struct MockStationBackend {
    inner: Arc<Mutex<MockState>>,
    changed: Arc<Notify>,
}

impl MockStationBackend {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                interface: PropertyMap::new(),
                networks: Vec::new(),
                next_network: 0,
                failures: Failures::default(),
                events_tx,
                events_rx: Some(events_rx),
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Properties returned by `interface_properties`
    pub async fn set_interface_properties(&self, properties: PropertyMap) {
        self.inner.lock().await.interface = properties;
    }

    /// Deliver an event to the subscriber (buffered until `events` is called)
    pub async fn emit(&self, event: StationEvent) {
        let _ = self.inner.lock().await.events_tx.send(event);
    }

    /// End the current event stream as if the station process exited
    ///
    /// Network entries die with it; a later `events` call subscribes afresh.
    pub async fn vanish(&self) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock().await;
        state.events_tx = events_tx;
        state.events_rx = Some(events_rx);
        state.networks.clear();
    }

    pub async fn fail_next_scan(&self, error: StationError) {
        self.inner.lock().await.failures.scan = Some(error);
    }

    pub async fn fail_next_add(&self, error: StationError) {
        self.inner.lock().await.failures.add = Some(error);
    }

    pub async fn fail_next_select(&self, error: StationError) {
        self.inner.lock().await.failures.select = Some(error);
    }

    pub async fn fail_next_disconnect(&self, error: StationError) {
        self.inner.lock().await.failures.disconnect = Some(error);
    }

    pub async fn fail_next_remove(&self, error: StationError) {
        self.inner.lock().await.failures.remove = Some(error);
    }

    pub async fn calls(&self) -> Vec<StationCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Network entries that currently exist
    pub async fn networks(&self) -> Vec<NetworkHandle> {
        self.inner.lock().await.networks.clone()
    }

    /// Wait until at least `count` calls were recorded and return them
    pub async fn wait_for_calls(&self, count: usize) -> Vec<StationCall> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.lock().await;
                if state.calls.len() >= count {
                    return state.calls.clone();
                }
            }
            notified.await;
        }
    }

    async fn record(&self, call: StationCall) -> tokio::sync::MutexGuard<'_, MockState> {
        let mut state = self.inner.lock().await;
        state.calls.push(call);
        self.changed.notify_waiters();
        state
    }
}

impl Default for MockStationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StationBackend for MockStationBackend {
    async fn events(&self) -> StationResult<BoxStream<'static, StationEvent>> {
        let rx = self
            .inner
            .lock()
            .await
            .events_rx
            .take()
            .ok_or_else(|| StationError::Unavailable("already subscribed".into()))?;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn interface_properties(&self) -> StationResult<PropertyMap> {
        Ok(self.inner.lock().await.interface.clone())
    }

    async fn scan(&self, args: PropertyMap) -> StationResult<()> {
        let mut state = self.record(StationCall::Scan(args)).await;
        state.failures.scan.take().map_or(Ok(()), Err)
    }

    async fn add_network(&self, params: PropertyMap) -> StationResult<NetworkHandle> {
        let mut state = self.record(StationCall::AddNetwork(params)).await;
        if let Some(error) = state.failures.add.take() {
            return Err(error);
        }
        let network = NetworkHandle(format!("{NETWORK_PATH_PREFIX}/{}", state.next_network));
        state.next_network += 1;
        state.networks.push(network.clone());
        Ok(network)
    }

    async fn select_network(&self, network: &NetworkHandle) -> StationResult<()> {
        let mut state = self
            .record(StationCall::SelectNetwork(network.clone()))
            .await;
        if let Some(error) = state.failures.select.take() {
            return Err(error);
        }
        if !state.networks.contains(network) {
            return Err(StationError::UnknownNetwork(network.0.clone()));
        }
        Ok(())
    }

    async fn disable_network(&self, network: &NetworkHandle) -> StationResult<()> {
        let state = self
            .record(StationCall::DisableNetwork(network.clone()))
            .await;
        if !state.networks.contains(network) {
            return Err(StationError::UnknownNetwork(network.0.clone()));
        }
        Ok(())
    }

    async fn remove_network(&self, network: &NetworkHandle) -> StationResult<()> {
        let mut state = self
            .record(StationCall::RemoveNetwork(network.clone()))
            .await;
        if let Some(error) = state.failures.remove.take() {
            return Err(error);
        }
        let before = state.networks.len();
        state.networks.retain(|existing| existing != network);
        if state.networks.len() == before {
            return Err(StationError::UnknownNetwork(network.0.clone()));
        }
        Ok(())
    }

    async fn remove_all_networks(&self) -> StationResult<()> {
        let mut state = self.record(StationCall::RemoveAllNetworks).await;
        state.networks.clear();
        Ok(())
    }

    async fn disconnect(&self) -> StationResult<()> {
        let mut state = self.record(StationCall::Disconnect).await;
        state.failures.disconnect.take().map_or(Ok(()), Err)
    }

    async fn flush_bss(&self, max_age_secs: u32) -> StationResult<()> {
        drop(self.record(StationCall::FlushBss(max_age_secs)).await);
        Ok(())
    }
}

//! Station process backend trait definition

use futures::stream::BoxStream;
use trait_variant::make;

use crate::{
    backend::properties::PropertyMap,
    core::{
        error::StationResult,
        types::{EndpointHandle, NetworkHandle},
    },
};

/// Asynchronous reports from the station process
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// A BSS appeared or its properties were refreshed
    BssAdded {
        handle: EndpointHandle,
        properties: PropertyMap,
    },
    /// A BSS aged out of the station process's cache
    BssRemoved { handle: EndpointHandle },
    /// One or more interface properties changed (`State`, `CurrentBSS`, ...)
    PropertiesChanged(PropertyMap),
    /// A scan finished
    ScanDone,
    /// Server certificate seen during 802.1x authentication
    Certification(PropertyMap),
    /// EAP progress report
    Eap { status: String, parameter: String },
}

/// Abstraction over the station-management process (typically wpa_supplicant)
///
/// This trait enables testing by allowing mock implementations while keeping
/// the controller free of any wire format.
#[make(Send)]
pub trait StationBackend: Send + Sync + 'static {
    /// Subscribe to asynchronous reports
    ///
    /// Called once, before any command is issued, so no report is missed.
    async fn events(&self) -> StationResult<BoxStream<'static, StationEvent>>;

    /// Read the interface properties (`State`, `CurrentBSS`, ...)
    async fn interface_properties(&self) -> StationResult<PropertyMap>;

    /// Request a scan
    ///
    /// # Arguments
    /// * `args` - `Type` and `SSIDs` as described in [`crate::backend::properties::scan`]
    async fn scan(&self, args: PropertyMap) -> StationResult<()>;

    /// Create a network entry and return its handle
    async fn add_network(&self, params: PropertyMap) -> StationResult<NetworkHandle>;

    /// Make a network entry the one the station process associates with
    async fn select_network(&self, network: &NetworkHandle) -> StationResult<()>;

    /// Keep a network entry but stop using it
    async fn disable_network(&self, network: &NetworkHandle) -> StationResult<()>;

    /// Delete a network entry
    async fn remove_network(&self, network: &NetworkHandle) -> StationResult<()>;

    /// Delete every network entry on the interface
    async fn remove_all_networks(&self) -> StationResult<()>;

    /// Drop the current association
    async fn disconnect(&self) -> StationResult<()>;

    /// Drop cached BSS entries older than `max_age_secs`
    async fn flush_bss(&self, max_age_secs: u32) -> StationResult<()>;
}

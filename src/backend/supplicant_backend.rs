//! wpa_supplicant backend over D-Bus
//!
//! Talks to `fi.w1.wpa_supplicant1` on the system bus. Signals of one
//! interface object are merged into a single [`StationEvent`] stream.

use std::collections::HashMap;

use futures::{StreamExt, future, stream::BoxStream};
use tracing::{debug, info, trace, warn};
use zbus::{Connection, Result, proxy};
use zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

use crate::{
    backend::{
        StationBackend, StationEvent,
        properties::{PropertyMap, PropertyValue, interface},
    },
    core::{
        error::{StationError, StationResult},
        types::{EndpointHandle, NetworkHandle},
    },
};

#[proxy(
    interface = "fi.w1.wpa_supplicant1",
    default_service = "fi.w1.wpa_supplicant1",
    default_path = "/fi/w1/wpa_supplicant1"
)]
trait Supplicant {
    fn get_interface(&self, ifname: &str) -> Result<OwnedObjectPath>;

    fn create_interface(&self, args: HashMap<String, Value<'_>>) -> Result<OwnedObjectPath>;
}

#[proxy(
    interface = "fi.w1.wpa_supplicant1.Interface",
    default_service = "fi.w1.wpa_supplicant1"
)]
trait Interface {
    fn scan(&self, args: HashMap<String, Value<'_>>) -> Result<()>;

    fn add_network(&self, args: HashMap<String, Value<'_>>) -> Result<OwnedObjectPath>;

    fn select_network(&self, path: ObjectPath<'_>) -> Result<()>;

    fn remove_network(&self, path: ObjectPath<'_>) -> Result<()>;

    fn remove_all_networks(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    #[zbus(name = "FlushBSS")]
    fn flush_bss(&self, age: u32) -> Result<()>;

    #[zbus(signal, name = "BSSAdded")]
    fn bss_added(&self, path: OwnedObjectPath, properties: HashMap<String, OwnedValue>);

    #[zbus(signal, name = "BSSRemoved")]
    fn bss_removed(&self, path: OwnedObjectPath);

    #[zbus(signal)]
    fn scan_done(&self, success: bool);

    #[zbus(signal)]
    fn properties_changed(&self, properties: HashMap<String, OwnedValue>);

    #[zbus(signal)]
    fn certification(&self, certification: HashMap<String, OwnedValue>);

    #[zbus(signal, name = "EAP")]
    fn eap(&self, status: String, parameter: String);

    #[zbus(property)]
    fn state(&self) -> Result<String>;

    #[zbus(property, name = "CurrentBSS")]
    fn current_bss(&self) -> Result<OwnedObjectPath>;
}

#[proxy(
    interface = "fi.w1.wpa_supplicant1.Network",
    default_service = "fi.w1.wpa_supplicant1"
)]
trait Network {
    #[zbus(property)]
    fn set_enabled(&self, enabled: bool) -> Result<()>;
}

/// Station backend driving one wpa_supplicant interface
pub struct SupplicantBackend {
    connection: Connection,
    interface: InterfaceProxy<'static>,
}

impl SupplicantBackend {
    /// Connect to the system bus and look up (or create) `ifname`
    pub async fn connect(ifname: &str) -> StationResult<Self> {
        let connection = Connection::system().await.map_err(station_error)?;
        Self::with_connection(connection, ifname).await
    }

    pub async fn with_connection(connection: Connection, ifname: &str) -> StationResult<Self> {
        let supplicant = SupplicantProxy::new(&connection)
            .await
            .map_err(station_error)?;

        let path = match supplicant.get_interface(ifname).await {
            Ok(path) => path,
            Err(error) => {
                debug!(%error, ifname, "interface not managed yet, creating it");
                let mut args = HashMap::new();
                args.insert("Ifname".to_string(), Value::from(ifname));
                supplicant
                    .create_interface(args)
                    .await
                    .map_err(station_error)?
            }
        };
        info!(ifname, %path, "using wpa_supplicant interface");

        let interface = InterfaceProxy::builder(&connection)
            .path(path)
            .map_err(station_error)?
            .build()
            .await
            .map_err(station_error)?;

        Ok(Self {
            connection,
            interface,
        })
    }

    async fn network(&self, network: &NetworkHandle) -> StationResult<NetworkProxy<'static>> {
        NetworkProxy::builder(&self.connection)
            .path(object_path(network)?)
            .map_err(station_error)?
            .build()
            .await
            .map_err(station_error)
    }
}

impl StationBackend for SupplicantBackend {
    async fn events(&self) -> StationResult<BoxStream<'static, StationEvent>> {
        let added = self
            .interface
            .receive_bss_added()
            .await
            .map_err(station_error)?
            .filter_map(|signal| {
                future::ready(signal.args().ok().map(|args| StationEvent::BssAdded {
                    handle: EndpointHandle(args.path.to_string()),
                    properties: property_map(&args.properties),
                }))
            });

        let removed = self
            .interface
            .receive_bss_removed()
            .await
            .map_err(station_error)?
            .filter_map(|signal| {
                future::ready(signal.args().ok().map(|args| StationEvent::BssRemoved {
                    handle: EndpointHandle(args.path.to_string()),
                }))
            });

        let scan_done = self
            .interface
            .receive_scan_done()
            .await
            .map_err(station_error)?
            .map(|signal| {
                if let Ok(args) = signal.args()
                    && !args.success
                {
                    warn!("station process reports a failed scan");
                }
                StationEvent::ScanDone
            });

        let changed = self
            .interface
            .receive_properties_changed()
            .await
            .map_err(station_error)?
            .filter_map(|signal| {
                future::ready(
                    signal
                        .args()
                        .ok()
                        .map(|args| StationEvent::PropertiesChanged(property_map(&args.properties))),
                )
            });

        let certification = self
            .interface
            .receive_certification()
            .await
            .map_err(station_error)?
            .filter_map(|signal| {
                future::ready(
                    signal
                        .args()
                        .ok()
                        .map(|args| StationEvent::Certification(property_map(&args.certification))),
                )
            });

        let eap = self
            .interface
            .receive_eap()
            .await
            .map_err(station_error)?
            .filter_map(|signal| {
                future::ready(signal.args().ok().map(|args| StationEvent::Eap {
                    status: args.status.clone(),
                    parameter: args.parameter.clone(),
                }))
            });

        let streams: Vec<BoxStream<'static, StationEvent>> = vec![
            added.boxed(),
            removed.boxed(),
            scan_done.boxed(),
            changed.boxed(),
            certification.boxed(),
            eap.boxed(),
        ];
        debug!(count = streams.len(), "subscribed to station signals");
        Ok(futures::stream::select_all(streams).boxed())
    }

    async fn interface_properties(&self) -> StationResult<PropertyMap> {
        let state = self.interface.state().await.map_err(station_error)?;
        let current = self.interface.current_bss().await.map_err(station_error)?;

        let mut properties = PropertyMap::new();
        properties.insert(interface::STATE.into(), PropertyValue::String(state));
        properties.insert(
            interface::CURRENT_BSS.into(),
            PropertyValue::ObjectPath(current.to_string()),
        );
        Ok(properties)
    }

    async fn scan(&self, args: PropertyMap) -> StationResult<()> {
        self.interface
            .scan(wire_map(args))
            .await
            .map_err(station_error)
    }

    async fn add_network(&self, params: PropertyMap) -> StationResult<NetworkHandle> {
        let path = self
            .interface
            .add_network(wire_map(params))
            .await
            .map_err(station_error)?;
        Ok(NetworkHandle(path.to_string()))
    }

    async fn select_network(&self, network: &NetworkHandle) -> StationResult<()> {
        self.interface
            .select_network(object_path(network)?)
            .await
            .map_err(station_error)
    }

    async fn disable_network(&self, network: &NetworkHandle) -> StationResult<()> {
        self.network(network)
            .await?
            .set_enabled(false)
            .await
            .map_err(station_error)
    }

    async fn remove_network(&self, network: &NetworkHandle) -> StationResult<()> {
        self.interface
            .remove_network(object_path(network)?)
            .await
            .map_err(station_error)
    }

    async fn remove_all_networks(&self) -> StationResult<()> {
        self.interface
            .remove_all_networks()
            .await
            .map_err(station_error)
    }

    async fn disconnect(&self) -> StationResult<()> {
        self.interface.disconnect().await.map_err(station_error)
    }

    async fn flush_bss(&self, max_age_secs: u32) -> StationResult<()> {
        self.interface
            .flush_bss(max_age_secs)
            .await
            .map_err(station_error)
    }
}

fn object_path(network: &NetworkHandle) -> StationResult<ObjectPath<'static>> {
    ObjectPath::try_from(network.0.clone())
        .map_err(|error| StationError::InvalidArgs(format!("{}: {error}", network.0)))
}

/// Map a D-Bus error reply onto the station error vocabulary
fn station_error(error: zbus::Error) -> StationError {
    match &error {
        zbus::Error::MethodError(name, message, _) => {
            let detail = message.clone().unwrap_or_else(|| name.to_string());
            let name = name.as_str();
            if name.ends_with(".NotConnected") {
                StationError::NotConnected
            } else if name.ends_with(".NetworkUnknown") {
                StationError::UnknownNetwork(detail)
            } else if name.ends_with(".InvalidArgs") {
                StationError::InvalidArgs(detail)
            } else {
                StationError::Rejected(detail)
            }
        }
        _ => StationError::Unavailable(error.to_string()),
    }
}

fn property_map(values: &HashMap<String, OwnedValue>) -> PropertyMap {
    values
        .iter()
        .filter_map(|(key, value)| match property_value(value) {
            Some(value) => Some((key.clone(), value)),
            None => {
                trace!(key, "skipping property with unsupported type");
                None
            }
        })
        .collect()
}

fn property_value(value: &Value<'_>) -> Option<PropertyValue> {
    match value {
        Value::Bool(v) => Some(PropertyValue::Bool(*v)),
        Value::U8(v) => Some(PropertyValue::U32(u32::from(*v))),
        Value::I16(v) => Some(PropertyValue::I16(*v)),
        Value::U16(v) => Some(PropertyValue::U16(*v)),
        Value::I32(v) => Some(PropertyValue::I32(*v)),
        Value::U32(v) => Some(PropertyValue::U32(*v)),
        Value::Str(v) => Some(PropertyValue::String(v.to_string())),
        Value::ObjectPath(v) => Some(PropertyValue::ObjectPath(v.to_string())),
        Value::Value(inner) => property_value(inner),
        Value::Array(arr) => {
            let items: Vec<&Value<'_>> = arr.iter().collect();
            if items.is_empty() {
                return match arr.element_signature().to_string().as_str() {
                    "y" => Some(PropertyValue::Bytes(Vec::new())),
                    "s" => Some(PropertyValue::Strings(Vec::new())),
                    "ay" => Some(PropertyValue::ByteArrays(Vec::new())),
                    _ => None,
                };
            }
            if let Some(bytes) = bytes(&items) {
                return Some(PropertyValue::Bytes(bytes));
            }
            if let Some(strings) = items
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
            {
                return Some(PropertyValue::Strings(strings));
            }
            items
                .iter()
                .map(|v| match v {
                    Value::Array(inner) => bytes(&inner.iter().collect::<Vec<_>>()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(PropertyValue::ByteArrays)
        }
        Value::Dict(_) => {
            let nested = HashMap::<String, OwnedValue>::try_from(value.try_clone().ok()?).ok()?;
            Some(PropertyValue::Dict(property_map(&nested)))
        }
        _ => None,
    }
}

fn bytes(items: &[&Value<'_>]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| match v {
            Value::U8(b) => Some(*b),
            _ => None,
        })
        .collect()
}

/// Outbound `a{sv}` argument
fn wire_map(properties: PropertyMap) -> HashMap<String, Value<'static>> {
    properties
        .into_iter()
        .map(|(key, value)| (key, wire_value(value)))
        .collect()
}

fn wire_value(value: PropertyValue) -> Value<'static> {
    match value {
        PropertyValue::Bool(v) => Value::from(v),
        PropertyValue::I16(v) => Value::from(v),
        PropertyValue::U16(v) => Value::from(v),
        PropertyValue::I32(v) => Value::from(v),
        PropertyValue::U32(v) => Value::from(v),
        PropertyValue::String(v) => Value::from(v),
        PropertyValue::Strings(v) => Value::from(v),
        PropertyValue::Bytes(v) => Value::from(v),
        PropertyValue::ByteArrays(v) => Value::from(v),
        PropertyValue::Dict(v) => Value::from(wire_map(v)),
        PropertyValue::ObjectPath(v) => match ObjectPath::try_from(v.clone()) {
            Ok(path) => Value::from(path),
            Err(_) => Value::from(v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::properties::bss;

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    #[test]
    fn test_bss_properties_from_wire() {
        let mut rsn = HashMap::new();
        rsn.insert("KeyMgmt".to_string(), Value::from(vec!["wpa-psk".to_string()]));

        let mut wire = HashMap::new();
        wire.insert(bss::SSID.to_string(), owned(Value::from(b"lab".to_vec())));
        wire.insert(bss::SIGNAL.to_string(), owned(Value::from(-61i16)));
        wire.insert(bss::MODE.to_string(), owned(Value::from("infrastructure")));
        wire.insert(bss::PRIVACY.to_string(), owned(Value::from(true)));
        wire.insert(bss::RSN.to_string(), owned(Value::from(rsn)));

        let map = property_map(&wire);
        assert_eq!(map[bss::SSID], PropertyValue::Bytes(b"lab".to_vec()));
        assert_eq!(map[bss::SIGNAL], PropertyValue::I16(-61));
        assert_eq!(map[bss::PRIVACY], PropertyValue::Bool(true));
        match &map[bss::RSN] {
            PropertyValue::Dict(rsn) => assert_eq!(
                rsn["KeyMgmt"],
                PropertyValue::Strings(vec!["wpa-psk".to_string()])
            ),
            other => panic!("unexpected RSN value {other:?}"),
        }
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(
            wire_value(PropertyValue::ByteArrays(vec![b"a".to_vec(), Vec::new()]))
                .value_signature()
                .to_string(),
            "aay"
        );
        assert_eq!(
            wire_value(PropertyValue::ObjectPath("/fi/w1/x".into()))
                .value_signature()
                .to_string(),
            "o"
        );
        assert_eq!(
            wire_value(PropertyValue::ObjectPath("not a path".into()))
                .value_signature()
                .to_string(),
            "s"
        );
    }

    #[test]
    fn test_empty_byte_array_keeps_shape() {
        let value = Value::from(Vec::<u8>::new());
        assert_eq!(property_value(&value), Some(PropertyValue::Bytes(Vec::new())));
    }

    #[test]
    fn test_object_path_rejects_garbage() {
        assert!(matches!(
            object_path(&NetworkHandle("no slash".into())),
            Err(StationError::InvalidArgs(_))
        ));
    }
}

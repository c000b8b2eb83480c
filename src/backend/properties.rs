//! Property bag exchanged with the station process
//!
//! Keys and value shapes mirror the `fi.w1.wpa_supplicant1` D-Bus API. The
//! controller only ever sees [`PropertyMap`]; conversion from and to the wire
//! representation is the backend's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{ControllerError, ControllerResult};

/// Ordered string-keyed property bag
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single dynamically typed property value
///
/// Untagged decoding tries variants in order, so JSON integers land on `I32`,
/// or `U32` above `i32::MAX`. Network parameters only accept those two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I16(i16),
    U16(u16),
    String(String),
    Strings(Vec<String>),
    Bytes(Vec<u8>),
    ByteArrays(Vec<Vec<u8>>),
    Dict(PropertyMap),
    /// D-Bus object path; travels as a string in JSON
    #[serde(skip_deserializing)]
    ObjectPath(String),
}

/// BSS properties
pub mod bss {
    pub const SSID: &str = "SSID";
    pub const BSSID: &str = "BSSID";
    pub const SIGNAL: &str = "Signal";
    pub const MODE: &str = "Mode";
    pub const RSN: &str = "RSN";
    pub const WPA: &str = "WPA";
    pub const PRIVACY: &str = "Privacy";
    pub const KEY_MGMT: &str = "KeyMgmt";
}

/// Interface properties
pub mod interface {
    pub const STATE: &str = "State";
    pub const CURRENT_BSS: &str = "CurrentBSS";
    /// Object path the station process uses for "no current BSS"
    pub const NULL_PATH: &str = "/";
}

/// Scan arguments
pub mod scan {
    pub const TYPE: &str = "Type";
    pub const TYPE_ACTIVE: &str = "active";
    pub const SSIDS: &str = "SSIDs";
}

/// Network entry parameters for `AddNetwork`
pub mod network {
    pub const SSID: &str = "ssid";
    pub const SCAN_SSID: &str = "scan_ssid";
    pub const MODE: &str = "mode";
    pub const KEY_MGMT: &str = "key_mgmt";
    pub const BGSCAN: &str = "bgscan";
}

fn missing(key: &str) -> ControllerError {
    ControllerError::MalformedEvent(format!("missing property {key}"))
}

fn mistyped(key: &str, expected: &str, found: &PropertyValue) -> ControllerError {
    ControllerError::MalformedEvent(format!(
        "property {key} should be {expected}, found {found:?}"
    ))
}

/// Byte-array property
pub fn get_bytes<'a>(map: &'a PropertyMap, key: &str) -> ControllerResult<&'a [u8]> {
    match map.get(key) {
        Some(PropertyValue::Bytes(bytes)) => Ok(bytes.as_slice()),
        Some(other) => Err(mistyped(key, "a byte array", other)),
        None => Err(missing(key)),
    }
}

/// Signed 16-bit property
pub fn get_i16(map: &PropertyMap, key: &str) -> ControllerResult<i16> {
    match map.get(key) {
        Some(PropertyValue::I16(value)) => Ok(*value),
        Some(other) => Err(mistyped(key, "an int16", other)),
        None => Err(missing(key)),
    }
}

/// String property; object paths are accepted as strings
pub fn get_str<'a>(map: &'a PropertyMap, key: &str) -> ControllerResult<&'a str> {
    match map.get(key) {
        Some(PropertyValue::String(value)) | Some(PropertyValue::ObjectPath(value)) => {
            Ok(value.as_str())
        }
        Some(other) => Err(mistyped(key, "a string", other)),
        None => Err(missing(key)),
    }
}

/// Optional boolean property, `false` when absent
pub fn get_flag(map: &PropertyMap, key: &str) -> ControllerResult<bool> {
    match map.get(key) {
        Some(PropertyValue::Bool(value)) => Ok(*value),
        Some(other) => Err(mistyped(key, "a boolean", other)),
        None => Ok(false),
    }
}

/// Optional nested dictionary
pub fn get_dict<'a>(map: &'a PropertyMap, key: &str) -> ControllerResult<Option<&'a PropertyMap>> {
    match map.get(key) {
        Some(PropertyValue::Dict(dict)) => Ok(Some(dict)),
        Some(other) => Err(mistyped(key, "a dictionary", other)),
        None => Ok(None),
    }
}

/// Optional string list, empty when absent
pub fn get_strings<'a>(map: &'a PropertyMap, key: &str) -> ControllerResult<&'a [String]> {
    match map.get(key) {
        Some(PropertyValue::Strings(values)) => Ok(values.as_slice()),
        Some(other) => Err(mistyped(key, "a string array", other)),
        None => Ok(&[]),
    }
}

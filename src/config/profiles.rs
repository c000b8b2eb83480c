//! Stored network profiles
//!
//! Profiles are written by whoever owns persistent storage; this crate only
//! reads them at startup to recreate hidden networks before the first scan.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{NetworkMode, Security};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("cannot read profiles: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse profiles: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One stored network; every field may be missing in a damaged store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProfile {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub mode: Option<NetworkMode>,
    #[serde(default)]
    pub security: Option<Security>,
}

/// Read a JSON array of profiles
pub async fn load_profiles(path: &Path) -> Result<Vec<StoredProfile>, ProfileError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

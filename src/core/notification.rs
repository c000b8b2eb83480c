//! Upward notifications to the policy layer

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    backend::properties::PropertyMap,
    core::{directory::ServiceSnapshot, types::ServiceId},
};

/// Events published to policy-layer subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// A service became visible to the policy layer
    ServiceRegistered(ServiceSnapshot),

    /// A registered service changed state, membership or flags
    ServiceUpdated(ServiceSnapshot),

    /// A registered service was destroyed
    ServiceDeregistered(ServiceDeregisteredParams),

    /// Certificate presented during 802.1x authentication
    Certification(PropertyMap),

    /// EAP progress report from the station process
    EapEvent(EapEventParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDeregisteredParams {
    pub id: ServiceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EapEventParams {
    pub status: String,
    pub parameter: String,
}

/// Broadcast sender that tolerates having no subscribers
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("notification dropped, no subscribers");
        }
    }
}

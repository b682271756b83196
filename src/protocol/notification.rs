//! Notification message types (server-to-client events)

use serde::Serialize;

use crate::{
    core::{
        events::{CoordinatorEvent, DiscoveryUpdate, NetworkListItem, SessionUpdate},
        types::{DiscoveryOutcome, NetworkEntry, ProvisioningHandle, ProvisioningState},
    },
    protocol::response::DeviceItem,
};

/// Server-to-client notifications
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    DeviceDiscovered(DeviceItem),

    DiscoveryFinished(DiscoveryFinishedParams),

    /// Provisioning session moved to a new state
    SessionStateChanged(SessionStateChangedParams),

    /// The printer reported a network
    NetworkFound(NetworkFoundParams),

    NetworkListFinished(NetworkListFinishedParams),

    ProvisioningProgress(ProvisioningProgressParams),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveryFinishedParams {
    pub outcome: DiscoveryOutcome,
    pub found_any: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStateChangedParams {
    pub handle: ProvisioningHandle,
    #[serde(flatten)]
    pub state: ProvisioningState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NetworkFoundParams {
    pub handle: ProvisioningHandle,
    pub network: NetworkEntry,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NetworkListFinishedParams {
    pub handle: ProvisioningHandle,
    /// Set when the listing ended early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// The printer is joining the network
    Configuring,
    Warning,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProvisioningProgressParams {
    pub handle: ProvisioningHandle,
    pub stage: ProgressStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SessionStateChangedParams {
    pub fn new(handle: ProvisioningHandle, state: ProvisioningState) -> Self {
        let message = match &state {
            ProvisioningState::Failed(reason) => Some(reason.user_message()),
            _ => None,
        };
        Self {
            handle,
            state,
            message,
        }
    }
}

impl From<CoordinatorEvent> for Notification {
    fn from(event: CoordinatorEvent) -> Self {
        match event {
            CoordinatorEvent::Discovery(DiscoveryUpdate::Found { device }) => {
                Notification::DeviceDiscovered(device.into())
            }
            CoordinatorEvent::Discovery(DiscoveryUpdate::Finished { outcome, found_any }) => {
                Notification::DiscoveryFinished(DiscoveryFinishedParams { outcome, found_any })
            }
            CoordinatorEvent::Session { handle, update } => match update {
                SessionUpdate::StateChanged(state) => {
                    Notification::SessionStateChanged(SessionStateChangedParams::new(handle, state))
                }
                SessionUpdate::Network(NetworkListItem::Found(network)) => {
                    Notification::NetworkFound(NetworkFoundParams { handle, network })
                }
                SessionUpdate::Network(NetworkListItem::Done) => {
                    Notification::NetworkListFinished(NetworkListFinishedParams {
                        handle,
                        error: None,
                    })
                }
                SessionUpdate::Network(NetworkListItem::Failed(error)) => {
                    Notification::NetworkListFinished(NetworkListFinishedParams {
                        handle,
                        error: Some(error),
                    })
                }
                SessionUpdate::Warning(detail) => {
                    Notification::ProvisioningProgress(ProvisioningProgressParams {
                        handle,
                        stage: ProgressStage::Warning,
                        detail: Some(detail),
                    })
                }
                SessionUpdate::Configuring => {
                    Notification::ProvisioningProgress(ProvisioningProgressParams {
                        handle,
                        stage: ProgressStage::Configuring,
                        detail: None,
                    })
                }
            },
        }
    }
}

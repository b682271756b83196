//! Events delivered by the radio stack and updates published to clients

use serde::Serialize;

use crate::core::types::{
    DiscoveredDevice, DiscoveryOutcome, NetworkEntry, ProvisioningHandle, ProvisioningState,
    SightingName,
};

/// Event produced while discovery is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Sighting { address: String, name: SightingName },
    /// The radio ended its inquiry on its own
    Finished,
}

/// Event received over an open link to a printer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    HandshakeOk { serial: String },
    HandshakeSendFailed,
    NetworkFound(NetworkEntry),
    NetworkListDone,
    NetworkListFailed,
    /// The printer accepted the credentials and is trying to join
    CredentialsReceived,
    CredentialAccepted,
    CredentialRejected,
    LinkError { code: i32, message: String },
    /// A frame the codec could not make sense of
    Malformed(String),
}

impl LinkEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::HandshakeOk { .. } => "handshake_ok",
            LinkEvent::HandshakeSendFailed => "handshake_send_failed",
            LinkEvent::NetworkFound(_) => "network_found",
            LinkEvent::NetworkListDone => "network_list_done",
            LinkEvent::NetworkListFailed => "network_list_failed",
            LinkEvent::CredentialsReceived => "credentials_received",
            LinkEvent::CredentialAccepted => "credential_accepted",
            LinkEvent::CredentialRejected => "credential_rejected",
            LinkEvent::LinkError { .. } => "link_error",
            LinkEvent::Malformed(_) => "malformed",
        }
    }
}

/// Update published while discovery runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryUpdate {
    Found {
        device: DiscoveredDevice,
    },
    /// Always the last update of a discovery session
    Finished {
        outcome: DiscoveryOutcome,
        found_any: bool,
    },
}

/// Item of a network listing stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NetworkListItem {
    Found(NetworkEntry),
    Done,
    /// The listing ended early; entries received so far are kept
    Failed(String),
}

impl NetworkListItem {
    pub fn is_final(&self) -> bool {
        !matches!(self, NetworkListItem::Found(_))
    }
}

/// Update published by a provisioning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionUpdate {
    StateChanged(ProvisioningState),
    Network(NetworkListItem),
    /// A tolerated anomaly, e.g. an abandoned listing
    Warning(String),
    /// The printer received the credentials and is joining the network
    Configuring,
}

/// Everything the coordinator publishes to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    Discovery(DiscoveryUpdate),
    Session {
        handle: ProvisioningHandle,
        update: SessionUpdate,
    },
}

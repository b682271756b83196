//! Response message types

use serde::Serialize;

use crate::core::{
    catalog::SelectableNetwork,
    discovery::DiscoverySnapshot,
    provisioning::SessionSnapshot,
    selectable::SelectableItem,
    types::{
        DeviceAddress, DiscoveredDevice, DiscoveryState, LocalNetwork, ProvisioningHandle,
        ProvisioningState, ScanState,
    },
};

/// Response messages from server to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Ack(AckResponse),

    DiscoveryStarted(DiscoveryStartedResponse),

    Devices(DevicesResponse),

    SessionStarted(SessionStartedResponse),

    Networks(NetworksResponse),

    Session(SessionResponse),

    LocalScan(LocalScanResponse),

    LocalNetworks(LocalNetworksResponse),
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AckResponse {
    pub status: String,
}

/// Response for begin_discovery
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveryStartedResponse {
    pub status: String,
    pub state: DiscoveryState,
    pub timeout_secs: u64,
}

/// Device row as shown in a picker
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct DeviceItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub highlighted: bool,
    #[serde(flatten)]
    pub device: DiscoveredDevice,
}

impl From<DiscoveredDevice> for DeviceItem {
    fn from(device: DiscoveredDevice) -> Self {
        Self {
            title: device.title(),
            subtitle: device.subtitle(),
            highlighted: device.is_highlighted(),
            device,
        }
    }
}

/// Response for get_devices
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DevicesResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DiscoveryState>,
    pub devices: Vec<DeviceItem>,
}

/// Response for select_device
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStartedResponse {
    pub status: String,
    pub handle: ProvisioningHandle,
    #[serde(flatten)]
    pub state: ProvisioningState,
}

/// Network row as shown in a picker
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NetworkItem {
    pub index: usize,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub highlighted: bool,
    #[serde(flatten)]
    pub item: SelectableNetwork,
}

/// Response for get_networks
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NetworksResponse {
    pub status: String,
    pub networks: Vec<NetworkItem>,
}

/// Response for get_session and state-changing session requests
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub status: String,
    pub handle: ProvisioningHandle,
    pub address: DeviceAddress,
    #[serde(flatten)]
    pub state: ProvisioningState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Message for the user once the session failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for scan_local_networks
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalScanResponse {
    pub status: String,
    pub state: ScanState,
}

/// Response for get_local_networks
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalNetworksResponse {
    pub status: String,
    pub state: ScanState,
    pub networks: Vec<LocalNetwork>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

impl DiscoveryStartedResponse {
    pub fn ok(timeout_secs: u64) -> Self {
        Self {
            status: "ok".to_string(),
            state: DiscoveryState::Scanning,
            timeout_secs,
        }
    }
}

impl DevicesResponse {
    pub fn ok(snapshot: Option<DiscoverySnapshot>) -> Self {
        let (state, devices) = match snapshot {
            Some(snapshot) => (Some(snapshot.state), snapshot.devices),
            None => (None, Vec::new()),
        };
        Self {
            status: "ok".to_string(),
            state,
            devices: devices.into_iter().map(DeviceItem::from).collect(),
        }
    }
}

impl SessionStartedResponse {
    pub fn ok(handle: ProvisioningHandle) -> Self {
        Self {
            status: "ok".to_string(),
            handle,
            state: ProvisioningState::Connecting,
        }
    }
}

impl NetworksResponse {
    pub fn ok(networks: Vec<SelectableNetwork>) -> Self {
        let networks = networks
            .into_iter()
            .enumerate()
            .map(|(index, item)| NetworkItem {
                index,
                title: item.title(),
                subtitle: item.subtitle(),
                highlighted: item.is_highlighted(),
                item,
            })
            .collect();
        Self {
            status: "ok".to_string(),
            networks,
        }
    }
}

impl SessionResponse {
    pub fn ok(snapshot: SessionSnapshot) -> Self {
        let message = match &snapshot.state {
            ProvisioningState::Failed(reason) => Some(reason.user_message()),
            _ => None,
        };
        Self {
            status: "ok".to_string(),
            handle: snapshot.handle,
            address: snapshot.address,
            state: snapshot.state,
            serial: snapshot.serial,
            warnings: snapshot.warnings,
            message,
        }
    }
}

impl LocalScanResponse {
    pub fn ok(state: ScanState) -> Self {
        Self {
            status: "ok".to_string(),
            state,
        }
    }
}

impl LocalNetworksResponse {
    pub fn ok(state: ScanState, networks: Vec<LocalNetwork>) -> Self {
        Self {
            status: "ok".to_string(),
            state,
            networks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{catalog::NetworkCatalog, error::FailureReason, types::NetworkEntry};

    #[test]
    fn test_ack_response() {
        let json = serde_json::to_string(&AckResponse::ok()).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_devices_response_labels() {
        let device = DiscoveredDevice {
            address: DeviceAddress::parse("CC:DD").unwrap(),
            display_name: "NT311-X".into(),
            is_likely_target: true,
        };
        let response = DevicesResponse::ok(Some(DiscoverySnapshot {
            state: DiscoveryState::Finished,
            devices: vec![device],
            outcome: None,
        }));
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""state":"finished""#));
        assert!(json.contains(r#""address":"CC:DD""#));
        assert!(json.contains(r#""title":"NT311-X""#));
        assert!(json.contains(r#""subtitle":"CC:DD""#));
        assert!(json.contains(r#""highlighted":true"#));
        assert!(json.contains(r#""is_likely_target":true"#));
    }

    #[test]
    fn test_networks_response_indexes_manual_slot() {
        let mut catalog = NetworkCatalog::new();
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));
        let response = NetworksResponse::ok(catalog.selectable_list());

        assert_eq!(response.networks.len(), 2);
        assert_eq!(response.networks[1].index, 1);
        assert_eq!(response.networks[1].item, SelectableNetwork::ManualEntry);
        assert!(response.networks[0].highlighted);
        assert!(!response.networks[1].highlighted);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""kind":"manual_entry""#));
        assert!(json.contains(r#""ssid":"486f6d654e6574""#));
    }

    #[test]
    fn test_session_response_carries_user_message() {
        let snapshot = SessionSnapshot {
            handle: ProvisioningHandle::new(),
            address: DeviceAddress::parse("AA:BB").unwrap(),
            state: ProvisioningState::Failed(FailureReason::CredentialRejected),
            serial: Some("N411A0001".into()),
            catalog: NetworkCatalog::new(),
            warnings: Vec::new(),
        };
        let json = serde_json::to_string(&SessionResponse::ok(snapshot)).unwrap();

        assert!(json.contains(r#""state":"failed""#));
        assert!(json.contains(r#""kind":"credential_rejected""#));
        assert!(json.contains(r#""message":"#));
        assert!(!json.contains(r#""warnings""#));
    }
}

//! Request message types

use serde::{Deserialize, Serialize};

use crate::core::types::{NetworkChoice, ProvisioningHandle};

/// Request messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Start discovering printers
    BeginDiscovery(BeginDiscoveryParams),

    StopDiscovery,

    /// Devices found by the latest discovery
    GetDevices,

    /// Start a provisioning session with a discovered device
    SelectDevice(SelectDeviceParams),

    /// Ask the printer for the networks it sees
    RequestNetworkList(SessionParams),

    /// Selectable network list of a session
    GetNetworks(SessionParams),

    /// Push credentials to the printer
    SubmitCredentials(SubmitCredentialsParams),

    Cancel(SessionParams),

    GetSession(SessionParams),

    /// Start a Wi-Fi scan on the host
    ScanLocalNetworks,

    /// Results of the host scan, optionally merged into a session
    GetLocalNetworks(LocalNetworksParams),
}

/// Parameters for begin_discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeginDiscoveryParams {
    /// Discovery bound, the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Parameters for select_device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectDeviceParams {
    pub address: String,
}

/// Parameters naming a provisioning session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionParams {
    pub handle: ProvisioningHandle,
}

/// Parameters for submit_credentials
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitCredentialsParams {
    pub handle: ProvisioningHandle,
    pub network: NetworkChoice,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for SubmitCredentialsParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitCredentialsParams")
            .field("handle", &self.handle)
            .field("network", &self.network)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parameters for get_local_networks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalNetworksParams {
    /// Session whose catalog receives the results as suggestions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProvisioningHandle>,
}

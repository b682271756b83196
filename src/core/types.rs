//! Domain types for printer provisioning

use serde::{Deserialize, Serialize};

use crate::core::error::FailureReason;

/// Opaque link-layer identifier of a radio device (for BLE the MAC address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create an address from raw radio input, `None` if it is blank
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device seen during discovery
///
/// Identity is the address only: two sightings with the same address are the
/// same device regardless of the reported name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub display_name: String,
    pub is_likely_target: bool,
}

/// Discovery state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    Scanning,
    Finished,
}

/// Why a discovery session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    /// Stopped by the caller (or by selecting a device)
    Stopped,
    /// The discovery bound elapsed
    TimedOut,
    /// The radio ended its inquiry on its own
    Completed,
}

/// Name information attached to a raw sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SightingName {
    Known(String),
    Absent,
    /// The platform refused to resolve the device identity
    Denied,
}

impl From<Option<String>> for SightingName {
    fn from(name: Option<String>) -> Self {
        name.map_or(SightingName::Absent, SightingName::Known)
    }
}

/// Where a network entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkOrigin {
    DeviceReported,
    LocalScan,
    Manual,
}

/// A selectable Wi-Fi network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkEntry {
    /// Raw SSID bytes, not necessarily UTF-8
    #[serde(with = "hex")]
    pub ssid: Vec<u8>,
    pub display_name: String,
    pub requires_password: bool,
    pub origin: NetworkOrigin,
}

impl NetworkEntry {
    /// Entry as reported by the printer
    pub fn reported(ssid: impl Into<Vec<u8>>, requires_password: bool) -> Self {
        let ssid = ssid.into();
        Self {
            display_name: String::from_utf8_lossy(&ssid).into_owned(),
            ssid,
            requires_password,
            origin: NetworkOrigin::DeviceReported,
        }
    }
}

/// Network seen by the host's own Wi-Fi scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalNetwork {
    pub ssid: String,
    pub mac: String,
    pub channel: u16,
    pub rssi: i16,
}

/// Local Wi-Fi scan state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Finished,
    Error,
}

/// Credentials pushed to the printer
///
/// Held only for the duration of the push and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: Vec<u8>,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &String::from_utf8_lossy(&self.ssid))
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Phases of a provisioning session that are bounded by a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Handshake,
    NetworkList,
    Credentials,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Handshake => f.write_str("handshake"),
            Phase::NetworkList => f.write_str("network list"),
            Phase::Credentials => f.write_str("credential push"),
        }
    }
}

/// Provisioning state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProvisioningState {
    Connecting,
    AwaitingHandshake,
    Ready,
    ListingNetworks,
    AwaitingCredentialResult,
    Succeeded,
    Failed(FailureReason),
}

impl ProvisioningState {
    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Failed(_))
    }
}

/// Terminal result of a credential push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    Succeeded,
    Failed(FailureReason),
}

/// Network the caller wants the printer to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkChoice {
    /// Index into the selectable list
    Index(usize),
    /// Raw SSID bytes of a known network
    Ssid(#[serde(with = "hex")] Vec<u8>),
    /// Free text typed by the user
    Manual(String),
}

/// Identifier of one provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisioningHandle(uuid::Uuid);

impl ProvisioningHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ProvisioningHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProvisioningHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an open link, assigned by the radio backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Identifier for a transport client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_address_trims_and_rejects_blank() {
        assert_eq!(
            DeviceAddress::parse("  AA:BB ").map(|a| a.to_string()),
            Some("AA:BB".to_string())
        );
        assert!(DeviceAddress::parse("   ").is_none());
        assert!(DeviceAddress::parse("").is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            ssid: b"HomeNet".to_vec(),
            password: "hunter22".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("HomeNet"));
        assert!(!rendered.contains("hunter22"));
    }

    #[test]
    fn test_network_entry_serializes_ssid_as_hex() {
        let entry = NetworkEntry::reported(vec![0xff, 0x41], true);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""ssid":"ff41""#));
        assert!(json.contains(r#""origin":"device_reported""#));
    }

    #[test]
    fn test_provisioning_state_serialization() {
        let json = serde_json::to_string(&ProvisioningState::Ready).unwrap();
        assert_eq!(json, r#"{"state":"ready"}"#);

        let failed = ProvisioningState::Failed(FailureReason::Timeout(Phase::Handshake));
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""state":"failed""#));
        assert!(json.contains(r#""timeout""#));
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(ProvisioningHandle::new(), ProvisioningHandle::new());
    }
}

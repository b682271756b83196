//! Error types for the printer provisioning service

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{LinkId, Phase, ProvisioningHandle, ProvisioningState};

/// Result type for radio backend operations
pub type RadioResult<T> = Result<T, RadioError>;

/// Result type for local Wi-Fi scan operations
pub type WifiResult<T> = Result<T, WifiError>;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by the radio capability provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Provisioning service not found on device: {0}")]
    ServiceNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unknown link {0}")]
    UnknownLink(LinkId),
}

/// Errors related to the host-side Wi-Fi scan
#[derive(Error, Debug, Clone)]
pub enum WifiError {
    #[error("WiFi scan failed: {0}")]
    ScanFailed(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicantError(String),
}

/// Terminal failure of a provisioning session
///
/// Every variant renders a distinct message for the user, see
/// [`FailureReason::user_message`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("{0} timed out")]
    Timeout(Phase),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("credentials rejected by device")]
    CredentialRejected,

    #[error("device error {code}: {message}")]
    LinkError { code: i32, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// Human readable message for display
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::ConnectionError(_) => {
                "Could not connect to the printer. Make sure it is powered on and nearby."
                    .to_string()
            }
            FailureReason::Timeout(Phase::Credentials) => {
                "The printer did not confirm the Wi-Fi settings in time. Check that the network is 2.4 GHz and try again."
                    .to_string()
            }
            FailureReason::Timeout(_) => "The printer did not respond. Try again.".to_string(),
            FailureReason::ProtocolError(_) => {
                "The printer sent an unexpected response. Try again.".to_string()
            }
            FailureReason::CredentialRejected => {
                "The printer could not join the network. Check the password and that the network is 2.4 GHz."
                    .to_string()
            }
            FailureReason::LinkError { code, message } => {
                format!("The printer reported an error ({}): {}", code, message)
            }
            FailureReason::Cancelled => "Provisioning was cancelled.".to_string(),
        }
    }
}

/// Errors related to the operation surface
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Operation already running")]
    AlreadyRunning,

    #[error("Device address unavailable: {0:?}")]
    AddressUnavailable(String),

    #[error("Unknown provisioning session {0}")]
    UnknownSession(ProvisioningHandle),

    #[error("Cannot {operation} in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ProvisioningState,
    },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Local scan error: {0}")]
    Wifi(#[from] WifiError),
}

/// Errors of the client-facing transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Frame codec for the printer control channel

use serde::{Deserialize, Serialize};

use crate::core::{
    events::LinkEvent,
    types::{Credentials, NetworkEntry, NetworkOrigin},
};

/// Request sent to the printer
#[derive(Debug, Clone, Copy)]
pub enum LinkRequest<'a> {
    Handshake,
    ListNetworks,
    SetWifi(&'a Credentials),
}

/// Turns domain requests into frames and frames into link events
pub trait FrameCodec: Send + Sync + 'static {
    fn encode(&self, request: LinkRequest<'_>) -> Vec<u8>;

    /// Decode one notified frame; undecodable frames become [`LinkEvent::Malformed`]
    fn decode(&self, frame: &[u8]) -> LinkEvent;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestFrame<'a> {
    Handshake,
    ListNetworks,
    SetWifi { ssid: String, password: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventFrame {
    HandshakeOk {
        serial: String,
    },
    HandshakeFailed,
    Network {
        ssid: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_secured")]
        secured: bool,
    },
    NetworkListDone,
    NetworkListFailed,
    WifiReceived,
    WifiOk,
    WifiRejected,
    Error {
        code: i32,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_secured() -> bool {
    true
}

/// JSON object per frame, tagged by `"type"`, SSIDs hex encoded
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFrameCodec;

impl FrameCodec for JsonFrameCodec {
    fn encode(&self, request: LinkRequest<'_>) -> Vec<u8> {
        let frame = match request {
            LinkRequest::Handshake => RequestFrame::Handshake,
            LinkRequest::ListNetworks => RequestFrame::ListNetworks,
            LinkRequest::SetWifi(credentials) => RequestFrame::SetWifi {
                ssid: hex::encode(&credentials.ssid),
                password: &credentials.password,
            },
        };

        // Serializing a plain enum of strings cannot fail
        serde_json::to_vec(&frame).unwrap_or_default()
    }

    fn decode(&self, frame: &[u8]) -> LinkEvent {
        let frame: EventFrame = match serde_json::from_slice(frame) {
            Ok(frame) => frame,
            Err(e) => return LinkEvent::Malformed(e.to_string()),
        };

        match frame {
            EventFrame::HandshakeOk { serial } if serial.trim().is_empty() => {
                LinkEvent::Malformed("handshake response without serial".to_string())
            }
            EventFrame::HandshakeOk { serial } => LinkEvent::HandshakeOk {
                serial: serial.trim().to_string(),
            },
            EventFrame::HandshakeFailed => LinkEvent::HandshakeSendFailed,
            EventFrame::Network {
                ssid,
                name,
                secured,
            } => match hex::decode(&ssid) {
                Ok(ssid) if ssid.is_empty() => {
                    LinkEvent::Malformed("network without ssid".to_string())
                }
                Ok(ssid) => LinkEvent::NetworkFound(NetworkEntry {
                    display_name: name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| String::from_utf8_lossy(&ssid).into_owned()),
                    ssid,
                    requires_password: secured,
                    origin: NetworkOrigin::DeviceReported,
                }),
                Err(e) => LinkEvent::Malformed(format!("invalid ssid encoding: {}", e)),
            },
            EventFrame::NetworkListDone => LinkEvent::NetworkListDone,
            EventFrame::NetworkListFailed => LinkEvent::NetworkListFailed,
            EventFrame::WifiReceived => LinkEvent::CredentialsReceived,
            EventFrame::WifiOk => LinkEvent::CredentialAccepted,
            EventFrame::WifiRejected => LinkEvent::CredentialRejected,
            EventFrame::Error { code, message } => LinkEvent::LinkError {
                code,
                message: message.unwrap_or_else(|| "Unknown".to_string()),
            },
        }
    }
}

//! JSON-RPC 2.0 message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    core::error::ServiceError,
    protocol::{notification::Notification, request::Request, response::Response},
};

/// JSON-RPC 2.0 request wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: RequestId,
}

/// JSON-RPC 2.0 response wrapper
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

/// JSON-RPC 2.0 notification wrapper
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Request ID (number or string)
///
/// `Null` is only used when answering a request whose id could not be read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes
impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Custom error codes
    pub const ALREADY_RUNNING: i32 = -32001;
    pub const INVALID_STATE: i32 = -32002;
    pub const BACKEND_ERROR: i32 = -32003;
    pub const UNKNOWN_SESSION: i32 = -32004;
    pub const UNAVAILABLE: i32 = -32005;

    fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::with_code(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found() -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_code(Self::INTERNAL_ERROR, message)
    }

    pub fn already_running(message: impl Into<String>) -> Self {
        Self::with_code(Self::ALREADY_RUNNING, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_STATE, message)
    }

    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::with_code(Self::BACKEND_ERROR, message)
    }

    pub fn unknown_session(message: impl Into<String>) -> Self {
        Self::with_code(Self::UNKNOWN_SESSION, message)
    }

    /// Feature not configured on this host
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_code(Self::UNAVAILABLE, message)
    }

    /// Attach structured detail
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&ServiceError> for JsonRpcError {
    fn from(error: &ServiceError) -> Self {
        let message = error.to_string();
        match error {
            ServiceError::AlreadyRunning => Self::already_running(message),
            ServiceError::AddressUnavailable(_) | ServiceError::InvalidCredentials(_) => {
                Self::invalid_params(message)
            }
            ServiceError::UnknownSession(_) => Self::unknown_session(message),
            ServiceError::InvalidState { state, .. } => match serde_json::to_value(state) {
                Ok(state) => Self::invalid_state(message).with_data(state),
                Err(_) => Self::invalid_state(message),
            },
            ServiceError::SessionClosed => Self::invalid_state(message),
            ServiceError::Radio(_) | ServiceError::Wifi(_) => Self::backend_error(message),
        }
    }
}

impl JsonRpcRequest {
    pub fn new(request: Request, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            request,
            id,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(result: Response, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(notification: Notification) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            error::RadioError,
            types::{DiscoveryOutcome, ProvisioningHandle, ProvisioningState},
        },
        protocol::{
            notification::DiscoveryFinishedParams,
            request::SelectDeviceParams,
            response::{AckResponse, SessionStartedResponse},
        },
    };

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JsonRpcRequest::new(
            Request::SelectDevice(SelectDeviceParams {
                address: "AA:BB".into(),
            }),
            RequestId::Number(1),
        );
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"select_device""#));
        assert!(json.contains(r#""id":1"#));

        let deserialized: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_jsonrpc_request_with_string_id() {
        let request =
            JsonRpcRequest::new(Request::GetDevices, RequestId::String("abc-123".to_string()));
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""id":"abc-123""#));
    }

    #[test]
    fn test_jsonrpc_response_success() {
        let handle = ProvisioningHandle::new();
        let response = JsonRpcResponse::success(
            Response::SessionStarted(SessionStartedResponse::ok(handle)),
            RequestId::Number(1),
        );
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""result""#));
        assert!(json.contains(r#""state":"connecting""#));
        assert!(!json.contains(r#""error""#));
        assert!(json.contains(r#""id":1"#));
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let response = JsonRpcResponse::error(
            JsonRpcError::from(&ServiceError::AlreadyRunning),
            RequestId::Number(1),
        );
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""error""#));
        assert!(json.contains(r#""code":-32001"#));
        assert!(!json.contains(r#""result""#));
    }

    #[test]
    fn test_parse_error_uses_null_id() {
        let response = JsonRpcResponse::error(JsonRpcError::parse_error(), RequestId::Null);
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""id":null"#));
        assert!(json.contains(r#""code":-32700"#));
    }

    #[test]
    fn test_jsonrpc_notification() {
        let notif = JsonRpcNotification::new(Notification::DiscoveryFinished(
            DiscoveryFinishedParams {
                outcome: DiscoveryOutcome::Completed,
                found_any: true,
            },
        ));
        let json = serde_json::to_string(&notif).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"discovery_finished""#));
        assert!(!json.contains(r#""id""#));
    }

    #[test]
    fn test_service_error_mapping() {
        let cases = [
            (ServiceError::AlreadyRunning, JsonRpcError::ALREADY_RUNNING),
            (
                ServiceError::AddressUnavailable(String::new()),
                JsonRpcError::INVALID_PARAMS,
            ),
            (
                ServiceError::InvalidCredentials("password required".into()),
                JsonRpcError::INVALID_PARAMS,
            ),
            (
                ServiceError::UnknownSession(ProvisioningHandle::new()),
                JsonRpcError::UNKNOWN_SESSION,
            ),
            (
                ServiceError::InvalidState {
                    operation: "submit credentials",
                    state: ProvisioningState::Connecting,
                },
                JsonRpcError::INVALID_STATE,
            ),
            (
                ServiceError::Radio(RadioError::AdapterUnavailable("hci0".into())),
                JsonRpcError::BACKEND_ERROR,
            ),
        ];

        for (error, code) in cases {
            assert_eq!(JsonRpcError::from(&error).code, code, "{}", error);
        }
    }

    #[test]
    fn test_invalid_state_carries_state() {
        let error = JsonRpcError::from(&ServiceError::InvalidState {
            operation: "list networks",
            state: ProvisioningState::Succeeded,
        });
        assert_eq!(error.data, Some(serde_json::json!({"state": "succeeded"})));
    }

    #[test]
    fn test_ack_result() {
        let response =
            JsonRpcResponse::success(Response::Ack(AckResponse::ok()), RequestId::Number(7));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","result":{"status":"ok"},"id":7}"#);
    }
}

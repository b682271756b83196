//! JSON-RPC request handler for Unix socket transport

use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    backend::{LocalScanner, RadioBackend},
    core::{
        coordinator::SessionCoordinator,
        error::ServiceError,
        events::CoordinatorEvent,
        scanner::LocalScanService,
        types::ProvisioningHandle,
    },
    protocol::{
        JsonRpcError, JsonRpcRequest, JsonRpcResponse, Request, RequestId, Response,
        request::{
            BeginDiscoveryParams, LocalNetworksParams, SelectDeviceParams, SessionParams,
            SubmitCredentialsParams,
        },
        response::{
            AckResponse, DevicesResponse, DiscoveryStartedResponse, LocalNetworksResponse,
            LocalScanResponse, NetworksResponse, SessionResponse, SessionStartedResponse,
        },
    },
};

/// JSON-RPC request handler
///
/// Long-running operations are acknowledged right away; their progress and
/// results reach the client as notifications.
pub struct RequestHandler<B: RadioBackend, S: LocalScanner> {
    coordinator: Arc<SessionCoordinator<B>>,
    local_scan: Option<Arc<LocalScanService<S>>>,
}

impl<B: RadioBackend, S: LocalScanner> RequestHandler<B, S> {
    pub fn new(
        coordinator: Arc<SessionCoordinator<B>>,
        local_scan: Option<Arc<LocalScanService<S>>>,
    ) -> Self {
        Self {
            coordinator,
            local_scan,
        }
    }

    /// Updates to forward to a client as notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.coordinator.subscribe()
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        let result = match request.request {
            Request::BeginDiscovery(params) => self.handle_begin_discovery(params).await,
            Request::StopDiscovery => self.handle_stop_discovery().await,
            Request::GetDevices => self.handle_get_devices().await,
            Request::SelectDevice(params) => self.handle_select_device(params).await,
            Request::RequestNetworkList(params) => self.handle_request_network_list(params).await,
            Request::GetNetworks(params) => self.handle_get_networks(params).await,
            Request::SubmitCredentials(params) => self.handle_submit_credentials(params).await,
            Request::Cancel(params) => self.handle_cancel(params).await,
            Request::GetSession(params) => self.session_response(params.handle).await,
            Request::ScanLocalNetworks => self.handle_scan_local_networks().await,
            Request::GetLocalNetworks(params) => self.handle_get_local_networks(params).await,
        };

        match result {
            Ok(response) => JsonRpcResponse::success(response, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    async fn handle_begin_discovery(
        &self,
        params: BeginDiscoveryParams,
    ) -> Result<Response, JsonRpcError> {
        let bound = params.timeout_secs.map(Duration::from_secs);
        let timeout_secs = bound
            .unwrap_or(self.coordinator.config().discovery_bound)
            .as_secs();

        // Devices reach the client through the notification stream
        let _updates = self.coordinator.begin_discovery(bound).await.map_err(rpc_error)?;

        Ok(Response::DiscoveryStarted(DiscoveryStartedResponse::ok(
            timeout_secs,
        )))
    }

    async fn handle_stop_discovery(&self) -> Result<Response, JsonRpcError> {
        self.coordinator.stop_discovery().await;
        Ok(Response::Ack(AckResponse::ok()))
    }

    async fn handle_get_devices(&self) -> Result<Response, JsonRpcError> {
        let snapshot = self.coordinator.discovery_snapshot().await;
        Ok(Response::Devices(DevicesResponse::ok(snapshot)))
    }

    async fn handle_select_device(
        &self,
        params: SelectDeviceParams,
    ) -> Result<Response, JsonRpcError> {
        let handle = self
            .coordinator
            .select_device(&params.address)
            .await
            .map_err(rpc_error)?;
        Ok(Response::SessionStarted(SessionStartedResponse::ok(handle)))
    }

    async fn handle_request_network_list(
        &self,
        params: SessionParams,
    ) -> Result<Response, JsonRpcError> {
        let _items = self
            .coordinator
            .request_network_list(params.handle)
            .await
            .map_err(rpc_error)?;
        Ok(Response::Ack(AckResponse::ok()))
    }

    async fn handle_get_networks(&self, params: SessionParams) -> Result<Response, JsonRpcError> {
        let networks = self
            .coordinator
            .selectable_networks(params.handle)
            .await
            .map_err(rpc_error)?;
        Ok(Response::Networks(NetworksResponse::ok(networks)))
    }

    async fn handle_submit_credentials(
        &self,
        params: SubmitCredentialsParams,
    ) -> Result<Response, JsonRpcError> {
        debug!("Submitting credentials for session {}", params.handle);
        self.coordinator
            .push_credentials(params.handle, params.network, params.password)
            .await
            .map_err(rpc_error)?;
        self.session_response(params.handle).await
    }

    async fn handle_cancel(&self, params: SessionParams) -> Result<Response, JsonRpcError> {
        self.coordinator
            .cancel(params.handle)
            .await
            .map_err(rpc_error)?;
        self.session_response(params.handle).await
    }

    async fn session_response(&self, handle: ProvisioningHandle) -> Result<Response, JsonRpcError> {
        let snapshot = self.coordinator.snapshot(handle).await.map_err(rpc_error)?;
        Ok(Response::Session(SessionResponse::ok(snapshot)))
    }

    fn local_scan(&self) -> Result<&LocalScanService<S>, JsonRpcError> {
        self.local_scan
            .as_deref()
            .ok_or_else(|| JsonRpcError::unavailable("No Wi-Fi interface configured"))
    }

    async fn handle_scan_local_networks(&self) -> Result<Response, JsonRpcError> {
        let service = self.local_scan()?;
        service.start_scan().await.map_err(rpc_error)?;
        Ok(Response::LocalScan(LocalScanResponse::ok(
            service.state().await,
        )))
    }

    async fn handle_get_local_networks(
        &self,
        params: LocalNetworksParams,
    ) -> Result<Response, JsonRpcError> {
        let service = self.local_scan()?;
        let networks = service.results().await;

        if let Some(handle) = params.handle
            && let Some(networks) = &networks
        {
            let ssids = networks.iter().map(|n| n.ssid.clone()).collect();
            self.coordinator
                .merge_local_networks(handle, ssids)
                .await
                .map_err(rpc_error)?;
        }

        Ok(Response::LocalNetworks(LocalNetworksResponse::ok(
            service.state().await,
            networks.unwrap_or_default(),
        )))
    }
}

fn rpc_error(error: ServiceError) -> JsonRpcError {
    JsonRpcError::from(&error)
}

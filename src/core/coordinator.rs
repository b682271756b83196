//! Session coordinator facade

use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info};

use crate::{
    backend::RadioBackend,
    core::{
        catalog::{SelectableNetwork, Selection},
        discovery::{DEFAULT_DISCOVERY_BOUND, DiscoverySession, DiscoverySnapshot},
        error::{ServiceError, ServiceResult},
        events::{CoordinatorEvent, DiscoveryUpdate, NetworkListItem},
        provisioning::{ProvisioningSession, SessionClient, SessionSnapshot, SessionTimeouts},
        types::{
            DeviceAddress, DiscoveredDevice, NetworkChoice, ProvisioningHandle,
            ProvisioningOutcome,
        },
    },
};

/// Capacity of the observer channel
const EVENT_CAPACITY: usize = 256;

/// Time bounds used by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub discovery_bound: Duration,
    pub session: SessionTimeouts,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            discovery_bound: DEFAULT_DISCOVERY_BOUND,
            session: SessionTimeouts::default(),
        }
    }
}

#[derive(Default)]
struct Inner {
    discovery: Option<DiscoverySession>,
    session: Option<ProvisioningSession>,
}

impl Inner {
    async fn stop_discovery(&mut self) {
        if let Some(discovery) = self.discovery.as_mut() {
            discovery.stop().await;
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing provisioning session {}", session.handle());
            session.close().await;
        }
    }
}

/// Top-level orchestrator
///
/// Runs at most one discovery session and at most one provisioning session at
/// a time, and hands the radio from one to the other. Dropping the coordinator
/// cancels whatever is running; the session tasks release the radio on their
/// own.
pub struct SessionCoordinator<B: RadioBackend> {
    backend: Arc<B>,
    config: CoordinatorConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl<B: RadioBackend> SessionCoordinator<B> {
    pub fn new(backend: Arc<B>, config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            config,
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Observe every update published by discovery and provisioning
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Start discovering devices
    ///
    /// An active provisioning session is cancelled first and its link released.
    /// The returned channel yields each new device and ends with one
    /// [`DiscoveryUpdate::Finished`].
    pub async fn begin_discovery(
        &self,
        bound: Option<Duration>,
    ) -> ServiceResult<mpsc::UnboundedReceiver<DiscoveryUpdate>> {
        let mut inner = self.inner.lock().await;
        if inner.discovery.as_ref().is_some_and(DiscoverySession::is_running) {
            return Err(ServiceError::AlreadyRunning);
        }

        inner.close_session().await;
        inner.discovery = None;

        let (updates, updates_rx) = mpsc::unbounded_channel();
        let bound = bound.unwrap_or(self.config.discovery_bound);
        let discovery =
            DiscoverySession::start(self.backend.clone(), Some(bound), updates, self.events.clone())
                .await?;
        inner.discovery = Some(discovery);
        Ok(updates_rx)
    }

    /// Stop discovery and wait until the radio is released
    pub async fn stop_discovery(&self) {
        self.inner.lock().await.stop_discovery().await;
    }

    /// Devices found by the latest discovery session, in discovery order
    pub async fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.discovery_snapshot()
            .await
            .map(|snapshot| snapshot.devices)
            .unwrap_or_default()
    }

    pub async fn discovery_snapshot(&self) -> Option<DiscoverySnapshot> {
        self.inner
            .lock()
            .await
            .discovery
            .as_ref()
            .map(DiscoverySession::snapshot)
    }

    /// Start provisioning the device at `address`
    ///
    /// Discovery is stopped and the radio released before the link is opened.
    /// A previous provisioning session is replaced. Connection failures show
    /// up as the session's terminal state, not as an error here.
    pub async fn select_device(&self, address: &str) -> ServiceResult<ProvisioningHandle> {
        let address = DeviceAddress::parse(address)
            .ok_or_else(|| ServiceError::AddressUnavailable(address.to_string()))?;

        let mut inner = self.inner.lock().await;
        inner.stop_discovery().await;
        inner.discovery = None;
        inner.close_session().await;

        let handle = ProvisioningHandle::new();
        info!("Selected {} (session {})", address, handle);
        inner.session = Some(ProvisioningSession::start(
            self.backend.clone(),
            handle,
            address,
            self.config.session,
            self.events.clone(),
        ));
        Ok(handle)
    }

    async fn client(&self, handle: ProvisioningHandle) -> ServiceResult<SessionClient> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .filter(|session| session.handle() == handle)
            .map(ProvisioningSession::client)
            .ok_or(ServiceError::UnknownSession(handle))
    }

    /// Ask the printer for the networks it sees
    pub async fn request_network_list(
        &self,
        handle: ProvisioningHandle,
    ) -> ServiceResult<mpsc::UnboundedReceiver<NetworkListItem>> {
        self.client(handle).await?.request_network_list().await
    }

    pub async fn selectable_networks(
        &self,
        handle: ProvisioningHandle,
    ) -> ServiceResult<Vec<SelectableNetwork>> {
        Ok(self.snapshot(handle).await?.selectable_networks())
    }

    /// Map an index of the selectable list back to a network or the manual slot
    pub async fn resolve_network(
        &self,
        handle: ProvisioningHandle,
        index: usize,
    ) -> ServiceResult<Option<Selection>> {
        Ok(self.snapshot(handle).await?.catalog.resolve(index))
    }

    /// Offer SSIDs from the host's own scan as suggestions
    pub async fn merge_local_networks(
        &self,
        handle: ProvisioningHandle,
        ssids: Vec<String>,
    ) -> ServiceResult<()> {
        self.client(handle).await?.merge_local_networks(ssids)
    }

    /// Push credentials and wait for the printer's verdict
    pub async fn submit_credentials(
        &self,
        handle: ProvisioningHandle,
        choice: NetworkChoice,
        password: String,
    ) -> ServiceResult<ProvisioningOutcome> {
        let client = self.client(handle).await?;
        client.submit_credentials(choice, password).await
    }

    /// Push credentials; the verdict is published as a state change
    pub async fn push_credentials(
        &self,
        handle: ProvisioningHandle,
        choice: NetworkChoice,
        password: String,
    ) -> ServiceResult<()> {
        let client = self.client(handle).await?;
        client.push_credentials(choice, password).await
    }

    /// Cancel a session and wait until its link is released
    ///
    /// The session stays queryable afterwards.
    pub async fn cancel(&self, handle: ProvisioningHandle) -> ServiceResult<()> {
        let client = self.client(handle).await?;
        client.cancel();
        client.released().await;
        Ok(())
    }

    pub async fn snapshot(&self, handle: ProvisioningHandle) -> ServiceResult<SessionSnapshot> {
        Ok(self.client(handle).await?.snapshot())
    }

    /// Stop everything and wait for the radio to be released
    pub async fn shutdown(&self) {
        let (discovery, session) = {
            let mut inner = self.inner.lock().await;
            (inner.discovery.take(), inner.session.take())
        };
        if let Some(mut discovery) = discovery {
            discovery.stop().await;
        }
        if let Some(mut session) = session {
            session.close().await;
        }
        info!("Coordinator shut down");
    }
}

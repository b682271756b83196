//! Mock radio backend for testing

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::{Mutex, mpsc::UnboundedSender, watch};

use crate::backend::RadioBackend;
use crate::core::{
    error::{RadioError, RadioResult},
    events::{DiscoveryEvent, LinkEvent},
    types::{Credentials, DeviceAddress, LinkId, SightingName},
};

/// Link operation a test can hold in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    OpenLink,
    Handshake,
    ListNetworks,
    Credentials,
}

/// Internal state for the mock backend
#[derive(Debug, Default)]
struct MockState {
    discovery_sink: Option<UnboundedSender<DiscoveryEvent>>,
    discovery_starts: usize,
    discovery_stops: usize,
    should_fail_discovery: bool,

    next_link: u64,
    links: HashMap<LinkId, UnboundedSender<LinkEvent>>,
    opened: Vec<(LinkId, DeviceAddress)>,
    close_calls: HashMap<LinkId, usize>,
    open_failure: Option<RadioError>,
    should_fail_send: bool,

    attempts: HashMap<MockOperation, usize>,
    handshakes: usize,
    list_requests: usize,
    pushed: Vec<Credentials>,
}

/// Mock radio backend for testing
///
/// Records every call and lets tests inject sightings and link events without
/// a Bluetooth adapter. Held operations stay pending until released, like a
/// radio that never answers.
#[derive(Debug, Clone)]
pub struct MockRadioBackend {
    inner: Arc<Mutex<MockState>>,
    held: Arc<watch::Sender<HashSet<MockOperation>>>,
}

impl Default for MockRadioBackend {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            held: Arc::new(watch::channel(HashSet::new()).0),
        }
    }
}

impl MockRadioBackend {
    /// Create a new mock backend with default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every call of `operation` pending until [`release`](Self::release)
    pub fn hold(&self, operation: MockOperation) {
        self.held.send_modify(|held| {
            held.insert(operation);
        });
    }

    pub fn release(&self, operation: MockOperation) {
        self.held.send_modify(|held| {
            held.remove(&operation);
        });
    }

    /// Calls of `operation` made so far, including held ones
    pub async fn attempts(&self, operation: MockOperation) -> usize {
        self.inner
            .lock()
            .await
            .attempts
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    async fn gate(&self, operation: MockOperation) {
        *self
            .inner
            .lock()
            .await
            .attempts
            .entry(operation)
            .or_default() += 1;
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !held.contains(&operation)).await;
    }

    /// Configure mock to fail starting discovery
    pub async fn set_discovery_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_discovery = should_fail;
    }

    /// Configure mock to fail opening links with the given error
    pub async fn set_open_failure(&self, error: Option<RadioError>) {
        self.inner.lock().await.open_failure = error;
    }

    /// Configure mock to fail every send on open links
    pub async fn set_send_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_send = should_fail;
    }

    /// Simulate a discovery sighting
    pub async fn emit_sighting(&self, address: &str, name: SightingName) {
        let state = self.inner.lock().await;
        if let Some(sink) = &state.discovery_sink {
            let _ = sink.send(DiscoveryEvent::Sighting {
                address: address.to_string(),
                name,
            });
        }
    }

    /// Simulate the radio ending its inquiry
    pub async fn emit_discovery_finished(&self) {
        let state = self.inner.lock().await;
        if let Some(sink) = &state.discovery_sink {
            let _ = sink.send(DiscoveryEvent::Finished);
        }
    }

    /// Deliver an event on the most recently opened link that is still open
    ///
    /// Returns false when no link is open or the receiver is gone.
    pub async fn emit_link_event(&self, event: LinkEvent) -> bool {
        let state = self.inner.lock().await;
        let Some((link, _)) = state
            .opened
            .iter()
            .rev()
            .find(|(link, _)| state.links.contains_key(link))
        else {
            return false;
        };
        state
            .links
            .get(link)
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    /// Simulate the device going out of range
    pub async fn drop_links(&self) {
        self.inner.lock().await.links.clear();
    }

    pub async fn discovery_starts(&self) -> usize {
        self.inner.lock().await.discovery_starts
    }

    pub async fn discovery_stops(&self) -> usize {
        self.inner.lock().await.discovery_stops
    }

    pub async fn is_discovering(&self) -> bool {
        self.inner.lock().await.discovery_sink.is_some()
    }

    /// Addresses of every link opened so far
    pub async fn opened_addresses(&self) -> Vec<DeviceAddress> {
        self.inner
            .lock()
            .await
            .opened
            .iter()
            .map(|(_, address)| address.clone())
            .collect()
    }

    /// Number of links currently open
    pub async fn open_links(&self) -> usize {
        self.inner.lock().await.links.len()
    }

    /// How many times each opened link was closed
    pub async fn close_counts(&self) -> Vec<usize> {
        let state = self.inner.lock().await;
        state
            .opened
            .iter()
            .map(|(link, _)| state.close_calls.get(link).copied().unwrap_or(0))
            .collect()
    }

    pub async fn handshakes_sent(&self) -> usize {
        self.inner.lock().await.handshakes
    }

    pub async fn list_requests_sent(&self) -> usize {
        self.inner.lock().await.list_requests
    }

    pub async fn pushed_credentials(&self) -> Vec<Credentials> {
        self.inner.lock().await.pushed.clone()
    }

    async fn check_send(&self, link: LinkId) -> RadioResult<()> {
        let state = self.inner.lock().await;
        if !state.links.contains_key(&link) {
            return Err(RadioError::UnknownLink(link));
        }
        if state.should_fail_send {
            return Err(RadioError::SendFailed("Mock send failure".into()));
        }
        Ok(())
    }
}

impl RadioBackend for MockRadioBackend {
    async fn start_discovery(&self, sink: UnboundedSender<DiscoveryEvent>) -> RadioResult<()> {
        let mut state = self.inner.lock().await;
        if state.should_fail_discovery {
            return Err(RadioError::DiscoveryFailed("Mock discovery failure".into()));
        }
        if state.discovery_sink.is_some() {
            return Err(RadioError::DeviceBusy("discovery already running".into()));
        }
        state.discovery_starts += 1;
        state.discovery_sink = Some(sink);
        Ok(())
    }

    async fn stop_discovery(&self) -> RadioResult<()> {
        let mut state = self.inner.lock().await;
        if state.discovery_sink.take().is_some() {
            state.discovery_stops += 1;
        }
        Ok(())
    }

    async fn open_link(
        &self,
        address: &DeviceAddress,
        sink: UnboundedSender<LinkEvent>,
    ) -> RadioResult<LinkId> {
        self.gate(MockOperation::OpenLink).await;
        let mut state = self.inner.lock().await;
        if let Some(error) = state.open_failure.clone() {
            return Err(error);
        }
        if state.discovery_sink.is_some() {
            return Err(RadioError::DeviceBusy("adapter is discovering".into()));
        }
        if !state.links.is_empty() {
            return Err(RadioError::DeviceBusy("another link is open".into()));
        }

        state.next_link += 1;
        let link = LinkId(state.next_link);
        state.links.insert(link, sink);
        state.opened.push((link, address.clone()));
        Ok(link)
    }

    async fn close_link(&self, link: LinkId) -> RadioResult<()> {
        let mut state = self.inner.lock().await;
        *state.close_calls.entry(link).or_default() += 1;
        state.links.remove(&link);
        Ok(())
    }

    async fn send_handshake(&self, link: LinkId) -> RadioResult<()> {
        self.gate(MockOperation::Handshake).await;
        self.check_send(link).await?;
        self.inner.lock().await.handshakes += 1;
        Ok(())
    }

    async fn send_list_networks(&self, link: LinkId) -> RadioResult<()> {
        self.gate(MockOperation::ListNetworks).await;
        self.check_send(link).await?;
        self.inner.lock().await.list_requests += 1;
        Ok(())
    }

    async fn send_credentials(&self, link: LinkId, credentials: &Credentials) -> RadioResult<()> {
        self.gate(MockOperation::Credentials).await;
        self.check_send(link).await?;
        self.inner.lock().await.pushed.push(credentials.clone());
        Ok(())
    }
}

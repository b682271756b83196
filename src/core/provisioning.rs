//! Provisioning session: handshake, network listing and credential push over
//! one link

use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::RadioBackend,
    core::{
        catalog::{NetworkCatalog, SelectableNetwork, Selection},
        deadline,
        error::{FailureReason, RadioResult, ServiceError, ServiceResult},
        events::{CoordinatorEvent, LinkEvent, NetworkListItem, SessionUpdate},
        types::{
            Credentials, DeviceAddress, LinkId, NetworkChoice, NetworkEntry, NetworkOrigin, Phase,
            ProvisioningHandle, ProvisioningOutcome, ProvisioningState,
        },
    },
};

/// Longest SSID accepted by 802.11
const MAX_SSID_LEN: usize = 32;

/// Per-phase time bounds of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub handshake: Duration,
    pub network_list: Duration,
    pub credentials: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            network_list: Duration::from_secs(15),
            credentials: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a provisioning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub handle: ProvisioningHandle,
    pub address: DeviceAddress,
    pub state: ProvisioningState,
    pub serial: Option<String>,
    pub catalog: NetworkCatalog,
    pub warnings: Vec<String>,
}

impl SessionSnapshot {
    pub fn selectable_networks(&self) -> Vec<SelectableNetwork> {
        self.catalog.selectable_list()
    }
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
enum Effect {
    SendHandshake,
    SendListNetworks,
    SendCredentials(Credentials),
    /// Emitted at most once per session
    ReleaseLink,
    Publish(SessionUpdate),
}

/// Provisioning state machine
///
/// Pure transition function: every input returns the effects the session task
/// has to carry out, in order.
#[derive(Debug)]
struct ProvisioningMachine {
    handle: ProvisioningHandle,
    address: DeviceAddress,
    timeouts: SessionTimeouts,
    state: ProvisioningState,
    deadline: Option<Instant>,
    serial: Option<String>,
    catalog: NetworkCatalog,
    warnings: Vec<String>,
    protocol_errors: u32,
    link_open: bool,
}

impl ProvisioningMachine {
    fn new(handle: ProvisioningHandle, address: DeviceAddress, timeouts: SessionTimeouts) -> Self {
        Self {
            handle,
            address,
            timeouts,
            state: ProvisioningState::Connecting,
            deadline: None,
            serial: None,
            catalog: NetworkCatalog::new(),
            warnings: Vec::new(),
            protocol_errors: 0,
            link_open: false,
        }
    }

    fn state(&self) -> &ProvisioningState {
        &self.state
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            handle: self.handle,
            address: self.address.clone(),
            state: self.state.clone(),
            serial: self.serial.clone(),
            catalog: self.catalog.clone(),
            warnings: self.warnings.clone(),
        }
    }

    /// Enter a non-terminal state, starting a fresh protocol-error budget
    fn enter(&mut self, state: ProvisioningState, deadline: Option<Instant>) -> Effect {
        self.state = state.clone();
        self.deadline = deadline;
        self.protocol_errors = 0;
        Effect::Publish(SessionUpdate::StateChanged(state))
    }

    fn fail(&mut self, reason: FailureReason) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if std::mem::take(&mut self.link_open) {
            effects.push(Effect::ReleaseLink);
        }
        if self.state == ProvisioningState::ListingNetworks {
            effects.push(Effect::Publish(SessionUpdate::Network(
                NetworkListItem::Failed(reason.to_string()),
            )));
        }

        self.state = ProvisioningState::Failed(reason.clone());
        self.deadline = None;
        effects.push(Effect::Publish(SessionUpdate::StateChanged(
            ProvisioningState::Failed(reason),
        )));
        effects
    }

    fn warn(&mut self, warning: String) -> Effect {
        self.warnings.push(warning.clone());
        Effect::Publish(SessionUpdate::Warning(warning))
    }

    /// First protocol error within a phase is tolerated, the second is fatal
    fn protocol_error(&mut self, detail: String) -> Vec<Effect> {
        self.protocol_errors += 1;
        if self.protocol_errors > 1 {
            return self.fail(FailureReason::ProtocolError(detail));
        }
        vec![self.warn(format!("protocol error: {}", detail))]
    }

    /// Leave ListingNetworks, keeping whatever was received
    fn finish_listing(&mut self, warning: Option<String>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match warning {
            None => effects.push(Effect::Publish(SessionUpdate::Network(NetworkListItem::Done))),
            Some(warning) => {
                effects.push(self.warn(warning.clone()));
                effects.push(Effect::Publish(SessionUpdate::Network(
                    NetworkListItem::Failed(warning),
                )));
            }
        }
        effects.push(self.enter(ProvisioningState::Ready, None));
        effects
    }

    fn link_opened(&mut self, now: Instant) -> Vec<Effect> {
        if self.state != ProvisioningState::Connecting {
            return Vec::new();
        }
        self.link_open = true;
        vec![
            self.enter(
                ProvisioningState::AwaitingHandshake,
                Some(now + self.timeouts.handshake),
            ),
            Effect::SendHandshake,
        ]
    }

    fn link_open_failed(&mut self, detail: String) -> Vec<Effect> {
        self.fail(FailureReason::ConnectionError(detail))
    }

    /// Link went away underneath the session
    fn link_lost(&mut self) -> Vec<Effect> {
        self.fail(FailureReason::ConnectionError("link lost".to_string()))
    }

    /// A request of `phase` could not be handed to the radio
    ///
    /// Only matters while that phase is still current.
    fn send_failed(&mut self, phase: Phase, detail: String) -> Vec<Effect> {
        match (phase, &self.state) {
            (Phase::NetworkList, ProvisioningState::ListingNetworks) => {
                self.finish_listing(Some(format!("network list request failed: {}", detail)))
            }
            (Phase::Handshake, ProvisioningState::AwaitingHandshake)
            | (Phase::Credentials, ProvisioningState::AwaitingCredentialResult) => {
                self.fail(FailureReason::ConnectionError(detail))
            }
            (phase, state) => {
                debug!("Ignoring failed {} send while {:?}: {}", phase, state, detail);
                Vec::new()
            }
        }
    }

    fn request_network_list(&mut self, now: Instant) -> ServiceResult<Vec<Effect>> {
        if self.state != ProvisioningState::Ready {
            return Err(ServiceError::InvalidState {
                operation: "list networks",
                state: self.state.clone(),
            });
        }

        self.catalog.clear_reported();
        Ok(vec![
            self.enter(
                ProvisioningState::ListingNetworks,
                Some(now + self.timeouts.network_list),
            ),
            Effect::SendListNetworks,
        ])
    }

    /// Map a network choice to the credentials to push
    fn credentials_for(&self, choice: &NetworkChoice, password: String) -> ServiceResult<Credentials> {
        let entry = match choice {
            NetworkChoice::Index(index) => match self.catalog.resolve(*index) {
                Some(Selection::Network(entry)) => entry,
                Some(Selection::Manual) => {
                    return Err(ServiceError::InvalidCredentials(
                        "manual entry selected without a network name".to_string(),
                    ));
                }
                None => {
                    return Err(ServiceError::InvalidCredentials(format!(
                        "no network at index {}",
                        index
                    )));
                }
            },
            NetworkChoice::Ssid(ssid) => {
                self.catalog
                    .find_ssid(ssid)
                    .cloned()
                    .unwrap_or_else(|| NetworkEntry {
                        ssid: ssid.clone(),
                        display_name: String::from_utf8_lossy(ssid).into_owned(),
                        requires_password: true,
                        origin: NetworkOrigin::Manual,
                    })
            }
            NetworkChoice::Manual(name) => self.catalog.add_manual(name),
        };

        if entry.ssid.is_empty() {
            return Err(ServiceError::InvalidCredentials(
                "network name is empty".to_string(),
            ));
        }
        if entry.ssid.len() > MAX_SSID_LEN {
            return Err(ServiceError::InvalidCredentials(format!(
                "network name is longer than {} bytes",
                MAX_SSID_LEN
            )));
        }
        if entry.requires_password && password.is_empty() {
            return Err(ServiceError::InvalidCredentials(format!(
                "network {} requires a password",
                entry.display_name
            )));
        }

        Ok(Credentials {
            ssid: entry.ssid,
            password,
        })
    }

    fn submit_credentials(
        &mut self,
        now: Instant,
        choice: &NetworkChoice,
        password: String,
    ) -> ServiceResult<Vec<Effect>> {
        if !matches!(
            self.state,
            ProvisioningState::Ready | ProvisioningState::ListingNetworks
        ) {
            return Err(ServiceError::InvalidState {
                operation: "submit credentials",
                state: self.state.clone(),
            });
        }

        let credentials = self.credentials_for(choice, password)?;

        let mut effects = Vec::new();
        if self.state == ProvisioningState::ListingNetworks {
            effects.extend(self.finish_listing(Some("network listing abandoned".to_string())));
        }
        effects.push(self.enter(
            ProvisioningState::AwaitingCredentialResult,
            Some(now + self.timeouts.credentials),
        ));
        effects.push(Effect::SendCredentials(credentials));
        Ok(effects)
    }

    fn merge_local_networks(&mut self, ssids: &[String]) {
        self.catalog.merge_local_scan(ssids);
    }

    fn handle_event(&mut self, event: LinkEvent) -> Vec<Effect> {
        use ProvisioningState as S;

        let state = self.state.clone();
        let unexpected = format!("unexpected {} while {:?}", event.name(), state);
        match (&state, event) {
            (S::Connecting | S::Succeeded | S::Failed(_), _) => Vec::new(),

            (_, LinkEvent::Malformed(detail)) => {
                self.protocol_error(format!("malformed frame: {}", detail))
            }
            (S::ListingNetworks, LinkEvent::LinkError { code, message }) => self.finish_listing(
                Some(format!("printer error {} while listing: {}", code, message)),
            ),
            (_, LinkEvent::LinkError { code, message }) => {
                self.fail(FailureReason::LinkError { code, message })
            }

            (S::AwaitingHandshake, LinkEvent::HandshakeOk { serial }) => {
                info!("Printer {} identified as {}", self.address, serial);
                self.serial = Some(serial);
                vec![self.enter(S::Ready, None)]
            }
            (S::AwaitingHandshake, LinkEvent::HandshakeSendFailed) => self.fail(
                FailureReason::ConnectionError("handshake could not be sent".to_string()),
            ),
            (S::AwaitingHandshake, _) => self.protocol_error(unexpected),

            (S::ListingNetworks, LinkEvent::NetworkFound(mut entry)) => {
                entry.origin = NetworkOrigin::DeviceReported;
                self.catalog.add_reported(entry.clone());
                vec![Effect::Publish(SessionUpdate::Network(
                    NetworkListItem::Found(entry),
                ))]
            }
            (S::ListingNetworks, LinkEvent::NetworkListDone) => self.finish_listing(None),
            (S::ListingNetworks, LinkEvent::NetworkListFailed) => self.finish_listing(Some(
                "printer could not list networks".to_string(),
            )),

            (S::AwaitingCredentialResult, LinkEvent::CredentialsReceived) => {
                vec![Effect::Publish(SessionUpdate::Configuring)]
            }
            (S::AwaitingCredentialResult, LinkEvent::CredentialAccepted) => {
                let mut effects = Vec::new();
                if std::mem::take(&mut self.link_open) {
                    effects.push(Effect::ReleaseLink);
                }
                self.state = S::Succeeded;
                self.deadline = None;
                effects.push(Effect::Publish(SessionUpdate::StateChanged(S::Succeeded)));
                effects
            }
            (S::AwaitingCredentialResult, LinkEvent::CredentialRejected) => {
                self.fail(FailureReason::CredentialRejected)
            }

            // Responses of completed phases
            (
                S::Ready | S::ListingNetworks | S::AwaitingCredentialResult,
                LinkEvent::HandshakeOk { .. } | LinkEvent::HandshakeSendFailed,
            )
            | (
                S::Ready | S::AwaitingCredentialResult,
                LinkEvent::NetworkFound(_)
                | LinkEvent::NetworkListDone
                | LinkEvent::NetworkListFailed,
            ) => {
                debug!("Discarding stale event: {}", unexpected);
                Vec::new()
            }

            // Credential results before any push
            (
                S::Ready | S::ListingNetworks,
                LinkEvent::CredentialsReceived
                | LinkEvent::CredentialAccepted
                | LinkEvent::CredentialRejected,
            ) => self.protocol_error(unexpected),
        }
    }

    /// Deadline of the current phase elapsed
    fn expire(&mut self, now: Instant) -> Vec<Effect> {
        if self.deadline.is_none_or(|deadline| now < deadline) {
            return Vec::new();
        }

        match self.state {
            ProvisioningState::AwaitingHandshake => {
                self.fail(FailureReason::Timeout(Phase::Handshake))
            }
            ProvisioningState::ListingNetworks => self.finish_listing(Some(format!(
                "{} did not finish in time",
                Phase::NetworkList
            ))),
            ProvisioningState::AwaitingCredentialResult => {
                self.fail(FailureReason::Timeout(Phase::Credentials))
            }
            _ => {
                self.deadline = None;
                Vec::new()
            }
        }
    }

    fn cancel(&mut self) -> Vec<Effect> {
        self.fail(FailureReason::Cancelled)
    }
}

/// Request from a session client to the session task
enum Command {
    ListNetworks {
        items: mpsc::UnboundedSender<NetworkListItem>,
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    Submit {
        choice: NetworkChoice,
        password: String,
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    MergeLocal(Vec<String>),
    Cancel,
}

/// Cloneable access to a running provisioning session
#[derive(Clone)]
pub struct SessionClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionClient {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Error for a command the session task did not take
    fn closed(&self, operation: &'static str) -> ServiceError {
        let state = self.snapshot.borrow().state.clone();
        if state.is_terminal() {
            ServiceError::InvalidState { operation, state }
        } else {
            ServiceError::SessionClosed
        }
    }

    /// Ask the printer for its networks
    ///
    /// The returned channel yields every reported network and ends with
    /// [`NetworkListItem::Done`] or [`NetworkListItem::Failed`].
    pub async fn request_network_list(
        &self,
    ) -> ServiceResult<mpsc::UnboundedReceiver<NetworkListItem>> {
        let (items, items_rx) = mpsc::unbounded_channel();
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::ListNetworks { items, reply })
            .map_err(|_| self.closed("list networks"))?;
        reply_rx.await.map_err(|_| self.closed("list networks"))??;
        Ok(items_rx)
    }

    /// Push credentials without waiting for the printer's verdict
    ///
    /// Returns once the session accepted the credentials and handed the push
    /// to the radio.
    pub async fn push_credentials(
        &self,
        choice: NetworkChoice,
        password: String,
    ) -> ServiceResult<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                choice,
                password,
                reply,
            })
            .map_err(|_| self.closed("submit credentials"))?;
        reply_rx
            .await
            .map_err(|_| self.closed("submit credentials"))?
    }

    /// Wait until the session reaches a terminal state
    pub async fn outcome(&self) -> ServiceResult<ProvisioningOutcome> {
        let mut snapshot = self.snapshot.clone();
        let state = snapshot
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| ServiceError::SessionClosed)?
            .state
            .clone();

        match state {
            ProvisioningState::Succeeded => Ok(ProvisioningOutcome::Succeeded),
            ProvisioningState::Failed(reason) => Ok(ProvisioningOutcome::Failed(reason)),
            state => Err(ServiceError::InvalidState {
                operation: "submit credentials",
                state,
            }),
        }
    }

    /// Push credentials and wait for the terminal outcome
    pub async fn submit_credentials(
        &self,
        choice: NetworkChoice,
        password: String,
    ) -> ServiceResult<ProvisioningOutcome> {
        self.push_credentials(choice, password).await?;
        self.outcome().await
    }

    /// Offer the host's scan results as suggestions
    pub fn merge_local_networks(&self, ssids: Vec<String>) -> ServiceResult<()> {
        self.commands
            .send(Command::MergeLocal(ssids))
            .map_err(|_| self.closed("merge local networks"))
    }

    /// Request cancellation; a finished session ignores it
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Wait until the session task has exited and released its link
    pub async fn released(&self) {
        let mut snapshot = self.snapshot.clone();
        while snapshot.changed().await.is_ok() {}
    }
}

/// Provisioning session bound to one printer
///
/// The session task owns the link. Dropping the session cancels it and the
/// task releases the link in the background.
pub struct ProvisioningSession {
    handle: ProvisioningHandle,
    client: SessionClient,
    task: Option<JoinHandle<()>>,
}

impl ProvisioningSession {
    /// Spawn the session task, which opens the link and starts the handshake
    pub fn start<B: RadioBackend>(
        backend: Arc<B>,
        handle: ProvisioningHandle,
        address: DeviceAddress,
        timeouts: SessionTimeouts,
        events: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        let machine = ProvisioningMachine::new(handle, address, timeouts);
        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            backend,
            machine,
            link: None,
            sends: JoinSet::new(),
            list_items: None,
            events,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(task.run(commands_rx));

        Self {
            handle,
            client: SessionClient { commands, snapshot },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> ProvisioningHandle {
        self.handle
    }

    pub fn client(&self) -> SessionClient {
        self.client.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.client.snapshot()
    }

    /// Cancel the session and wait until the link is released
    pub async fn close(&mut self) {
        self.client.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Provisioning task for {} failed: {}", self.handle, e);
        }
    }
}

impl Drop for ProvisioningSession {
    fn drop(&mut self) {
        self.client.cancel();
    }
}

/// Request handed to the radio by the session task
enum Outgoing {
    Handshake,
    ListNetworks,
    Credentials(Credentials),
}

struct SessionTask<B: RadioBackend> {
    backend: Arc<B>,
    machine: ProvisioningMachine,
    link: Option<LinkId>,
    /// Requests handed to the radio; the loop keeps running while they are
    /// in flight
    sends: JoinSet<(Phase, RadioResult<()>)>,
    list_items: Option<mpsc::UnboundedSender<NetworkListItem>>,
    events: broadcast::Sender<CoordinatorEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<B: RadioBackend> SessionTask<B> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let handle = self.machine.handle;
        let address = self.machine.address.clone();
        info!("Provisioning session {} connecting to {}", handle, address);
        self.publish(SessionUpdate::StateChanged(ProvisioningState::Connecting));

        let (sink, mut link_events) = mpsc::unbounded_channel();
        let backend = self.backend.clone();
        let mut open = Box::pin(backend.open_link(&address, sink));

        let opened = loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    self.on_command(command).await;
                    if self.machine.state().is_terminal() {
                        break None;
                    }
                }
                result = &mut open => break Some(result),
            }
        };
        // Cancelled while connecting abandons the attempt
        drop(open);

        match opened {
            Some(Ok(link)) => {
                debug!("{} opened for session {}", link, handle);
                self.link = Some(link);
                let effects = self.machine.link_opened(Instant::now());
                self.apply(effects).await;
            }
            Some(Err(e)) => {
                warn!("Cannot open link to {}: {}", address, e);
                let effects = self.machine.link_open_failed(e.to_string());
                self.apply(effects).await;
            }
            None => {}
        }

        while !self.machine.state().is_terminal() {
            tokio::select! {
                biased;

                command = commands.recv() => self.on_command(command).await,
                _ = deadline::expired(self.machine.deadline()) => {
                    let effects = self.machine.expire(Instant::now());
                    self.apply(effects).await;
                }
                Some(sent) = self.sends.join_next(), if !self.sends.is_empty() => {
                    match sent {
                        Ok((_, Ok(()))) => {}
                        Ok((phase, Err(e))) => {
                            warn!("Sending {} request to {} failed: {}", phase, address, e);
                            let effects = self.machine.send_failed(phase, e.to_string());
                            self.apply(effects).await;
                        }
                        Err(e) => error!("Send task of session {} failed: {}", handle, e),
                    }
                }
                event = link_events.recv() => {
                    let effects = match event {
                        Some(event) => {
                            debug!("Session {} received {}", handle, event.name());
                            self.machine.handle_event(event)
                        }
                        None => {
                            warn!("Link to {} dropped", address);
                            self.machine.link_lost()
                        }
                    };
                    self.apply(effects).await;
                }
            }
        }

        info!(
            "Provisioning session {} finished: {:?}",
            handle,
            self.machine.state()
        );
    }

    async fn on_command(&mut self, command: Option<Command>) {
        // Accepted commands are answered once their effects are applied, so
        // the caller observes the new snapshot.
        let mut accepted = None;
        let effects = match command {
            None | Some(Command::Cancel) => self.machine.cancel(),
            Some(Command::ListNetworks { items, reply }) => {
                match self.machine.request_network_list(Instant::now()) {
                    Ok(effects) => {
                        self.list_items = Some(items);
                        accepted = Some(reply);
                        effects
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Vec::new()
                    }
                }
            }
            Some(Command::Submit {
                choice,
                password,
                reply,
            }) => match self
                .machine
                .submit_credentials(Instant::now(), &choice, password)
            {
                Ok(effects) => {
                    accepted = Some(reply);
                    effects
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            Some(Command::MergeLocal(ssids)) => {
                self.machine.merge_local_networks(&ssids);
                Vec::new()
            }
        };
        self.apply(effects).await;

        if let Some(reply) = accepted {
            let _ = reply.send(Ok(()));
        }
    }

    /// Carry out effects in order, then publish the resulting snapshot
    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendHandshake => self.send(Outgoing::Handshake),
                Effect::SendListNetworks => self.send(Outgoing::ListNetworks),
                Effect::SendCredentials(credentials) => {
                    debug!(
                        "Pushing credentials for {}",
                        String::from_utf8_lossy(&credentials.ssid)
                    );
                    self.send(Outgoing::Credentials(credentials));
                }
                Effect::ReleaseLink => {
                    self.sends.abort_all();
                    if let Some(link) = self.link.take() {
                        if let Err(e) = self.backend.close_link(link).await {
                            warn!("Failed to close {}: {}", link, e);
                        }
                        debug!("{} released", link);
                    }
                }
                Effect::Publish(update) => self.publish(update),
            }
        }

        self.snapshot.send_replace(self.machine.snapshot());
    }

    /// Hand a request to the radio; its result comes back through `sends`
    fn send(&mut self, request: Outgoing) {
        let Some(link) = self.link else {
            return;
        };
        let backend = self.backend.clone();
        self.sends.spawn(async move {
            match request {
                Outgoing::Handshake => (Phase::Handshake, backend.send_handshake(link).await),
                Outgoing::ListNetworks => {
                    (Phase::NetworkList, backend.send_list_networks(link).await)
                }
                Outgoing::Credentials(credentials) => (
                    Phase::Credentials,
                    backend.send_credentials(link, &credentials).await,
                ),
            }
        });
    }

    fn publish(&mut self, update: SessionUpdate) {
        match &update {
            SessionUpdate::StateChanged(state) => {
                info!("Session {} -> {:?}", self.machine.handle, state)
            }
            SessionUpdate::Warning(warning) => {
                warn!("Session {}: {}", self.machine.handle, warning)
            }
            SessionUpdate::Network(item) => {
                if let Some(items) = &self.list_items {
                    let _ = items.send(item.clone());
                }
                if item.is_final() {
                    self.list_items = None;
                }
            }
            SessionUpdate::Configuring => {
                info!("Printer {} is joining the network", self.machine.address)
            }
        }

        let _ = self.events.send(CoordinatorEvent::Session {
            handle: self.machine.handle,
            update,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockOperation, MockRadioBackend};
    use crate::core::error::RadioError;
    use pretty_assertions::assert_eq;

    fn machine() -> ProvisioningMachine {
        ProvisioningMachine::new(
            ProvisioningHandle::new(),
            DeviceAddress::parse("AA:BB").unwrap(),
            SessionTimeouts::default(),
        )
    }

    /// Machine that completed the handshake
    fn ready_machine(now: Instant) -> ProvisioningMachine {
        let mut sm = machine();
        sm.link_opened(now);
        sm.handle_event(LinkEvent::HandshakeOk {
            serial: "N411A0001".into(),
        });
        assert_eq!(sm.state(), &ProvisioningState::Ready);
        sm
    }

    fn home_net() -> NetworkEntry {
        NetworkEntry::reported(b"HomeNet".to_vec(), true)
    }

    fn state_changes(effects: &[Effect]) -> Vec<ProvisioningState> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Publish(SessionUpdate::StateChanged(state)) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    fn releases(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|effect| **effect == Effect::ReleaseLink)
            .count()
    }

    #[test]
    fn test_link_opened_sends_handshake() {
        let now = Instant::now();
        let mut sm = machine();
        let effects = sm.link_opened(now);

        assert_eq!(
            effects,
            vec![
                Effect::Publish(SessionUpdate::StateChanged(
                    ProvisioningState::AwaitingHandshake
                )),
                Effect::SendHandshake
            ]
        );
        assert_eq!(sm.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_link_open_failure_releases_nothing() {
        let mut sm = machine();
        let effects = sm.link_open_failed("busy".into());
        assert_eq!(releases(&effects), 0);
        assert!(matches!(
            sm.state(),
            ProvisioningState::Failed(FailureReason::ConnectionError(_))
        ));
    }

    #[test]
    fn test_handshake_timeout_ignores_late_response() {
        let now = Instant::now();
        let mut sm = machine();
        sm.link_opened(now);

        assert!(sm.expire(now + Duration::from_secs(4)).is_empty());
        let effects = sm.expire(now + Duration::from_secs(5));
        assert_eq!(releases(&effects), 1);

        let timed_out = ProvisioningState::Failed(FailureReason::Timeout(Phase::Handshake));
        assert_eq!(sm.state(), &timed_out);

        let effects = sm.handle_event(LinkEvent::HandshakeOk {
            serial: "N411A0001".into(),
        });
        assert!(effects.is_empty());
        assert_eq!(sm.state(), &timed_out);
        assert_eq!(sm.snapshot().serial, None);
    }

    #[test]
    fn test_handshake_send_failure_is_connection_error() {
        let mut sm = machine();
        sm.link_opened(Instant::now());
        sm.handle_event(LinkEvent::HandshakeSendFailed);
        assert!(matches!(
            sm.state(),
            ProvisioningState::Failed(FailureReason::ConnectionError(_))
        ));
    }

    #[test]
    fn test_second_protocol_error_in_phase_is_fatal() {
        let mut sm = machine();
        sm.link_opened(Instant::now());

        let effects = sm.handle_event(LinkEvent::Malformed("garbage".into()));
        assert!(matches!(
            effects.as_slice(),
            [Effect::Publish(SessionUpdate::Warning(_))]
        ));
        assert_eq!(sm.state(), &ProvisioningState::AwaitingHandshake);

        sm.handle_event(LinkEvent::CredentialAccepted);
        assert!(matches!(
            sm.state(),
            ProvisioningState::Failed(FailureReason::ProtocolError(_))
        ));
    }

    #[test]
    fn test_protocol_error_budget_resets_per_phase() {
        let now = Instant::now();
        let mut sm = machine();
        sm.link_opened(now);
        sm.handle_event(LinkEvent::Malformed("garbage".into()));
        sm.handle_event(LinkEvent::HandshakeOk {
            serial: "N411A0001".into(),
        });

        sm.handle_event(LinkEvent::Malformed("garbage".into()));
        assert_eq!(sm.state(), &ProvisioningState::Ready);
        assert_eq!(sm.snapshot().warnings.len(), 2);
    }

    #[test]
    fn test_stale_events_are_discarded() {
        let mut sm = ready_machine(Instant::now());
        assert!(
            sm.handle_event(LinkEvent::HandshakeOk {
                serial: "OTHER".into()
            })
            .is_empty()
        );
        assert!(sm.handle_event(LinkEvent::NetworkFound(home_net())).is_empty());
        assert!(sm.handle_event(LinkEvent::NetworkListDone).is_empty());
        assert_eq!(sm.state(), &ProvisioningState::Ready);
        assert_eq!(sm.snapshot().serial.as_deref(), Some("N411A0001"));
        assert!(sm.snapshot().warnings.is_empty());
    }

    #[test]
    fn test_duplicate_networks_are_kept() {
        let now = Instant::now();
        let mut sm = ready_machine(now);

        let effects = sm.request_network_list(now).unwrap();
        assert!(effects.contains(&Effect::SendListNetworks));
        sm.handle_event(LinkEvent::NetworkFound(home_net()));
        sm.handle_event(LinkEvent::NetworkFound(home_net()));
        let effects = sm.handle_event(LinkEvent::NetworkListDone);

        assert!(effects.contains(&Effect::Publish(SessionUpdate::Network(
            NetworkListItem::Done
        ))));
        assert_eq!(sm.state(), &ProvisioningState::Ready);

        let list = sm.snapshot().selectable_networks();
        assert_eq!(
            list,
            vec![
                SelectableNetwork::Network(home_net()),
                SelectableNetwork::Network(home_net()),
                SelectableNetwork::ManualEntry
            ]
        );
    }

    #[test]
    fn test_listing_failures_are_not_fatal() {
        let now = Instant::now();
        let mut sm = ready_machine(now);

        sm.request_network_list(now).unwrap();
        sm.handle_event(LinkEvent::NetworkFound(home_net()));
        sm.handle_event(LinkEvent::LinkError {
            code: 3,
            message: "scan busy".into(),
        });
        assert_eq!(sm.state(), &ProvisioningState::Ready);
        assert_eq!(sm.snapshot().catalog.reported().len(), 1);

        sm.request_network_list(now).unwrap();
        assert!(sm.snapshot().catalog.reported().is_empty());
        let effects = sm.expire(now + Duration::from_secs(15));
        assert_eq!(state_changes(&effects), vec![ProvisioningState::Ready]);
        assert!(effects.iter().any(|effect| matches!(
            effect,
            Effect::Publish(SessionUpdate::Network(NetworkListItem::Failed(_)))
        )));

        sm.request_network_list(now).unwrap();
        assert!(sm.send_failed(Phase::Handshake, "late".into()).is_empty());
        assert_eq!(sm.state(), &ProvisioningState::ListingNetworks);
        sm.send_failed(Phase::NetworkList, "write failed".into());
        assert_eq!(sm.state(), &ProvisioningState::Ready);
        assert_eq!(sm.snapshot().warnings.len(), 3);
    }

    #[test]
    fn test_request_network_list_requires_ready() {
        let mut sm = machine();
        assert!(matches!(
            sm.request_network_list(Instant::now()),
            Err(ServiceError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_credential_rejected_releases_link() {
        let now = Instant::now();
        let mut sm = ready_machine(now);

        let effects = sm
            .submit_credentials(now, &NetworkChoice::Manual("HomeNet".into()), "secret".into())
            .unwrap();
        assert_eq!(
            effects.last(),
            Some(&Effect::SendCredentials(Credentials {
                ssid: b"HomeNet".to_vec(),
                password: "secret".into()
            }))
        );

        assert_eq!(
            sm.handle_event(LinkEvent::CredentialsReceived),
            vec![Effect::Publish(SessionUpdate::Configuring)]
        );
        assert_eq!(sm.state(), &ProvisioningState::AwaitingCredentialResult);

        let effects = sm.handle_event(LinkEvent::CredentialRejected);
        assert_eq!(effects[0], Effect::ReleaseLink);
        assert_eq!(
            sm.state(),
            &ProvisioningState::Failed(FailureReason::CredentialRejected)
        );
    }

    #[test]
    fn test_credential_accepted_succeeds() {
        let now = Instant::now();
        let mut sm = ready_machine(now);
        sm.submit_credentials(now, &NetworkChoice::Manual("HomeNet".into()), "secret".into())
            .unwrap();

        let effects = sm.handle_event(LinkEvent::CredentialAccepted);
        assert_eq!(releases(&effects), 1);
        assert_eq!(sm.state(), &ProvisioningState::Succeeded);
        assert!(sm.cancel().is_empty());
    }

    #[test]
    fn test_link_error_during_push_is_fatal() {
        let now = Instant::now();
        let mut sm = ready_machine(now);
        sm.submit_credentials(now, &NetworkChoice::Manual("HomeNet".into()), "secret".into())
            .unwrap();

        sm.handle_event(LinkEvent::LinkError {
            code: 1003,
            message: "5G network not supported".into(),
        });
        assert_eq!(
            sm.state(),
            &ProvisioningState::Failed(FailureReason::LinkError {
                code: 1003,
                message: "5G network not supported".into()
            })
        );
    }

    #[test]
    fn test_submit_abandons_listing() {
        let now = Instant::now();
        let mut sm = ready_machine(now);
        sm.request_network_list(now).unwrap();
        sm.handle_event(LinkEvent::NetworkFound(home_net()));

        let effects = sm
            .submit_credentials(now, &NetworkChoice::Index(0), "secret".into())
            .unwrap();
        assert_eq!(
            state_changes(&effects),
            vec![
                ProvisioningState::Ready,
                ProvisioningState::AwaitingCredentialResult
            ]
        );
        assert_eq!(sm.snapshot().warnings, vec!["network listing abandoned"]);
        assert_eq!(sm.deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_credentials() {
        let now = Instant::now();
        let mut sm = ready_machine(now);

        let cases = [
            (NetworkChoice::Manual("   ".into()), "secret"),
            (NetworkChoice::Manual("HomeNet".into()), ""),
            (NetworkChoice::Manual("x".repeat(33)), "secret"),
            (NetworkChoice::Index(0), "secret"),
            (NetworkChoice::Index(7), "secret"),
        ];
        for (choice, password) in cases {
            assert!(
                matches!(
                    sm.submit_credentials(now, &choice, password.into()),
                    Err(ServiceError::InvalidCredentials(_))
                ),
                "{:?} should be rejected",
                choice
            );
        }
        assert_eq!(sm.state(), &ProvisioningState::Ready);

        // Open networks take an empty password
        sm.request_network_list(now).unwrap();
        sm.handle_event(LinkEvent::NetworkFound(NetworkEntry::reported(
            b"Cafe".to_vec(),
            false,
        )));
        sm.handle_event(LinkEvent::NetworkListDone);
        assert!(
            sm.submit_credentials(now, &NetworkChoice::Ssid(b"Cafe".to_vec()), String::new())
                .is_ok()
        );
    }

    #[test]
    fn test_cancel_releases_link_once_in_every_state() {
        let now = Instant::now();
        let submit = |sm: &mut ProvisioningMachine| {
            sm.submit_credentials(now, &NetworkChoice::Manual("HomeNet".into()), "pw".into())
                .unwrap();
        };

        let mut machines = vec![(machine(), 0)];
        let mut sm = machine();
        sm.link_opened(now);
        machines.push((sm, 1));
        machines.push((ready_machine(now), 1));
        let mut sm = ready_machine(now);
        sm.request_network_list(now).unwrap();
        machines.push((sm, 1));
        let mut sm = ready_machine(now);
        submit(&mut sm);
        machines.push((sm, 1));

        for (mut sm, expected) in machines {
            let before = sm.state().clone();
            let effects = sm.cancel();
            assert_eq!(releases(&effects), expected, "cancel in {:?}", before);
            assert_eq!(
                sm.state(),
                &ProvisioningState::Failed(FailureReason::Cancelled)
            );
            assert!(sm.cancel().is_empty());
            assert!(sm.link_lost().is_empty());
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn start(backend: &Arc<MockRadioBackend>) -> ProvisioningSession {
        let (events, _) = broadcast::channel(64);
        ProvisioningSession::start(
            backend.clone(),
            ProvisioningHandle::new(),
            DeviceAddress::parse("AA:BB").unwrap(),
            SessionTimeouts::default(),
            events,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_handshake_timeout() {
        let backend = Arc::new(MockRadioBackend::new());
        let session = start(&backend);
        settle().await;
        assert_eq!(backend.handshakes_sent().await, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::Timeout(Phase::Handshake))
        );
        assert_eq!(backend.close_counts().await, vec![1]);

        // Late response has nowhere to go
        assert!(
            !backend
                .emit_link_event(LinkEvent::HandshakeOk {
                    serial: "N411A0001".into()
                })
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_full_flow() {
        let backend = Arc::new(MockRadioBackend::new());
        let session = start(&backend);
        let client = session.client();
        settle().await;

        backend
            .emit_link_event(LinkEvent::HandshakeOk {
                serial: "N411A0001".into(),
            })
            .await;
        settle().await;
        assert_eq!(session.snapshot().serial.as_deref(), Some("N411A0001"));

        let mut items = client.request_network_list().await.unwrap();
        backend
            .emit_link_event(LinkEvent::NetworkFound(home_net()))
            .await;
        backend
            .emit_link_event(LinkEvent::NetworkFound(home_net()))
            .await;
        backend.emit_link_event(LinkEvent::NetworkListDone).await;

        let mut received = Vec::new();
        while let Some(item) = items.recv().await {
            received.push(item);
        }
        assert_eq!(
            received,
            vec![
                NetworkListItem::Found(home_net()),
                NetworkListItem::Found(home_net()),
                NetworkListItem::Done
            ]
        );
        assert_eq!(session.snapshot().selectable_networks().len(), 3);

        let backend_events = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            backend_events
                .emit_link_event(LinkEvent::CredentialsReceived)
                .await;
            backend_events
                .emit_link_event(LinkEvent::CredentialAccepted)
                .await;
        });

        let outcome = client
            .submit_credentials(NetworkChoice::Index(1), "secret".into())
            .await
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Succeeded);
        assert_eq!(backend.pushed_credentials().await[0].ssid, b"HomeNet");
        assert_eq!(backend.close_counts().await, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_open_failure() {
        let backend = Arc::new(MockRadioBackend::new());
        backend
            .set_open_failure(Some(RadioError::DeviceBusy("in use".into())))
            .await;
        let session = start(&backend);
        settle().await;

        assert!(matches!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::ConnectionError(_))
        ));
        assert!(backend.close_counts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_link_drop() {
        let backend = Arc::new(MockRadioBackend::new());
        let session = start(&backend);
        settle().await;

        backend.drop_links().await;
        settle().await;
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::ConnectionError("link lost".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_send_failure() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.set_send_failure(true).await;
        let session = start(&backend);
        settle().await;

        assert!(matches!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::ConnectionError(_))
        ));
        assert_eq!(backend.close_counts().await, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_close_and_drop_release_link() {
        let backend = Arc::new(MockRadioBackend::new());
        let mut session = start(&backend);
        settle().await;

        session.close().await;
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::Cancelled)
        );
        assert_eq!(backend.close_counts().await, vec![1]);

        let client = session.client();
        assert!(matches!(
            client.request_network_list().await,
            Err(ServiceError::InvalidState { .. })
        ));

        let session = start(&backend);
        settle().await;
        drop(session);
        settle().await;
        assert_eq!(backend.close_counts().await, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_connecting() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.hold(MockOperation::OpenLink);
        let mut session = start(&backend);
        settle().await;
        assert_eq!(backend.attempts(MockOperation::OpenLink).await, 1);
        assert_eq!(session.snapshot().state, ProvisioningState::Connecting);

        tokio::time::timeout(Duration::from_secs(1), session.close())
            .await
            .unwrap();
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::Cancelled)
        );

        // The abandoned attempt never yields a link
        backend.release(MockOperation::OpenLink);
        settle().await;
        assert_eq!(backend.open_links().await, 0);
        assert!(backend.close_counts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pending_handshake_send() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.hold(MockOperation::Handshake);
        let mut session = start(&backend);
        settle().await;
        assert_eq!(backend.attempts(MockOperation::Handshake).await, 1);
        assert_eq!(session.snapshot().state, ProvisioningState::AwaitingHandshake);

        tokio::time::timeout(Duration::from_secs(1), session.close())
            .await
            .unwrap();
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::Cancelled)
        );
        assert_eq!(backend.close_counts().await, vec![1]);
        assert_eq!(backend.handshakes_sent().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_pending_handshake_send() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.hold(MockOperation::Handshake);
        let session = start(&backend);
        let client = session.client();
        settle().await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            session.snapshot().state,
            ProvisioningState::Failed(FailureReason::Timeout(Phase::Handshake))
        );
        tokio::time::timeout(Duration::from_secs(1), client.released())
            .await
            .unwrap();
        assert_eq!(backend.close_counts().await, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pending_credential_push() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.hold(MockOperation::Credentials);
        let session = start(&backend);
        let client = session.client();
        settle().await;
        backend
            .emit_link_event(LinkEvent::HandshakeOk {
                serial: "N411A0001".into(),
            })
            .await;
        settle().await;

        client
            .push_credentials(NetworkChoice::Manual("HomeNet".into()), "secret".into())
            .await
            .unwrap();
        assert_eq!(
            client.snapshot().state,
            ProvisioningState::AwaitingCredentialResult
        );

        client.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(1), client.outcome())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Failed(FailureReason::Cancelled));
        client.released().await;
        assert_eq!(backend.close_counts().await, vec![1]);
        assert!(backend.pushed_credentials().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_list_send_failure_after_submit_is_ignored() {
        let backend = Arc::new(MockRadioBackend::new());
        backend.hold(MockOperation::ListNetworks);
        let session = start(&backend);
        let client = session.client();
        settle().await;
        backend
            .emit_link_event(LinkEvent::HandshakeOk {
                serial: "N411A0001".into(),
            })
            .await;
        settle().await;

        let _items = client.request_network_list().await.unwrap();
        client
            .push_credentials(NetworkChoice::Manual("HomeNet".into()), "secret".into())
            .await
            .unwrap();

        settle().await;
        assert_eq!(backend.pushed_credentials().await.len(), 1);

        // The listing request fails only after the push went out
        backend.set_send_failure(true).await;
        backend.release(MockOperation::ListNetworks);
        settle().await;
        assert_eq!(
            client.snapshot().state,
            ProvisioningState::AwaitingCredentialResult
        );
        assert_eq!(backend.list_requests_sent().await, 0);
    }
}

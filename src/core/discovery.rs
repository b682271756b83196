//! Discovery session with deduplication and a time bound

use serde::Serialize;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::RadioBackend,
    core::{
        deadline,
        error::{ServiceError, ServiceResult},
        events::{CoordinatorEvent, DiscoveryEvent, DiscoveryUpdate},
        filter::is_likely_target,
        selectable::UNKNOWN_NAME,
        types::{DeviceAddress, DiscoveredDevice, DiscoveryOutcome, DiscoveryState, SightingName},
    },
};

/// Default discovery bound
pub const DEFAULT_DISCOVERY_BOUND: Duration = Duration::from_secs(12);

/// Point-in-time view of a discovery session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverySnapshot {
    pub state: DiscoveryState,
    pub devices: Vec<DiscoveredDevice>,
    pub outcome: Option<DiscoveryOutcome>,
}

/// Discovery state machine
///
/// Keeps sightings in insertion order, unique by address.
#[derive(Debug)]
struct DiscoveryMachine {
    state: DiscoveryState,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    devices: Vec<DiscoveredDevice>,
    seen: HashSet<DeviceAddress>,
    outcome: Option<DiscoveryOutcome>,
}

impl DiscoveryMachine {
    fn new() -> Self {
        Self {
            state: DiscoveryState::Idle,
            started_at: None,
            deadline: None,
            devices: Vec::new(),
            seen: HashSet::new(),
            outcome: None,
        }
    }

    /// Start scanning, forgetting sightings of a previous run
    fn start(&mut self, now: Instant, bound: Option<Duration>) -> ServiceResult<()> {
        if self.state == DiscoveryState::Scanning {
            return Err(ServiceError::AlreadyRunning);
        }

        self.state = DiscoveryState::Scanning;
        self.started_at = Some(now);
        self.deadline = bound.map(|bound| now + bound);
        self.devices.clear();
        self.seen.clear();
        self.outcome = None;
        Ok(())
    }

    /// Record a sighting, returning the device if it is new
    fn on_sighting(&mut self, address: &str, name: &SightingName) -> Option<DiscoveredDevice> {
        if self.state != DiscoveryState::Scanning {
            return None;
        }
        let address = DeviceAddress::parse(address)?;
        if self.seen.contains(&address) {
            return None;
        }

        let (display_name, is_likely_target) = match name {
            SightingName::Known(name) => {
                let name = name.trim();
                (name.to_string(), is_likely_target(Some(name)))
            }
            SightingName::Absent => (String::new(), false),
            SightingName::Denied => (UNKNOWN_NAME.to_string(), false),
        };

        let device = DiscoveredDevice {
            address: address.clone(),
            display_name,
            is_likely_target,
        };
        self.seen.insert(address);
        self.devices.push(device.clone());
        Some(device)
    }

    /// Move to Finished, returning false if already finished
    fn finish(&mut self, outcome: DiscoveryOutcome) -> bool {
        if self.state != DiscoveryState::Scanning {
            return false;
        }
        self.state = DiscoveryState::Finished;
        self.deadline = None;
        self.outcome = Some(outcome);
        true
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    fn snapshot(&self) -> DiscoverySnapshot {
        DiscoverySnapshot {
            state: self.state,
            devices: self.devices.clone(),
            outcome: self.outcome,
        }
    }
}

/// Running discovery session
///
/// Owns the discovery capability of the radio until it finishes. Dropping the
/// session stops discovery in the background.
pub struct DiscoverySession {
    stop_tx: Option<oneshot::Sender<()>>,
    snapshot: watch::Receiver<DiscoverySnapshot>,
    task: Option<JoinHandle<()>>,
}

impl DiscoverySession {
    /// Open the discovery capability and start collecting sightings
    ///
    /// Every new device and the final outcome are sent to `updates` and
    /// published on `events`.
    pub async fn start<B: RadioBackend>(
        backend: Arc<B>,
        bound: Option<Duration>,
        updates: mpsc::UnboundedSender<DiscoveryUpdate>,
        events: broadcast::Sender<CoordinatorEvent>,
    ) -> ServiceResult<Self> {
        let mut machine = DiscoveryMachine::new();
        machine.start(Instant::now(), bound)?;

        let (sink, radio_events) = mpsc::unbounded_channel();
        backend.start_discovery(sink).await?;
        info!("Discovery started (bound: {:?})", bound);

        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            backend,
            machine,
            radio_events,
            stop_rx,
            Publisher {
                updates,
                events,
                snapshot: snapshot_tx,
            },
        ));

        Ok(Self {
            stop_tx: Some(stop_tx),
            snapshot,
            task: Some(task),
        })
    }

    /// Stop discovery and wait until the radio is released
    ///
    /// Stopping a finished session is a no-op.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Discovery task failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.snapshot.borrow().state == DiscoveryState::Scanning
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        self.snapshot.borrow().clone()
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

struct Publisher {
    updates: mpsc::UnboundedSender<DiscoveryUpdate>,
    events: broadcast::Sender<CoordinatorEvent>,
    snapshot: watch::Sender<DiscoverySnapshot>,
}

impl Publisher {
    fn publish(&self, machine: &DiscoveryMachine, update: DiscoveryUpdate) {
        self.snapshot.send_replace(machine.snapshot());
        // Receivers may have gone away; discovery continues regardless
        let _ = self.events.send(CoordinatorEvent::Discovery(update.clone()));
        let _ = self.updates.send(update);
    }
}

async fn run<B: RadioBackend>(
    backend: Arc<B>,
    mut machine: DiscoveryMachine,
    mut radio_events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    publisher: Publisher,
) {
    let outcome = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break DiscoveryOutcome::Stopped,
            _ = deadline::expired(machine.deadline()) => break DiscoveryOutcome::TimedOut,
            event = radio_events.recv() => match event {
                Some(DiscoveryEvent::Sighting { address, name }) => {
                    if let Some(device) = machine.on_sighting(&address, &name) {
                        debug!(
                            "Discovered {} ({:?}, likely target: {})",
                            device.address, device.display_name, device.is_likely_target
                        );
                        publisher.publish(&machine, DiscoveryUpdate::Found { device });
                    }
                }
                Some(DiscoveryEvent::Finished) | None => break DiscoveryOutcome::Completed,
            },
        }
    };

    // Late sightings are dropped with the channel
    radio_events.close();
    if let Err(e) = backend.stop_discovery().await {
        warn!("Failed to stop discovery: {}", e);
    }

    if machine.finish(outcome) {
        let found_any = !machine.devices().is_empty();
        info!(
            "Discovery finished: {:?}, {} device(s)",
            outcome,
            machine.devices().len()
        );
        publisher.publish(&machine, DiscoveryUpdate::Finished { outcome, found_any });
    }
}

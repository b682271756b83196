//! BlueZ radio backend

use bluer::{
    Adapter, AdapterEvent, Address, Device, ErrorKind, gatt::remote::Characteristic,
};
use futures::{Stream, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    sync::{Mutex, mpsc::UnboundedSender, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    backend::{
        RadioBackend,
        codec::{FrameCodec, JsonFrameCodec, LinkRequest},
        uuids::GattLayout,
    },
    core::{
        error::{RadioError, RadioResult},
        events::{DiscoveryEvent, LinkEvent},
        types::{Credentials, DeviceAddress, LinkId, SightingName},
    },
};

/// Control channel to one printer
struct OpenLink {
    device: Device,
    command: Characteristic,
    listener: JoinHandle<()>,
}

/// Radio backend talking to bluetoothd over D-Bus
pub struct BluezBackend<C: FrameCodec = JsonFrameCodec> {
    adapter: Adapter,
    layout: GattLayout,
    codec: Arc<C>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<HashMap<LinkId, OpenLink>>,
    next_link: AtomicU64,
}

impl<C: FrameCodec> BluezBackend<C> {
    /// Connect to bluetoothd and power on the adapter
    pub async fn new(adapter_name: Option<&str>, layout: GattLayout, codec: C) -> RadioResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| RadioError::AdapterUnavailable(e.to_string()))?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| RadioError::AdapterUnavailable(e.to_string()))?;

        adapter
            .set_powered(true)
            .await
            .map_err(|e| RadioError::AdapterUnavailable(e.to_string()))?;

        info!("Using BLE adapter: {}", adapter.name());

        Ok(Self {
            adapter,
            layout,
            codec: Arc::new(codec),
            discovery: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            next_link: AtomicU64::new(1),
        })
    }

    async fn resolve_name(adapter: &Adapter, address: Address) -> SightingName {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(e) => {
                debug!("Cannot resolve device {}: {}", address, e);
                return SightingName::Denied;
            }
        };

        match device.name().await {
            Ok(name) => SightingName::from(name),
            Err(e) if matches!(e.kind, ErrorKind::NotAuthorized | ErrorKind::NotPermitted) => {
                SightingName::Denied
            }
            Err(e) => {
                debug!("No name for device {}: {}", address, e);
                SightingName::Absent
            }
        }
    }

    /// Find the command and event characteristics of the provisioning service
    async fn control_characteristics(
        &self,
        device: &Device,
    ) -> bluer::Result<Option<(Characteristic, Characteristic)>> {
        for service in device.services().await? {
            if service.uuid().await? != self.layout.service {
                continue;
            }

            let mut command = None;
            let mut events = None;
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                if uuid == self.layout.command {
                    command = Some(characteristic);
                } else if uuid == self.layout.events {
                    events = Some(characteristic);
                }
            }
            return Ok(command.zip(events));
        }

        Ok(None)
    }

    async fn send_frame(&self, link: LinkId, request: LinkRequest<'_>) -> RadioResult<()> {
        let command = self
            .links
            .lock()
            .await
            .get(&link)
            .map(|open| open.command.clone())
            .ok_or(RadioError::UnknownLink(link))?;

        let frame = self.codec.encode(request);
        debug!("Writing {} byte frame to {}", frame.len(), link);
        command
            .write(&frame)
            .await
            .map_err(|e| RadioError::SendFailed(e.to_string()))
    }
}

/// Decode notifications of a subscribed event characteristic into `sink`
///
/// Ends when the stream ends or the session stops listening, dropping `sink`.
fn forward_events<C: FrameCodec>(
    link: LinkId,
    frames: impl Stream<Item = Vec<u8>> + Send + 'static,
    codec: Arc<C>,
    sink: UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frames = Box::pin(frames);
        while let Some(frame) = frames.next().await {
            let event = codec.decode(&frame);
            debug!("{} received {}", link, event.name());
            if sink.send(event).is_err() {
                return;
            }
        }
        debug!("Notification stream of {} ended", link);
    })
}

fn connect_error(address: &DeviceAddress, e: bluer::Error) -> RadioError {
    match e.kind {
        ErrorKind::InProgress | ErrorKind::AlreadyConnected => {
            RadioError::DeviceBusy(format!("{}: {}", address, e))
        }
        ErrorKind::DoesNotExist | ErrorKind::NotFound => {
            RadioError::DeviceNotFound(format!("{}: {}", address, e))
        }
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            RadioError::PermissionDenied(format!("{}: {}", address, e))
        }
        _ => RadioError::ConnectionFailed(format!("{}: {}", address, e)),
    }
}

impl<C: FrameCodec> RadioBackend for BluezBackend<C> {
    async fn start_discovery(&self, sink: UnboundedSender<DiscoveryEvent>) -> RadioResult<()> {
        let mut discovery = self.discovery.lock().await;
        if discovery.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(RadioError::DeviceBusy("discovery already running".into()));
        }

        let adapter = self.adapter.clone();
        let (started_tx, started_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(events) => {
                    let _ = started_tx.send(Ok(()));
                    events
                }
                Err(e) => {
                    let _ = started_tx.send(Err(RadioError::DiscoveryFailed(e.to_string())));
                    return;
                }
            };
            let mut events = Box::pin(events);

            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    let name = Self::resolve_name(&adapter, address).await;
                    let sighting = DiscoveryEvent::Sighting {
                        address: address.to_string(),
                        name,
                    };
                    if sink.send(sighting).is_err() {
                        return;
                    }
                }
            }

            debug!("Discovery event stream ended");
            let _ = sink.send(DiscoveryEvent::Finished);
        });

        match started_rx.await {
            Ok(Ok(())) => {
                info!("BLE discovery started");
                *discovery = Some(task);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RadioError::DiscoveryFailed("discovery task ended".into())),
        }
    }

    async fn stop_discovery(&self) -> RadioResult<()> {
        if let Some(task) = self.discovery.lock().await.take() {
            // Dropping the event stream ends the BlueZ discovery session
            task.abort();
            let _ = task.await;
            info!("BLE discovery stopped");
        }
        Ok(())
    }

    async fn open_link(
        &self,
        address: &DeviceAddress,
        sink: UnboundedSender<LinkEvent>,
    ) -> RadioResult<LinkId> {
        let bt_address: Address = address
            .as_str()
            .parse()
            .map_err(|_| RadioError::DeviceNotFound(format!("invalid address {}", address)))?;
        let device = self
            .adapter
            .device(bt_address)
            .map_err(|e| connect_error(address, e))?;

        if !device.is_connected().await.unwrap_or(false) {
            info!("Connecting to {}", address);
            device.connect().await.map_err(|e| connect_error(address, e))?;
        }

        let (command, events) = match self.control_characteristics(&device).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                let _ = device.disconnect().await;
                return Err(RadioError::ServiceNotFound(address.to_string()));
            }
            Err(e) => {
                let _ = device.disconnect().await;
                return Err(connect_error(address, e));
            }
        };

        // Subscribe before the caller can send anything the device answers
        let frames = match events.notify().await {
            Ok(frames) => frames,
            Err(e) => {
                let _ = device.disconnect().await;
                return Err(connect_error(address, e));
            }
        };

        let link = LinkId(self.next_link.fetch_add(1, Ordering::Relaxed));
        let listener = forward_events(link, frames, self.codec.clone(), sink);

        self.links.lock().await.insert(
            link,
            OpenLink {
                device,
                command,
                listener,
            },
        );
        info!("Opened {} to {}", link, address);
        Ok(link)
    }

    async fn close_link(&self, link: LinkId) -> RadioResult<()> {
        let open = self
            .links
            .lock()
            .await
            .remove(&link)
            .ok_or(RadioError::UnknownLink(link))?;

        open.listener.abort();
        open.device
            .disconnect()
            .await
            .map_err(|e| RadioError::ConnectionFailed(e.to_string()))?;
        info!("Closed {}", link);
        Ok(())
    }

    async fn send_handshake(&self, link: LinkId) -> RadioResult<()> {
        self.send_frame(link, LinkRequest::Handshake).await
    }

    async fn send_list_networks(&self, link: LinkId) -> RadioResult<()> {
        self.send_frame(link, LinkRequest::ListNetworks).await
    }

    async fn send_credentials(&self, link: LinkId, credentials: &Credentials) -> RadioResult<()> {
        self.send_frame(link, LinkRequest::SetWifi(credentials)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_forwards_frames_queued_before_listening() {
        let (sink, mut events) = mpsc::unbounded_channel();
        let frames = futures::stream::iter(vec![
            br#"{"type":"handshake_ok","serial":"N411A0001"}"#.to_vec(),
            b"not json".to_vec(),
        ]);

        forward_events(LinkId(1), frames, Arc::new(JsonFrameCodec), sink)
            .await
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::HandshakeOk {
                serial: "N411A0001".into()
            })
        );
        assert!(matches!(events.recv().await, Some(LinkEvent::Malformed(_))));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_forwarding_stops_when_session_stops_listening() {
        let (sink, events) = mpsc::unbounded_channel();
        drop(events);
        let frames = futures::stream::iter(vec![b"{}".to_vec()]).chain(futures::stream::pending());

        let listener = forward_events(LinkId(2), frames, Arc::new(JsonFrameCodec), sink);
        tokio::time::timeout(std::time::Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}

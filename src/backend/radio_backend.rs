//! Radio backend trait definition

use tokio::sync::mpsc::UnboundedSender;
use trait_variant::make;

use crate::core::{
    error::RadioResult,
    events::{DiscoveryEvent, LinkEvent},
    types::{Credentials, DeviceAddress, LinkId},
};

/// Abstraction over the short-range radio stack (typically BlueZ)
///
/// Operations return once the request has been handed to the radio. Their
/// results arrive asynchronously on the sinks passed to
/// [`start_discovery`](RadioBackend::start_discovery) and
/// [`open_link`](RadioBackend::open_link). A backend drops a link sink when
/// the link goes away, which its receiver observes as a closed channel.
#[make(Send)]
pub trait RadioBackend: Sync + 'static {
    /// Start device discovery, delivering sightings to `sink`
    async fn start_discovery(&self, sink: UnboundedSender<DiscoveryEvent>) -> RadioResult<()>;

    /// Stop device discovery and release the adapter
    ///
    /// Stopping when discovery is not running is not an error.
    async fn stop_discovery(&self) -> RadioResult<()>;

    /// Open the control channel to a device
    async fn open_link(
        &self,
        address: &DeviceAddress,
        sink: UnboundedSender<LinkEvent>,
    ) -> RadioResult<LinkId>;

    /// Close the control channel
    async fn close_link(&self, link: LinkId) -> RadioResult<()>;

    /// Ask the device for its identity
    async fn send_handshake(&self, link: LinkId) -> RadioResult<()>;

    /// Ask the device to enumerate the Wi-Fi networks it sees
    async fn send_list_networks(&self, link: LinkId) -> RadioResult<()>;

    /// Push Wi-Fi credentials to the device
    async fn send_credentials(&self, link: LinkId, credentials: &Credentials) -> RadioResult<()>;
}

//! Host-side Wi-Fi scan trait definition

use trait_variant::make;

use crate::core::{error::WifiResult, types::LocalNetwork};

/// Wi-Fi scan of the host running the service (typically wpa_supplicant)
///
/// Only used to suggest network names when the printer cannot enumerate
/// them itself.
#[make(Send)]
pub trait LocalScanner: Sync + 'static {
    /// Scan for networks visible to the host
    ///
    /// The scan operation may take several seconds.
    async fn scan(&self) -> WifiResult<Vec<LocalNetwork>>;
}

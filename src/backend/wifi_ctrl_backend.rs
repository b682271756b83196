//! wifi-ctrl backed local scanner

use tracing::{debug, error};
use wifi_ctrl::sta::{RequestClient, WifiSetup};

use crate::{
    backend::LocalScanner,
    core::{
        error::{WifiError, WifiResult},
        types::LocalNetwork,
    },
};

pub struct WifiCtrlScanner {
    interface: String,
    client: RequestClient,
}

impl WifiCtrlScanner {
    pub fn new(interface: String) -> WifiResult<Self> {
        let path = format!("/var/run/wpa_supplicant/{}", interface);
        let mut setup =
            WifiSetup::new().map_err(|e| WifiError::WpaSupplicantError(e.to_string()))?;
        setup.set_socket_path(path);

        let client = setup.get_request_client();
        let station = setup.complete();

        tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });

        Ok(Self { interface, client })
    }

    /// Convert a frequency in MHz to its channel number, 0 when unknown
    fn frequency_to_channel(freq_str: &str) -> u16 {
        match freq_str.trim().parse::<u16>().unwrap_or(0) {
            2484 => 14,
            freq @ 2412..=2472 if (freq - 2407) % 5 == 0 => (freq - 2407) / 5,
            freq @ 5160..=5885 if freq % 5 == 0 => (freq - 5000) / 5,
            _ => 0,
        }
    }
}

impl LocalScanner for WifiCtrlScanner {
    async fn scan(&self) -> WifiResult<Vec<LocalNetwork>> {
        debug!("Starting local WiFi scan on interface: {}", self.interface);

        let results = self
            .client
            .get_scan()
            .await
            .map_err(|e| WifiError::ScanFailed(e.to_string()))?;

        let networks: Vec<LocalNetwork> = results
            .iter()
            .map(|res| LocalNetwork {
                ssid: res.name.clone(),
                mac: res.mac.clone(),
                channel: Self::frequency_to_channel(&res.frequency),
                rssi: res.signal as i16,
            })
            .collect();

        debug!("Local scan complete, found {} networks", networks.len());
        Ok(networks)
    }
}

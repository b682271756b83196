//! Display capability shared by every list the presentation layer renders

use crate::core::{
    catalog::SelectableNetwork,
    types::{DiscoveredDevice, NetworkOrigin},
};

/// Label shown for devices and networks without a usable name
pub const UNKNOWN_NAME: &str = "Unknown device";

/// Label of the manual network slot
pub const MANUAL_ENTRY_LABEL: &str = "Enter network manually";

/// Something the caller can pick from a list
pub trait SelectableItem {
    /// Primary line of the list row
    fn title(&self) -> String;

    /// Secondary line of the list row
    fn subtitle(&self) -> Option<String>;

    /// Whether the row should be emphasized
    fn is_highlighted(&self) -> bool {
        false
    }
}

impl SelectableItem for DiscoveredDevice {
    fn title(&self) -> String {
        if self.display_name.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            self.display_name.clone()
        }
    }

    fn subtitle(&self) -> Option<String> {
        Some(self.address.to_string())
    }

    fn is_highlighted(&self) -> bool {
        self.is_likely_target
    }
}

impl SelectableItem for SelectableNetwork {
    fn title(&self) -> String {
        match self {
            SelectableNetwork::Network(entry) => entry.display_name.clone(),
            SelectableNetwork::ManualEntry => MANUAL_ENTRY_LABEL.to_string(),
        }
    }

    fn subtitle(&self) -> Option<String> {
        match self {
            SelectableNetwork::Network(entry) => match entry.origin {
                NetworkOrigin::DeviceReported => None,
                NetworkOrigin::LocalScan => Some("seen by this host".to_string()),
                NetworkOrigin::Manual => Some("entered manually".to_string()),
            },
            SelectableNetwork::ManualEntry => None,
        }
    }

    fn is_highlighted(&self) -> bool {
        matches!(
            self,
            SelectableNetwork::Network(entry) if entry.origin == NetworkOrigin::DeviceReported
        )
    }
}

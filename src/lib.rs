//! Printer Wi-Fi provisioner
//!
//! Discovers printers over Bluetooth LE and pushes Wi-Fi credentials to them
//! through a vendor control channel. Clients drive the service over a Unix
//! domain socket speaking JSON-RPC 2.0.

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    coordinator::{CoordinatorConfig, SessionCoordinator},
    error::{FailureReason, RadioError, ServiceError, TransportError, WifiError},
    types::{
        DeviceAddress, DiscoveredDevice, NetworkChoice, NetworkEntry, ProvisioningHandle,
        ProvisioningOutcome, ProvisioningState,
    },
};

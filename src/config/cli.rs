//! Command-line argument parsing

use clap::Parser;
use uuid::Uuid;

use crate::backend::uuids::{COMMAND_CHAR_UUID, EVENT_CHAR_UUID, PROVISIONING_SERVICE_UUID};

#[derive(Parser, Debug, Clone)]
#[clap(name = "printer-provisioner", version, author)]
#[clap(about = "Provision Wi-Fi credentials onto printers over Bluetooth LE")]
pub struct CliArgs {
    /// Bluetooth adapter name (system default when omitted)
    #[clap(short, long)]
    pub adapter: Option<String>,

    /// Wireless interface used to suggest networks from a local scan
    #[clap(short = 'i', long)]
    pub wifi_interface: Option<String>,

    /// Discovery bound in seconds
    #[clap(long, default_value = "12")]
    pub discovery_timeout_secs: u64,

    /// Time the printer has to answer the handshake, in milliseconds
    #[clap(long, default_value = "5000")]
    pub handshake_timeout_ms: u64,

    /// Time the printer has to finish listing networks, in seconds
    #[clap(long, default_value = "15")]
    pub list_timeout_secs: u64,

    /// Time the printer has to accept or reject credentials, in seconds
    #[clap(long, default_value = "60")]
    pub credential_timeout_secs: u64,

    /// Path for Unix socket
    #[clap(long, default_value = "/run/printer-provisioner.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660")]
    pub socket_mode: String,

    /// Provisioning service of the printer
    #[clap(long, default_value_t = PROVISIONING_SERVICE_UUID)]
    pub service_uuid: Uuid,

    /// Characteristic receiving request frames
    #[clap(long, default_value_t = COMMAND_CHAR_UUID)]
    pub command_char_uuid: Uuid,

    /// Characteristic notifying event frames
    #[clap(long, default_value_t = EVENT_CHAR_UUID)]
    pub event_char_uuid: Uuid,
}

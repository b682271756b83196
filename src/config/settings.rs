//! Runtime settings

use std::time::Duration;

use crate::{
    backend::uuids::GattLayout,
    config::CliArgs,
    core::{coordinator::CoordinatorConfig, provisioning::SessionTimeouts},
};

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub adapter: Option<String>,
    pub wifi_interface: Option<String>,
    pub coordinator: CoordinatorConfig,
    pub gatt: GattLayout,
    pub socket_path: String,
    pub socket_mode: u32,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        // Parse octal socket mode
        let socket_mode = u32::from_str_radix(&args.socket_mode, 8).unwrap_or(0o660);

        Settings {
            adapter: args.adapter,
            wifi_interface: args.wifi_interface,
            coordinator: CoordinatorConfig {
                discovery_bound: Duration::from_secs(args.discovery_timeout_secs),
                session: SessionTimeouts {
                    handshake: Duration::from_millis(args.handshake_timeout_ms),
                    network_list: Duration::from_secs(args.list_timeout_secs),
                    credentials: Duration::from_secs(args.credential_timeout_secs),
                },
            },
            gatt: GattLayout {
                service: args.service_uuid,
                command: args.command_char_uuid,
                events: args.event_char_uuid,
            },
            socket_path: args.socket_path,
            socket_mode,
        }
    }
}

//! GATT layout of the printer control channel

use uuid::Uuid;

/// Provisioning service advertised by the printer
pub const PROVISIONING_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ff00_0000_1000_8000_0080_5f9b_34fb);

/// Command characteristic (write request frames)
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_ff01_0000_1000_8000_0080_5f9b_34fb);

/// Event characteristic (notify response frames)
pub const EVENT_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_ff02_0000_1000_8000_0080_5f9b_34fb);

/// Service and characteristics used for provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattLayout {
    pub service: Uuid,
    pub command: Uuid,
    pub events: Uuid,
}

impl Default for GattLayout {
    fn default() -> Self {
        Self {
            service: PROVISIONING_SERVICE_UUID,
            command: COMMAND_CHAR_UUID,
            events: EVENT_CHAR_UUID,
        }
    }
}

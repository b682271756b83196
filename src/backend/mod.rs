//! Radio and local Wi-Fi backend abstraction layer

pub mod bluez_backend;
pub mod codec;
pub mod local_scanner;
pub mod mock_backend;
pub mod mock_scanner;
pub mod radio_backend;
pub mod uuids;
pub mod wifi_ctrl_backend;

pub use bluez_backend::BluezBackend;
pub use local_scanner::LocalScanner;
pub use radio_backend::RadioBackend;
pub use wifi_ctrl_backend::WifiCtrlScanner;

#[cfg(test)]
pub use mock_backend::{MockOperation, MockRadioBackend};
#[cfg(test)]
pub use mock_scanner::MockLocalScanner;

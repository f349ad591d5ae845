//! Link backends
//!
//! - BLE: GATT client over BlueZ, notify in / write out
//! - Serial: USB CDC or UART port, polled reads

pub mod ble;
pub mod endpoint;
pub mod serial;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use ble::{BleConfig, BleTransport};
pub use endpoint::{Capabilities, CharacteristicPair, EndpointResolver};
pub use serial::{SerialConfig, SerialTransport};
pub use traits::{Inbound, Transport};

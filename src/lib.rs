//! Link manager for LSMD measurement devices
//!
//! Connects to a device over BLE (GATT notify/write) or a serial port,
//! turns its newline-delimited output into [`LinkEvent::DataReceived`]
//! events, and keeps the link alive with a bounded reconnect policy.

pub mod connection;
pub mod error;
pub mod transport;

pub use connection::{
    BoundedRetry, ConnectionManager, EventReceiver, LinkConfig, LinkEvent, ReconnectPolicy,
    ReconnectSettings,
};
pub use error::{LinkError, Result};
pub use transport::{BleConfig, BleTransport, SerialConfig, SerialTransport, Transport};

pub use lsmd_shared::{
    Command, ConnectionState, ConnectionTarget, DeviceMessage, DiscoveredDevice, TransportKind,
};

//! LSMD Shared Link Types
//!
//! This crate provides the transport-agnostic types shared between the link
//! manager and its consumers: connection targets, discovered devices, the
//! newline codec and the connection state machine.

pub mod codec;
pub mod protocol;
pub mod state_machine;

use std::fmt;

pub use codec::FrameAssembler;
pub use protocol::{Command, DeviceMessage};
pub use state_machine::{ConnectionState, ConnectionStateMachine, LinkTrigger, TransitionResult};

/// Link defaults for the system
pub mod defaults {
    /// Default scan duration in milliseconds
    pub const SCAN_TIMEOUT_MS: u64 = 10_000;

    /// Bounded wait for operations marshalled onto the worker (send, disconnect)
    pub const OPERATION_TIMEOUT_MS: u64 = 10_000;

    /// Default number of reconnect attempts after an unplanned link loss
    pub const RECONNECT_ATTEMPTS: u32 = 2;

    /// Default delay between reconnect attempts in milliseconds
    pub const RECONNECT_DELAY_MS: u64 = 1_000;

    /// BLE connection establishment timeout in milliseconds
    pub const BLE_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// How long to wait for the GATT database to be resolved after connecting
    pub const BLE_SERVICES_TIMEOUT_MS: u64 = 5_000;

    /// Fixed serial read timeout in milliseconds
    pub const SERIAL_READ_TIMEOUT_MS: u64 = 1_000;

    /// Sleep between serial polls when no bytes are pending
    pub const SERIAL_POLL_INTERVAL_MS: u64 = 10;

    /// Default baud rate, must match the device firmware
    pub const BAUD_RATE: u32 = 230_400;

    /// Baud rates offered to the operator
    pub const SUPPORTED_BAUD_RATES: [u32; 7] = [9600, 19200, 38400, 57600, 115200, 230400, 460800];
}

/// The physical link used for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Ble,
    Serial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::Serial => write!(f, "Serial"),
        }
    }
}

/// Where to connect, supplied at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// BLE device address (e.g. "AA:BB:CC:DD:EE:FF")
    Ble { address: String },
    /// Serial port (e.g. "/dev/ttyACM0" or "COM3") and baud rate
    Serial { port: String, baud_rate: u32 },
}

impl ConnectionTarget {
    /// Create a BLE target
    pub fn ble(address: impl Into<String>) -> Self {
        Self::Ble {
            address: address.into(),
        }
    }

    /// Create a serial target with an explicit baud rate
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self::Serial {
            port: port.into(),
            baud_rate,
        }
    }

    /// The transport this target requires
    pub fn kind(&self) -> TransportKind {
        match self {
            ConnectionTarget::Ble { .. } => TransportKind::Ble,
            ConnectionTarget::Serial { .. } => TransportKind::Serial,
        }
    }

    /// Address or port name, without the baud rate
    pub fn endpoint(&self) -> &str {
        match self {
            ConnectionTarget::Ble { address } => address,
            ConnectionTarget::Serial { port, .. } => port,
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Ble { address } => write!(f, "{}", address),
            ConnectionTarget::Serial { port, baud_rate } => write!(f, "{}@{}", port, baud_rate),
        }
    }
}

/// A device or port found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised name or port description ("Unknown" when absent)
    pub display_name: String,
    /// BLE address or serial port name
    pub address_or_port: String,
}

impl DiscoveredDevice {
    pub fn new(display_name: Option<String>, address_or_port: impl Into<String>) -> Self {
        Self {
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Unknown".into()),
            address_or_port: address_or_port.into(),
        }
    }
}

/// Whether the baud rate is one of the offered candidates
pub fn is_supported_baud_rate(baud_rate: u32) -> bool {
    defaults::SUPPORTED_BAUD_RATES.contains(&baud_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind() {
        assert_eq!(ConnectionTarget::ble("AA:BB").kind(), TransportKind::Ble);
        assert_eq!(
            ConnectionTarget::serial("/dev/ttyACM0", 115200).kind(),
            TransportKind::Serial
        );
    }

    #[test]
    fn test_target_display() {
        let target = ConnectionTarget::serial("COM3", 230400);
        assert_eq!(target.to_string(), "COM3@230400");
        assert_eq!(target.endpoint(), "COM3");
    }

    #[test]
    fn test_discovered_device_unknown_name() {
        let device = DiscoveredDevice::new(None, "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.display_name, "Unknown");

        let device = DiscoveredDevice::new(Some("  ".into()), "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.display_name, "Unknown");

        let device = DiscoveredDevice::new(Some("LSMD-01".into()), "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.display_name, "LSMD-01");
    }

    #[test]
    fn test_supported_baud_rates() {
        assert!(is_supported_baud_rate(defaults::BAUD_RATE));
        assert!(is_supported_baud_rate(9600));
        assert!(!is_supported_baud_rate(12345));
    }
}

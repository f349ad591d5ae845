//! Endpoint discovery
//!
//! BLE: once the radio link is open, the GATT database is walked once in
//! enumeration order. The first characteristic advertising `notify` becomes
//! the inbound endpoint, the first advertising `write` or
//! `write-without-response` becomes the outbound endpoint. Both may be the
//! same characteristic. Serial has nothing to discover; the port and baud
//! rate are validated instead.

use crate::error::{LinkError, Result};
use bluer::gatt::CharacteristicFlags;
use bluer::{Address, Uuid};
use lsmd_shared::{is_supported_baud_rate, ConnectionTarget};
use tracing::warn;

/// Capability set advertised by a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub notify: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl Capabilities {
    /// Accepts either write flavour
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

impl From<CharacteristicFlags> for Capabilities {
    fn from(flags: CharacteristicFlags) -> Self {
        Self {
            notify: flags.notify,
            write: flags.write,
            write_without_response: flags.write_without_response,
        }
    }
}

/// Resolved characteristic identifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicPair {
    /// Device -> host
    pub notify_id: Option<Uuid>,
    /// Host -> device
    pub write_id: Option<Uuid>,
}

impl CharacteristicPair {
    pub fn clear(&mut self) {
        self.notify_id = None;
        self.write_id = None;
    }
}

/// First-match resolver for the notify/write endpoints
///
/// `I` identifies a characteristic, `C` is whatever handle the caller needs
/// to keep (a remote characteristic proxy in production, a plain value in
/// tests). Preferred ids, when set, replace the capability check for that
/// endpoint.
#[derive(Debug)]
pub struct EndpointResolver<I, C> {
    preferred_notify: Option<I>,
    preferred_write: Option<I>,
    notify: Option<(I, C)>,
    write: Option<(I, C)>,
}

impl<I, C> Default for EndpointResolver<I, C> {
    fn default() -> Self {
        Self {
            preferred_notify: None,
            preferred_write: None,
            notify: None,
            write: None,
        }
    }
}

impl<I: Copy + PartialEq, C: Clone> EndpointResolver<I, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind these ids instead of the first capable characteristic
    pub fn with_preferred(preferred_notify: Option<I>, preferred_write: Option<I>) -> Self {
        Self {
            preferred_notify,
            preferred_write,
            ..Self::default()
        }
    }

    /// Offer the next enumerated characteristic
    ///
    /// Returns `true` once both endpoints are bound; the caller stops
    /// enumerating at that point.
    pub fn offer(&mut self, id: I, candidate: &C, caps: Capabilities) -> bool {
        if self.notify.is_none() {
            let wanted = match self.preferred_notify {
                Some(preferred) => preferred == id,
                None => caps.notify,
            };
            if wanted {
                self.notify = Some((id, candidate.clone()));
            }
        }

        if self.write.is_none() {
            let wanted = match self.preferred_write {
                Some(preferred) => preferred == id,
                None => caps.is_writable(),
            };
            if wanted {
                self.write = Some((id, candidate.clone()));
            }
        }

        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.notify.is_some() && self.write.is_some()
    }

    /// Consume the resolver, yielding `(notify, write)`
    pub fn finish(self) -> (Option<(I, C)>, Option<(I, C)>) {
        (self.notify, self.write)
    }
}

/// Validate a serial target, returning the port and baud rate
pub fn validate_serial(target: &ConnectionTarget) -> Result<(&str, u32)> {
    match target {
        ConnectionTarget::Serial { port, baud_rate } => {
            if port.trim().is_empty() {
                return Err(LinkError::invalid_target("serial port name is empty"));
            }
            if *baud_rate == 0 {
                return Err(LinkError::invalid_target("baud rate must be positive"));
            }
            if !is_supported_baud_rate(*baud_rate) {
                warn!("[SERIAL] Baud rate {} is not a standard choice", baud_rate);
            }
            Ok((port.as_str(), *baud_rate))
        }
        ConnectionTarget::Ble { .. } => Err(LinkError::invalid_target(
            "serial transport cannot connect to a BLE target",
        )),
    }
}

/// Parse the device address of a BLE target
pub fn parse_ble_address(target: &ConnectionTarget) -> Result<Address> {
    match target {
        ConnectionTarget::Ble { address } => address
            .trim()
            .parse::<Address>()
            .map_err(|_| LinkError::invalid_target(format!("malformed BLE address '{}'", address))),
        ConnectionTarget::Serial { .. } => Err(LinkError::invalid_target(
            "BLE transport cannot connect to a serial target",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFY: Capabilities = Capabilities {
        notify: true,
        write: false,
        write_without_response: false,
    };
    const WRITE: Capabilities = Capabilities {
        notify: false,
        write: true,
        write_without_response: false,
    };
    const WRITE_NO_RSP: Capabilities = Capabilities {
        notify: false,
        write: false,
        write_without_response: true,
    };
    const BOTH: Capabilities = Capabilities {
        notify: true,
        write: true,
        write_without_response: false,
    };
    const NONE: Capabilities = Capabilities {
        notify: false,
        write: false,
        write_without_response: false,
    };

    fn resolve(chars: &[(u8, Capabilities)]) -> (Option<u8>, Option<u8>, usize) {
        let mut resolver = EndpointResolver::<u8, ()>::new();
        let mut inspected = 0;
        for &(id, caps) in chars {
            inspected += 1;
            if resolver.offer(id, &(), caps) {
                break;
            }
        }
        let (notify, write) = resolver.finish();
        (notify.map(|(id, _)| id), write.map(|(id, _)| id), inspected)
    }

    #[test]
    fn test_first_match_wins() {
        let chars = [(1, NONE), (2, NOTIFY), (3, NOTIFY), (4, WRITE), (5, WRITE)];
        let (notify, write, inspected) = resolve(&chars);
        assert_eq!(notify, Some(2));
        assert_eq!(write, Some(4));
        // Nothing after the second binding is inspected
        assert_eq!(inspected, 4);
    }

    #[test]
    fn test_enumeration_order_not_sorted() {
        let chars = [(9, WRITE_NO_RSP), (3, NOTIFY), (1, WRITE)];
        let (notify, write, _) = resolve(&chars);
        assert_eq!(notify, Some(3));
        assert_eq!(write, Some(9));
    }

    #[test]
    fn test_single_characteristic_serves_both() {
        let chars = [(7, BOTH), (8, NOTIFY)];
        let (notify, write, inspected) = resolve(&chars);
        assert_eq!(notify, Some(7));
        assert_eq!(write, Some(7));
        assert_eq!(inspected, 1);
    }

    #[test]
    fn test_no_notify_characteristic() {
        let chars = [(1, WRITE), (2, NONE)];
        let (notify, write, inspected) = resolve(&chars);
        assert_eq!(notify, None);
        assert_eq!(write, Some(1));
        assert_eq!(inspected, 2);
    }

    #[test]
    fn test_preferred_ids_override_first_match() {
        let mut resolver = EndpointResolver::<u8, ()>::with_preferred(Some(3), None);
        resolver.offer(1, &(), NOTIFY);
        resolver.offer(2, &(), WRITE);
        resolver.offer(3, &(), NONE);
        let (notify, write) = resolver.finish();
        assert_eq!(notify.map(|(id, _)| id), Some(3));
        assert_eq!(write.map(|(id, _)| id), Some(2));
    }

    #[test]
    fn test_capabilities_from_flags() {
        let mut flags = CharacteristicFlags::default();
        flags.notify = true;
        flags.write_without_response = true;
        let caps = Capabilities::from(flags);
        assert!(caps.notify);
        assert!(caps.is_writable());
    }

    #[test]
    fn test_characteristic_pair_clear() {
        let mut pair = CharacteristicPair {
            notify_id: Some(Uuid::from_u128(1)),
            write_id: Some(Uuid::from_u128(2)),
        };
        pair.clear();
        assert_eq!(pair, CharacteristicPair::default());
    }

    #[test]
    fn test_validate_serial() {
        let target = ConnectionTarget::serial("/dev/ttyACM0", 230400);
        assert_eq!(validate_serial(&target).unwrap(), ("/dev/ttyACM0", 230400));

        // Off-list baud rates are accepted
        let target = ConnectionTarget::serial("/dev/ttyUSB0", 250000);
        assert!(validate_serial(&target).is_ok());

        let target = ConnectionTarget::serial("  ", 9600);
        assert!(matches!(validate_serial(&target), Err(LinkError::InvalidTarget(_))));

        let target = ConnectionTarget::serial("COM3", 0);
        assert!(matches!(validate_serial(&target), Err(LinkError::InvalidTarget(_))));

        let target = ConnectionTarget::ble("00:11:22:33:44:55");
        assert!(matches!(validate_serial(&target), Err(LinkError::InvalidTarget(_))));
    }

    #[test]
    fn test_parse_ble_address() {
        let target = ConnectionTarget::ble("00:11:22:33:44:55");
        assert_eq!(
            parse_ble_address(&target).unwrap(),
            Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
        );

        let target = ConnectionTarget::ble("not-an-address");
        assert!(matches!(parse_ble_address(&target), Err(LinkError::InvalidTarget(_))));
    }
}

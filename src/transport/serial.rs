//! Serial transport (USB CDC / UART)
//!
//! Reads are poll driven: the port is asked how many bytes are buffered and
//! the loop sleeps for `poll_interval` when nothing is pending, so the
//! receive path stays responsive to commands raced against it.

use crate::error::{LinkError, Result};
use crate::transport::endpoint::validate_serial;
use crate::transport::traits::{Inbound, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use lsmd_shared::{defaults, ConnectionTarget, DiscoveredDevice, TransportKind};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Configuration for the serial transport
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Per-read timeout handed to the port
    pub read_timeout: Duration,
    /// Sleep between polls when no bytes are pending
    pub poll_interval: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(defaults::SERIAL_READ_TIMEOUT_MS),
            poll_interval: Duration::from_millis(defaults::SERIAL_POLL_INTERVAL_MS),
        }
    }
}

/// Serial link to a single measurement device
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<SerialStream>,
    port_name: Option<String>,
    read_buf: Box<[u8; READ_CHUNK]>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            port_name: None,
            read_buf: Box::new([0u8; READ_CHUNK]),
        }
    }

    /// Name of the open port, if any
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("[SERIAL] Port {:?} closed", self.port_name);
        }
        self.port_name = None;
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(SerialConfig::default())
    }
}

/// Human-readable name for an enumerated port
fn describe(port_type: &SerialPortType) -> Option<String> {
    match port_type {
        SerialPortType::UsbPort(info) => info
            .product
            .clone()
            .or_else(|| info.manufacturer.clone()),
        SerialPortType::BluetoothPort => Some("Bluetooth serial".to_string()),
        SerialPortType::PciPort | SerialPortType::Unknown => None,
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Port enumeration is instantaneous; the timeout does not apply
    async fn scan(&mut self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let ports = tokio_serial::available_ports().map_err(LinkError::scan)?;
        let devices: Vec<DiscoveredDevice> = ports
            .into_iter()
            .map(|port| DiscoveredDevice::new(describe(&port.port_type), port.port_name))
            .collect();
        info!("[SERIAL] Found {} port(s)", devices.len());
        Ok(devices)
    }

    async fn establish(&mut self, target: &ConnectionTarget) -> Result<()> {
        let (port_name, baud_rate) = validate_serial(target)?;
        if self.port.is_some() {
            self.close();
        }

        info!("[SERIAL] Opening {} at {} baud", port_name, baud_rate);
        let port = tokio_serial::new(port_name, baud_rate)
            .timeout(self.config.read_timeout)
            .open_native_async()
            .map_err(LinkError::connection)?;

        self.port = Some(port);
        self.port_name = Some(port_name.to_string());
        info!("[SERIAL] Connected to {}", port_name);
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        AsyncWriteExt::write_all(&mut *port, data).await?;
        AsyncWriteExt::flush(&mut *port).await?;
        debug!("[SERIAL] Wrote {} bytes", data.len());
        Ok(())
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            let Some(port) = self.port.as_mut() else {
                return Inbound::Closed("not connected".into());
            };

            let pending = match SerialPort::bytes_to_read(&*port) {
                Ok(pending) => pending as usize,
                Err(e) => {
                    warn!("[SERIAL] Port lost: {}", e);
                    self.close();
                    return Inbound::Closed(format!("Serial error: {}", e));
                }
            };
            if pending == 0 {
                sleep(self.config.poll_interval).await;
                continue;
            }

            let len = pending.min(READ_CHUNK);
            match AsyncReadExt::read(&mut *port, &mut self.read_buf[..len]).await {
                Ok(0) => {
                    self.close();
                    return Inbound::Closed("port closed".into());
                }
                Ok(n) => return Inbound::Data(Bytes::copy_from_slice(&self.read_buf[..n])),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    warn!("[SERIAL] Read failed: {}", e);
                    self.close();
                    return Inbound::Closed(format!("Read error: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_serial::UsbPortInfo;

    fn usb(product: Option<&str>, manufacturer: Option<&str>) -> SerialPortType {
        SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2e8a,
            pid: 0x000a,
            serial_number: None,
            manufacturer: manufacturer.map(str::to_string),
            product: product.map(str::to_string),
        })
    }

    #[test]
    fn test_describe_prefers_product() {
        assert_eq!(
            describe(&usb(Some("LSMD Probe"), Some("Raspberry Pi"))),
            Some("LSMD Probe".to_string())
        );
        assert_eq!(
            describe(&usb(None, Some("Raspberry Pi"))),
            Some("Raspberry Pi".to_string())
        );
        assert_eq!(describe(&usb(None, None)), None);
        assert_eq!(describe(&SerialPortType::Unknown), None);
    }

    #[test]
    fn test_unknown_port_name_defaults() {
        let device = DiscoveredDevice::new(describe(&SerialPortType::PciPort), "/dev/ttyS0");
        assert_eq!(device.display_name, "Unknown");
        assert_eq!(device.address_or_port, "/dev/ttyS0");
    }

    #[tokio::test]
    async fn test_write_without_port() {
        let mut transport = SerialTransport::default();
        assert!(matches!(
            transport.write(b"STOP\n").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_recv_and_teardown_without_port() {
        let mut transport = SerialTransport::default();
        assert!(matches!(transport.recv().await, Inbound::Closed(_)));
        assert!(transport.teardown().await.is_ok());
        assert!(transport.teardown().await.is_ok());
        assert!(!transport.is_connected());
        assert!(transport.port_name().is_none());
    }

    #[tokio::test]
    async fn test_establish_rejects_invalid_target() {
        let mut transport = SerialTransport::default();
        let target = ConnectionTarget::serial("", 9600);
        assert!(matches!(
            transport.establish(&target).await,
            Err(LinkError::InvalidTarget(_))
        ));

        let target = ConnectionTarget::ble("00:11:22:33:44:55");
        assert!(matches!(
            transport.establish(&target).await,
            Err(LinkError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_establish_missing_port() {
        let mut transport = SerialTransport::default();
        let target = ConnectionTarget::serial("/dev/lsmd-does-not-exist", 230400);
        assert!(matches!(
            transport.establish(&target).await,
            Err(LinkError::Connection(_))
        ));
        assert!(!transport.is_connected());
    }
}

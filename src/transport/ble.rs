//! BLE transport using the BlueZ GATT client
//!
//! Inbound data is push based: notifications on the bound characteristic and
//! BlueZ device events are pumped by a background task into a channel that
//! [`Transport::recv`] drains.

use crate::error::{LinkError, Result};
use crate::transport::endpoint::{
    parse_ble_address, Capabilities, CharacteristicPair, EndpointResolver,
};
use crate::transport::traits::{Inbound, Transport};
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Uuid};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use lsmd_shared::{defaults, ConnectionTarget, DiscoveredDevice, TransportKind};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Configuration for the BLE transport
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Bound on opening the radio link
    pub connect_timeout: Duration,
    /// Bound on waiting for BlueZ to resolve the GATT database
    pub services_timeout: Duration,
    /// Bind this characteristic for notifications instead of the first capable one
    pub notify_characteristic: Option<Uuid>,
    /// Bind this characteristic for writes instead of the first capable one
    pub write_characteristic: Option<Uuid>,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(defaults::BLE_CONNECT_TIMEOUT_MS),
            services_timeout: Duration::from_millis(defaults::BLE_SERVICES_TIMEOUT_MS),
            notify_characteristic: None,
            write_characteristic: None,
        }
    }
}

/// BLE link to a single measurement device
pub struct BleTransport {
    config: BleConfig,
    /// Adapter, opened lazily on first use
    adapter: Option<Adapter>,
    /// Connected device
    device: Option<Device>,
    /// Resolved endpoint ids
    characteristics: CharacteristicPair,
    notify_char: Option<Characteristic>,
    write_char: Option<Characteristic>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    pump: Option<JoinHandle<()>>,
    connected: bool,
}

impl BleTransport {
    /// Create a new BLE transport
    pub fn new(config: BleConfig) -> Self {
        Self {
            config,
            adapter: None,
            device: None,
            characteristics: CharacteristicPair::default(),
            notify_char: None,
            write_char: None,
            inbound_rx: None,
            pump: None,
            connected: false,
        }
    }

    /// Pin the notify characteristic for the next connection
    pub fn set_notify_characteristic(&mut self, uuid: Uuid) {
        self.config.notify_characteristic = Some(uuid);
    }

    /// Pin the write characteristic for the next connection
    pub fn set_write_characteristic(&mut self, uuid: Uuid) {
        self.config.write_characteristic = Some(uuid);
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) {
        self.config.connect_timeout = connect_timeout;
    }

    /// Endpoint ids resolved for the current link
    pub fn characteristics(&self) -> CharacteristicPair {
        self.characteristics
    }

    /// Get the default Bluetooth adapter, powering it on
    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("[BLE] Using adapter {}", adapter.name());
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Wait until BlueZ reports the GATT database resolved
    async fn wait_services_resolved(&self, device: &Device) -> Result<()> {
        let deadline = Instant::now() + self.config.services_timeout;
        while !device.is_services_resolved().await? {
            if Instant::now() >= deadline {
                warn!("[BLE] Services not resolved after {:?}, enumerating anyway", self.config.services_timeout);
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Walk the GATT database once and bind the notify/write endpoints
    async fn discover_endpoints(&mut self, device: &Device) -> Result<()> {
        self.wait_services_resolved(device).await?;

        let mut resolver: EndpointResolver<Uuid, Characteristic> = EndpointResolver::with_preferred(
            self.config.notify_characteristic,
            self.config.write_characteristic,
        );

        'services: for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                let caps = Capabilities::from(characteristic.flags().await?);
                debug!("[BLE] Characteristic {} {:?}", uuid, caps);
                if resolver.offer(uuid, &characteristic, caps) {
                    break 'services;
                }
            }
        }

        let (notify, write) = resolver.finish();
        self.characteristics = CharacteristicPair {
            notify_id: notify.as_ref().map(|(uuid, _)| *uuid),
            write_id: write.as_ref().map(|(uuid, _)| *uuid),
        };
        self.notify_char = notify.map(|(_, characteristic)| characteristic);
        self.write_char = write.map(|(_, characteristic)| characteristic);

        info!(
            "[BLE] Notify characteristic: {:?}, write characteristic: {:?}",
            self.characteristics.notify_id, self.characteristics.write_id
        );
        Ok(())
    }

    /// Subscribe to notifications and start pumping inbound items
    async fn start_pump(&mut self, device: &Device, tx: mpsc::UnboundedSender<Inbound>) -> Result<()> {
        let notifications = match &self.notify_char {
            Some(characteristic) => match characteristic.notify().await {
                Ok(stream) => Some(stream.boxed()),
                Err(e) => {
                    let _ = tx.send(Inbound::Fault(format!("Notification error: {}", e)));
                    None
                }
            },
            None => {
                warn!("[BLE] No notify characteristic found; no inbound data will arrive");
                None
            }
        };

        let events = device.events().await?.boxed();
        self.pump = Some(tokio::spawn(pump(notifications, events, tx)));
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.inbound_rx = None;
        self.device = None;
        self.notify_char = None;
        self.write_char = None;
        self.characteristics.clear();
        self.connected = false;
    }
}

/// Forward notifications and watch for the device dropping off
async fn pump(
    mut notifications: Option<BoxStream<'static, Vec<u8>>>,
    mut events: BoxStream<'static, DeviceEvent>,
    tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        tokio::select! {
            value = next_notification(&mut notifications) => match value {
                Some(value) => {
                    if tx.send(Inbound::Data(Bytes::from(value))).is_err() {
                        return;
                    }
                }
                // Subscription ended; the disconnect itself arrives as a device event
                None => notifications = None,
            },
            event = events.next() => match event {
                Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) => {
                    let _ = tx.send(Inbound::Closed("device disconnected".into()));
                    return;
                }
                Some(_) => {}
                None => {
                    let _ = tx.send(Inbound::Closed("device event stream ended".into()));
                    return;
                }
            },
        }
    }
}

async fn next_notification(stream: &mut Option<BoxStream<'static, Vec<u8>>>) -> Option<Vec<u8>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(BleConfig::default())
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    /// Radio scan for the full timeout, keeping advertisement order
    async fn scan(&mut self, scan_timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await.map_err(LinkError::scan)?;
        let discover = adapter.discover_devices().await.map_err(LinkError::scan)?;
        tokio::pin!(discover);

        let mut found = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        info!("[BLE] Scanning for {:?}", scan_timeout);
        let scan_result = timeout(scan_timeout, async {
            while let Some(evt) = discover.next().await {
                if let AdapterEvent::DeviceAdded(addr) = evt {
                    if !seen.insert(addr) {
                        continue;
                    }
                    let name = match adapter.device(addr) {
                        Ok(device) => device.name().await.ok().flatten(),
                        Err(_) => None,
                    };
                    found.push(DiscoveredDevice::new(name, addr.to_string()));
                }
            }
        })
        .await;

        // Timeout is the normal end of a scan
        if scan_result.is_err() {
            info!("[BLE] Scan completed, {} device(s)", found.len());
        }

        Ok(found)
    }

    async fn establish(&mut self, target: &ConnectionTarget) -> Result<()> {
        let address = parse_ble_address(target)?;
        if self.device.is_some() {
            let _ = self.teardown().await;
        }

        let adapter = self.adapter().await.map_err(LinkError::connection)?;
        let device = adapter.device(address).map_err(LinkError::connection)?;

        info!("[BLE] Connecting to {}", address);
        match timeout(self.config.connect_timeout, device.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(LinkError::connection(e)),
            Err(_) => {
                let _ = device.disconnect().await;
                return Err(LinkError::connection(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        }
        if !device.is_connected().await.unwrap_or(false) {
            return Err(LinkError::connection("Connection Failed."));
        }

        self.device = Some(device.clone());
        self.connected = true;
        info!("[BLE] Connected to {}", address);

        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound_rx = Some(rx);

        if let Err(e) = self.discover_endpoints(&device).await {
            let _ = tx.send(Inbound::Fault(format!("UUID discovery error: {}", e)));
        }
        if let Err(e) = self.start_pump(&device, tx).await {
            // Without device events a drop would go unnoticed
            self.reset();
            let _ = device.disconnect().await;
            return Err(LinkError::connection(e));
        }

        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        let device = self.device.clone();
        let was_connected = self.connected;
        self.reset();

        match device {
            Some(device) if was_connected => {
                info!("[BLE] Disconnecting from {}", device.address());
                device.disconnect().await.map_err(|e| {
                    warn!("[BLE] Disconnect failed: {}", e);
                    LinkError::from(e)
                })
            }
            _ => Ok(()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected || self.device.is_none() {
            return Err(LinkError::NotConnected);
        }
        let characteristic = self.write_char.as_ref().ok_or(LinkError::NotConfigured)?;
        characteristic.write(data).await?;
        debug!("[BLE] Wrote {} bytes", data.len());
        Ok(())
    }

    async fn recv(&mut self) -> Inbound {
        let inbound = match self.inbound_rx.as_mut() {
            Some(rx) => rx
                .recv()
                .await
                .unwrap_or_else(|| Inbound::Closed("notification pump stopped".into())),
            None => Inbound::Closed("not connected".into()),
        };
        if matches!(inbound, Inbound::Closed(_)) {
            self.connected = false;
        }
        inbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BleConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.services_timeout, Duration::from_secs(5));
        assert!(config.notify_characteristic.is_none());
        assert!(config.write_characteristic.is_none());
    }

    #[test]
    fn test_pinned_characteristics() {
        let mut transport = BleTransport::default();
        let uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);
        transport.set_write_characteristic(uuid);
        transport.set_connect_timeout(Duration::from_secs(3));
        assert_eq!(transport.config.connect_timeout, Duration::from_secs(3));
        assert_eq!(transport.config.write_characteristic, Some(uuid));
        assert!(transport.config.notify_characteristic.is_none());
    }

    #[tokio::test]
    async fn test_write_without_link() {
        let mut transport = BleTransport::default();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.write(b"START\n").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut transport = BleTransport::default();
        assert!(transport.teardown().await.is_ok());
        assert!(transport.teardown().await.is_ok());
        assert_eq!(transport.characteristics(), CharacteristicPair::default());
    }

    #[tokio::test]
    async fn test_recv_without_link_reports_closed() {
        let mut transport = BleTransport::default();
        assert!(matches!(transport.recv().await, Inbound::Closed(_)));
    }

    #[tokio::test]
    async fn test_establish_rejects_serial_target() {
        let mut transport = BleTransport::default();
        let target = ConnectionTarget::serial("/dev/ttyACM0", 230400);
        assert!(matches!(
            transport.establish(&target).await,
            Err(LinkError::InvalidTarget(_))
        ));
    }
}

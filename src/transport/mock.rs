//! Scripted in-memory transport for exercising the connection manager

use crate::error::{LinkError, Result};
use crate::transport::traits::{Inbound, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use lsmd_shared::{ConnectionTarget, DiscoveredDevice, TransportKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Debug, Default)]
struct Script {
    /// Outcomes for successive `establish` calls; empty means success
    establish_results: VecDeque<bool>,
    establish_delay: Duration,
    scan_result: Option<std::result::Result<Vec<DiscoveredDevice>, String>>,
    write_unconfigured: bool,
    write_delay: Duration,
    fail_teardown: bool,

    establish_calls: Vec<ConnectionTarget>,
    writes: Vec<Bytes>,
    teardown_calls: u32,
}

/// Test side of a [`MockTransport`]
#[derive(Clone)]
pub struct MockController {
    script: Arc<Mutex<Script>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockController {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn push_establish(&self, results: &[bool]) {
        self.script().establish_results.extend(results.iter().copied());
    }

    pub fn set_establish_delay(&self, delay: Duration) {
        self.script().establish_delay = delay;
    }

    pub fn set_scan_result(&self, result: std::result::Result<Vec<DiscoveredDevice>, String>) {
        self.script().scan_result = Some(result);
    }

    pub fn set_write_unconfigured(&self) {
        self.script().write_unconfigured = true;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.script().write_delay = delay;
    }

    pub fn set_fail_teardown(&self) {
        self.script().fail_teardown = true;
    }

    /// Deliver a raw chunk as if it arrived from the device
    pub fn deliver(&self, chunk: &[u8]) {
        let _ = self.inbound.send(Inbound::Data(Bytes::copy_from_slice(chunk)));
    }

    pub fn fault(&self, message: &str) {
        let _ = self.inbound.send(Inbound::Fault(message.to_string()));
    }

    /// Drop the link from the device side
    pub fn drop_link(&self) {
        let _ = self.inbound.send(Inbound::Closed("link dropped".into()));
    }

    pub fn establish_calls(&self) -> Vec<ConnectionTarget> {
        self.script().establish_calls.clone()
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.script().writes.clone()
    }

    pub fn teardown_calls(&self) -> u32 {
        self.script().teardown_calls
    }
}

/// Transport whose behaviour is driven by a [`MockController`]
pub struct MockTransport {
    kind: TransportKind,
    connected: bool,
    script: Arc<Mutex<Script>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> (Self, MockController) {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            kind,
            connected: false,
            script: script.clone(),
            inbound: rx,
        };
        (transport, MockController { script, inbound: tx })
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn scan(&mut self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let result = self.script().scan_result.clone();
        match result {
            Some(Ok(devices)) => Ok(devices),
            Some(Err(message)) => Err(LinkError::Scan(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn establish(&mut self, target: &ConnectionTarget) -> Result<()> {
        let (delay, ok) = {
            let mut script = self.script();
            script.establish_calls.push(target.clone());
            let ok = script.establish_results.pop_front().unwrap_or(true);
            (script.establish_delay, ok)
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if ok {
            self.connected = true;
            Ok(())
        } else {
            Err(LinkError::connection("device unreachable"))
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        self.connected = false;
        let mut script = self.script();
        script.teardown_calls += 1;
        if script.fail_teardown {
            return Err(LinkError::Io(std::io::Error::other("close failed")));
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        let (delay, unconfigured) = {
            let script = self.script();
            (script.write_delay, script.write_unconfigured)
        };
        if unconfigured {
            return Err(LinkError::NotConfigured);
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.script().writes.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn recv(&mut self) -> Inbound {
        if !self.connected {
            return Inbound::Closed("not connected".into());
        }
        let inbound = self
            .inbound
            .recv()
            .await
            .unwrap_or_else(|| Inbound::Closed("controller dropped".into()));
        if matches!(inbound, Inbound::Closed(_)) {
            self.connected = false;
        }
        inbound
    }
}

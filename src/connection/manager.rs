//! Connection manager with bounded automatic reconnection

use crate::connection::events::{EventReceiver, EventSink, LinkEvent, SharedState};
use crate::connection::reconnect::ReconnectPolicy;
use crate::connection::session;
use crate::connection::worker::{Worker, WorkerCommand};
use crate::error::{LinkError, Result};
use crate::transport::Transport;
use bytes::Bytes;
use lsmd_shared::codec;
use lsmd_shared::{defaults, Command, ConnectionState, ConnectionTarget, LinkTrigger, TransportKind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Reconnect settings
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Retry after an unplanned link loss
    pub enabled: bool,
    pub max_attempts: u32,
    /// Wait between attempts (none before the first)
    pub delay: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: defaults::RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(defaults::RECONNECT_DELAY_MS),
        }
    }
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Default scan duration
    pub scan_timeout: Duration,
    /// Bound on any wait for the worker (write replies, shutdown)
    pub operation_timeout: Duration,
    pub reconnect: ReconnectSettings,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_millis(defaults::SCAN_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(defaults::OPERATION_TIMEOUT_MS),
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Manages one link to one measurement device
///
/// All transport work happens on a single background worker; the caller
/// observes progress through the [`LinkEvent`] stream returned by
/// [`ConnectionManager::new`].
pub struct ConnectionManager<T: Transport> {
    config: LinkConfig,
    kind: TransportKind,
    transport: Arc<tokio::sync::Mutex<T>>,
    policy: Arc<Mutex<ReconnectPolicy>>,
    state: SharedState,
    events: EventSink,
    worker: Worker,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager for `transport` and the receiving end of its events
    pub fn new(transport: T, config: LinkConfig) -> (Self, EventReceiver) {
        let (events, event_rx) = EventSink::channel();
        let policy = ReconnectPolicy {
            enabled: config.reconnect.enabled,
            max_attempts: config.reconnect.max_attempts,
            delay: config.reconnect.delay,
            last_known_target: None,
        };

        let manager = Self {
            kind: transport.kind(),
            config,
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            policy: Arc::new(Mutex::new(policy)),
            state: SharedState::default(),
            events,
            worker: Worker::new(),
        };
        (manager, event_rx)
    }

    /// Transport variant this manager drives
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Whether a scan or link session is in flight
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn policy(&self) -> MutexGuard<'_, ReconnectPolicy> {
        self.policy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the reconnect policy
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy().clone()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.policy().enabled = enabled;
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.policy().max_attempts = attempts;
    }

    pub fn set_reconnect_delay(&self, delay: Duration) {
        self.policy().delay = delay;
    }

    /// Bound on waits for the worker; applies to sessions started afterwards
    pub fn set_operation_timeout(&mut self, operation_timeout: Duration) {
        self.config.operation_timeout = operation_timeout;
    }

    /// Start a scan; results arrive as `DeviceFound` / `ScanComplete` events
    pub fn scan(&mut self, scan_timeout: Duration) -> Result<()> {
        if self.worker.is_running() {
            return Err(self.reject(LinkError::AlreadyRunning));
        }

        let transport = self.transport.clone();
        let events = self.events.clone();
        self.worker.start("scan", move |ctx| {
            session::scan(transport, scan_timeout, events, ctx)
        })
    }

    /// Scan for the configured default duration
    pub fn scan_default(&mut self) -> Result<()> {
        self.scan(self.config.scan_timeout)
    }

    /// Start connecting; the outcome arrives as a `Connected` event
    pub fn connect(&mut self, target: ConnectionTarget) -> Result<()> {
        if target.kind() != self.kind {
            return Err(self.reject(LinkError::invalid_target(format!(
                "{} target given to {} transport",
                target.kind(),
                self.kind
            ))));
        }
        if self.worker.is_running() {
            return Err(self.reject(LinkError::AlreadyRunning));
        }
        if !self
            .state
            .apply(LinkTrigger::ConnectRequested, &self.events)
            .is_accepted()
        {
            return Err(self.reject(LinkError::AlreadyRunning));
        }

        self.policy().last_known_target = Some(target.clone());

        let transport = self.transport.clone();
        let policy = self.policy.clone();
        let operation_timeout = self.config.operation_timeout;
        let state = self.state.clone();
        let events = self.events.clone();
        self.worker.start("link session", move |ctx| {
            session::connect(transport, target, policy, operation_timeout, state, events, ctx)
        })
    }

    /// Send one line of text, appending the newline delimiter if missing
    pub async fn send(&self, text: &str) -> Result<()> {
        self.send_bytes(codec::encode_line(text)).await
    }

    /// Send a device command
    pub async fn send_command(&self, command: Command) -> Result<()> {
        info!("[LINK] Sending {}", command);
        self.send_bytes(command.encode()).await
    }

    async fn send_bytes(&self, data: Bytes) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            let e = LinkError::NotConnected;
            self.events.error(format!("Error sending: {}", e));
            return Err(e);
        }

        let wait = self.config.operation_timeout;
        match self
            .worker
            .request(wait, |reply| WorkerCommand::Send { data, reply })
            .await
        {
            // The worker gives up on a wedged write at the same deadline
            Ok(Err(e @ LinkError::OperationTimeout(_))) | Err(e) => {
                self.events.error(format!("Error sending: {}", e));
                Err(e)
            }
            // Other failures inside the worker were already reported there
            Ok(result) => result,
        }
    }

    /// Close the link and stop any scan or reconnect in progress
    ///
    /// Never triggers a reconnect. Calling it with nothing to close is a
    /// no-op; problems are reported as `Error` events.
    pub async fn disconnect(&mut self) {
        self.policy().disarm();

        if !self.worker.is_running() {
            self.state.apply(LinkTrigger::DisconnectRequested, &self.events);
            // Nothing in flight, make sure the transport holds no stale link
            let wait = self.config.operation_timeout;
            if let Ok(mut transport) = timeout(wait, self.transport.lock()).await {
                if let Err(e) = transport.teardown().await {
                    warn!("[LINK] Teardown while idle: {}", e);
                }
            }
            return;
        }

        self.worker.stop();
        self.state.apply(LinkTrigger::DisconnectRequested, &self.events);

        if let Err(e) = self.worker.join(self.config.operation_timeout).await {
            self.events.error(format!("Error within operation: {}", e));
            self.force_close().await;
        }
    }

    /// Worker was aborted mid-teardown; finish the job here
    async fn force_close(&mut self) {
        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.teardown().await {
            self.events.error(format!("Disconnection error: {}", e));
        }
        drop(transport);

        if self.state().is_active() {
            self.state.apply(LinkTrigger::DisconnectRequested, &self.events);
            self.state.apply(LinkTrigger::TeardownComplete, &self.events);
            self.events.emit(LinkEvent::Disconnected);
        }
    }

    fn reject(&self, error: LinkError) -> LinkError {
        self.events.error(error.to_string());
        error
    }
}

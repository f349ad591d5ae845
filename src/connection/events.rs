//! Events published by the connection manager

use lsmd_shared::{ConnectionState, ConnectionStateMachine, DiscoveredDevice, LinkTrigger, TransitionResult};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Notifications delivered to the caller, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A scan began
    ScanStarted,
    /// One device from the finished scan, in discovery order
    DeviceFound(DiscoveredDevice),
    /// Scan finished; empty on failure
    ScanComplete(Vec<DiscoveredDevice>),
    /// Result of a connect request, or `true` again after a successful reconnect
    Connected(bool),
    /// Link is gone and no reconnect will follow
    Disconnected,
    /// One decoded line from the device
    DataReceived(String),
    /// Human-readable failure description
    Error(String),
    /// Reconnect attempt number, starting at 1
    Reconnecting(u32),
    /// Link state transition
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Receiving end of the event channel
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Sending side of the event channel, shared by the manager and its worker
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: LinkEvent) {
        // Nobody listening is not an error
        let _ = self.tx.send(event);
    }

    /// Log and publish an error
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("[LINK] {}", message);
        self.emit(LinkEvent::Error(message));
    }
}

/// Link state shared between the manager and the worker
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    fsm: Arc<Mutex<ConnectionStateMachine>>,
}

impl SharedState {
    pub fn current(&self) -> ConnectionState {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner()).state()
    }

    /// Apply a trigger and publish the change
    ///
    /// The event is emitted while the machine is locked so `StateChanged`
    /// events arrive in transition order.
    pub fn apply(&self, trigger: LinkTrigger, events: &EventSink) -> TransitionResult {
        let mut fsm = self.fsm.lock().unwrap_or_else(|e| e.into_inner());
        let result = fsm.process(trigger);
        match &result {
            TransitionResult::Changed { from, to } => {
                info!("[LINK] State {} -> {}", from, to);
                events.emit(LinkEvent::StateChanged { from: *from, to: *to });
            }
            TransitionResult::Invalid { from, trigger } => {
                warn!("[LINK] Ignoring {:?} in state {}", trigger, from);
            }
            TransitionResult::Unchanged(_) => {}
        }
        result
    }
}

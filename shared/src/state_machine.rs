//! Connection State Machine
//!
//! Defines the valid link state transitions. One machine exists per
//! connection manager and every transition goes through [`ConnectionStateMachine::process`],
//! so transitions are serialized by whoever owns the machine.

use std::fmt;

/// Link lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link and no operation in progress
    #[default]
    Idle,
    /// Establishing the link (first attempt)
    Connecting,
    /// Link up, receive loop running
    Connected,
    /// Explicit disconnect in progress
    Disconnecting,
    /// Unplanned link loss, running the bounded retry
    Reconnecting,
    /// Reconnect attempts exhausted; only a fresh connect leaves this state
    Failed,
}

impl ConnectionState {
    /// Whether a session currently owns the link
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Disconnecting
                | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Conditions that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTrigger {
    /// Caller asked to connect
    ConnectRequested,
    /// Transport reported the link open
    Established,
    /// First connection attempt failed
    EstablishFailed,
    /// Transport reported an unplanned disconnect
    LinkLost {
        /// Reconnect policy is enabled and a target is known
        reconnect: bool,
    },
    /// Caller asked to disconnect
    DisconnectRequested,
    /// Transport closed after an explicit disconnect
    TeardownComplete,
    /// Every reconnect attempt failed
    ReconnectExhausted,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Trigger accepted but the state stays the same (idempotent requests)
    Unchanged(ConnectionState),
    /// Trigger not valid from the current state
    Invalid {
        from: ConnectionState,
        trigger: LinkTrigger,
    },
}

impl TransitionResult {
    /// Whether the trigger was accepted
    pub fn is_accepted(&self) -> bool {
        !matches!(self, TransitionResult::Invalid { .. })
    }
}

/// The link state machine
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process a trigger and return the transition result
    pub fn process(&mut self, trigger: LinkTrigger) -> TransitionResult {
        let from = self.current_state;
        match self.next_state(trigger) {
            Some(to) if to == from => TransitionResult::Unchanged(from),
            Some(to) => {
                self.current_state = to;
                TransitionResult::Changed { from, to }
            }
            None => TransitionResult::Invalid { from, trigger },
        }
    }

    /// Get the next state for a trigger, if the transition is valid
    fn next_state(&self, trigger: LinkTrigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkTrigger::*;

        match (self.current_state, trigger) {
            // A fresh connect is the only way out of Failed
            (Idle | Failed, ConnectRequested) => Some(Connecting),

            // From Connecting
            (Connecting, Established) => Some(Connected),
            (Connecting, EstablishFailed) => Some(Idle),

            // From Connected
            (Connected, LinkLost { reconnect: true }) => Some(Reconnecting),
            (Connected, LinkLost { reconnect: false }) => Some(Idle),

            // From Reconnecting
            (Reconnecting, Established) => Some(Connected),
            (Reconnecting, ReconnectExhausted) => Some(Failed),

            // Explicit disconnect cancels any active session
            (Connecting | Connected | Reconnecting, DisconnectRequested) => Some(Disconnecting),
            (Disconnecting, TeardownComplete) => Some(Idle),

            // Disconnect with nothing to tear down is a no-op
            (Idle | Disconnecting | Failed, DisconnectRequested) => Some(self.current_state),

            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (a, b) if a == b => true,

        (Idle | Failed, Connecting) => true,
        (Connecting, Connected | Idle) => true,
        (Connected, Reconnecting | Idle) => true,
        (Reconnecting, Connected | Failed) => true,
        (Connecting | Connected | Reconnecting, Disconnecting) => true,
        (Disconnecting, Idle) => true,

        _ => false,
    }
}

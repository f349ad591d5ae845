//! Transport trait abstraction for pluggable link backends

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use lsmd_shared::{ConnectionTarget, DiscoveredDevice, TransportKind};
use std::time::Duration;

/// One item from a transport's inbound path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A raw chunk (one BLE notification, one serial read)
    Data(Bytes),
    /// A non-fatal problem the caller should hear about; the link stays up
    Fault(String),
    /// The link went away without being asked to
    Closed(String),
}

/// A single physical or logical link
///
/// Implementations own their live link handle exclusively. The connection
/// manager drives them from one worker task, so methods take `&mut self`.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Which variant this is
    fn kind(&self) -> TransportKind;

    /// Whether a link is currently open
    fn is_connected(&self) -> bool;

    /// Enumerate reachable targets, in discovery order
    async fn scan(&mut self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Open the link and configure its read/write endpoints
    async fn establish(&mut self, target: &ConnectionTarget) -> Result<()>;

    /// Close the link
    ///
    /// Idempotent. Local state is reset even when the underlying close
    /// fails; the error is still returned so the caller can report it.
    async fn teardown(&mut self) -> Result<()>;

    /// Send application bytes over the outbound endpoint
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for the next inbound item
    ///
    /// Must be cancel safe: it is raced against commands in a `select!`.
    /// Returns [`Inbound::Closed`] when no link is open.
    async fn recv(&mut self) -> Inbound;
}

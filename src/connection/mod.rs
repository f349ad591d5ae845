//! Connection management for one measurement device
//!
//! This module handles:
//! - Scanning and connecting on a single background worker
//! - Line framing of inbound data into `DataReceived` events
//! - Bounded reconnection after unplanned link loss
//! - Writes marshalled onto the worker with a bounded wait

mod events;
mod manager;
mod reconnect;
mod session;
mod worker;

pub use events::{EventReceiver, LinkEvent};
pub use manager::{ConnectionManager, LinkConfig, ReconnectSettings};
pub use reconnect::{BoundedRetry, ReconnectPolicy};

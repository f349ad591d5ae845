//! Jobs run on the worker: one scan, or one link session
//!
//! A link session owns the transport from the first connection attempt
//! until the link is gone for good: it runs the receive loop, serves write
//! requests, and drives the bounded reconnect after an unplanned drop.

use crate::connection::events::{EventSink, LinkEvent, SharedState};
use crate::connection::reconnect::ReconnectPolicy;
use crate::connection::worker::{StopSignal, WorkerCommand, WorkerContext};
use crate::error::LinkError;
use crate::transport::{Inbound, Transport};
use lsmd_shared::{ConnectionTarget, FrameAssembler, LinkTrigger};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Run `fut` while turning away commands; `None` if stop was requested
async fn guarded<F: Future>(
    stop: &mut StopSignal,
    commands: &mut mpsc::Receiver<WorkerCommand>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => return None,
            Some(command) = commands.recv() => command.reject(LinkError::NotConnected),
            output = &mut fut => return Some(output),
        }
    }
}

/// Scan job
pub(crate) async fn scan<T: Transport>(
    transport: Arc<tokio::sync::Mutex<T>>,
    scan_timeout: Duration,
    events: EventSink,
    mut ctx: WorkerContext,
) {
    let mut transport = transport.lock_owned().await;
    info!("[LINK] Scanning ({})", transport.kind());
    events.emit(LinkEvent::ScanStarted);

    let result = guarded(&mut ctx.stop, &mut ctx.commands, transport.scan(scan_timeout)).await;
    ctx.release();

    match result {
        Some(Ok(devices)) => {
            for device in &devices {
                debug!("[LINK] Found {} at {}", device.display_name, device.address_or_port);
                events.emit(LinkEvent::DeviceFound(device.clone()));
            }
            events.emit(LinkEvent::ScanComplete(devices));
        }
        Some(Err(e)) => {
            events.error(e.to_string());
            events.emit(LinkEvent::ScanComplete(Vec::new()));
        }
        None => {
            info!("[LINK] Scan cancelled");
            events.emit(LinkEvent::ScanComplete(Vec::new()));
        }
    }
}

/// How the serve loop ended
enum Served {
    Stopped,
    LinkLost(String),
}

/// How a reconnect run ended
enum Reconnect {
    Restored,
    Stopped,
    Exhausted(u32),
}

/// One link session
pub(crate) struct Session<T: Transport> {
    transport: OwnedMutexGuard<T>,
    target: ConnectionTarget,
    policy: Arc<Mutex<ReconnectPolicy>>,
    operation_timeout: Duration,
    state: SharedState,
    events: EventSink,
    ctx: WorkerContext,
    assembler: FrameAssembler,
}

/// Link session job
pub(crate) async fn connect<T: Transport>(
    transport: Arc<tokio::sync::Mutex<T>>,
    target: ConnectionTarget,
    policy: Arc<Mutex<ReconnectPolicy>>,
    operation_timeout: Duration,
    state: SharedState,
    events: EventSink,
    ctx: WorkerContext,
) {
    let transport = transport.lock_owned().await;
    Session {
        transport,
        target,
        policy,
        operation_timeout,
        state,
        events,
        ctx,
        assembler: FrameAssembler::new(),
    }
    .run()
    .await
}

impl<T: Transport> Session<T> {
    fn advance(&self, trigger: LinkTrigger) -> bool {
        self.state.apply(trigger, &self.events).is_accepted()
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn run(mut self) {
        info!("[LINK] Connecting to {}", self.target);
        let established = guarded(
            &mut self.ctx.stop,
            &mut self.ctx.commands,
            self.transport.establish(&self.target),
        )
        .await;

        match established {
            None => return self.finish_disconnect().await,
            Some(Err(e)) => {
                if let Err(teardown) = self.transport.teardown().await {
                    debug!("[LINK] Cleanup after failed connect: {}", teardown);
                }
                if !self.advance(LinkTrigger::EstablishFailed) {
                    return self.finish_disconnect().await;
                }
                self.ctx.release();
                self.events.error(e.to_string());
                self.events.emit(LinkEvent::Connected(false));
                return;
            }
            Some(Ok(())) => {
                if !self.advance(LinkTrigger::Established) {
                    return self.finish_disconnect().await;
                }
                info!("[LINK] Connected to {}", self.target);
                self.events.emit(LinkEvent::Connected(true));
            }
        }

        loop {
            self.assembler.reset();
            let reason = match self.serve().await {
                Served::Stopped => return self.finish_disconnect().await,
                Served::LinkLost(reason) => reason,
            };

            warn!("[LINK] Link lost: {}", reason);
            // Local state is reset even if the close itself fails
            if let Err(e) = self.transport.teardown().await {
                debug!("[LINK] Teardown after link loss: {}", e);
            }

            let policy = self.reconnect_policy();
            if !policy.should_reconnect() {
                if !self.advance(LinkTrigger::LinkLost { reconnect: false }) {
                    return self.finish_disconnect().await;
                }
                self.ctx.release();
                self.events.emit(LinkEvent::Disconnected);
                return;
            }

            if !self.advance(LinkTrigger::LinkLost { reconnect: true }) {
                return self.finish_disconnect().await;
            }
            match self.reconnect(&policy).await {
                Reconnect::Restored => {
                    if !self.advance(LinkTrigger::Established) {
                        return self.finish_disconnect().await;
                    }
                    info!("[LINK] Reconnected to {}", self.target);
                    self.events.emit(LinkEvent::Connected(true));
                }
                Reconnect::Stopped => return self.finish_disconnect().await,
                Reconnect::Exhausted(attempts) => {
                    if !self.advance(LinkTrigger::ReconnectExhausted) {
                        return self.finish_disconnect().await;
                    }
                    self.ctx.release();
                    self.events
                        .error(LinkError::ReconnectExhausted { attempts }.to_string());
                    self.events.emit(LinkEvent::Disconnected);
                    return;
                }
            }
        }
    }

    /// Receive loop for a live link
    async fn serve(&mut self) -> Served {
        loop {
            tokio::select! {
                biased;
                _ = self.ctx.stop.stopped() => return Served::Stopped,
                Some(command) = self.ctx.commands.recv() => self.execute(command).await,
                inbound = self.transport.recv() => match inbound {
                    Inbound::Data(chunk) => {
                        for frame in self.assembler.feed(&chunk) {
                            self.events.emit(LinkEvent::DataReceived(frame));
                        }
                    }
                    Inbound::Fault(message) => self.events.error(message),
                    Inbound::Closed(reason) => return Served::LinkLost(reason),
                },
            }
        }
    }

    async fn execute(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Send { data, reply } => {
                let result = match timeout(self.operation_timeout, self.transport.write(&data)).await {
                    Ok(Ok(())) => {
                        debug!("[LINK] Sent {} bytes", data.len());
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        self.events.error(format!("Error sending: {}", e));
                        Err(e)
                    }
                    // The caller's own wait expires first and reports it
                    Err(_) => {
                        warn!("[LINK] Write did not complete within {:?}", self.operation_timeout);
                        Err(LinkError::OperationTimeout(self.operation_timeout))
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Bounded retry after an unplanned drop
    async fn reconnect(&mut self, policy: &ReconnectPolicy) -> Reconnect {
        let mut retry = policy.retry();
        let target = policy
            .last_known_target
            .clone()
            .unwrap_or_else(|| self.target.clone());

        while let Some(attempt) = retry.next_attempt() {
            info!("[LINK] Reconnect attempt {}/{}", attempt, retry.max_attempts());
            self.events.emit(LinkEvent::Reconnecting(attempt));

            if let Some(delay) = retry.delay_before(attempt) {
                if guarded(&mut self.ctx.stop, &mut self.ctx.commands, sleep(delay))
                    .await
                    .is_none()
                {
                    return Reconnect::Stopped;
                }
            }

            match guarded(
                &mut self.ctx.stop,
                &mut self.ctx.commands,
                self.transport.establish(&target),
            )
            .await
            {
                None => return Reconnect::Stopped,
                Some(Ok(())) => return Reconnect::Restored,
                Some(Err(e)) => {
                    warn!("[LINK] Reconnect attempt {} failed: {}", attempt, e);
                    if let Err(e) = self.transport.teardown().await {
                        debug!("[LINK] Cleanup after failed attempt: {}", e);
                    }
                }
            }
        }

        Reconnect::Exhausted(retry.attempts_made())
    }

    /// Explicit disconnect: close the link and settle in Idle
    async fn finish_disconnect(mut self) {
        // No-op when the manager already moved us to Disconnecting
        self.advance(LinkTrigger::DisconnectRequested);

        let result = self.transport.teardown().await;
        self.advance(LinkTrigger::TeardownComplete);
        self.ctx.release();

        if let Err(e) = result {
            self.events.error(format!("Disconnection error: {}", e));
        }
        info!("[LINK] Disconnected from {}", self.target);
        self.events.emit(LinkEvent::Disconnected);
    }
}

//! Background worker hosting scans and link sessions
//!
//! At most one job runs per manager. Each job gets its own busy flag, which
//! the job clears itself right before publishing its final events, so a
//! caller reacting to those events can immediately start the next job.

use crate::error::{LinkError, Result};
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Requests marshalled onto the worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Write bytes over the live link
    Send {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl WorkerCommand {
    /// Answer without executing
    pub fn reject(self, error: LinkError) {
        match self {
            WorkerCommand::Send { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Cancellation signal observed by a job
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested or the worker handle is gone
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// What a job receives from the worker
pub struct WorkerContext {
    pub stop: StopSignal,
    pub commands: mpsc::Receiver<WorkerCommand>,
    busy: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Mark the job finished ahead of its final events
    pub fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Single-job background worker
pub struct Worker {
    handle: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
    commands: Option<mpsc::Sender<WorkerCommand>>,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            handle: None,
            busy: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            commands: None,
        }
    }

    /// Whether a job is in flight
    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Spawn `job`, failing fast if one is already running
    pub fn start<F, Fut>(&mut self, name: &'static str, job: F) -> Result<()>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return Err(LinkError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(32);
        let busy = Arc::new(AtomicBool::new(true));

        let ctx = WorkerContext {
            stop: StopSignal { rx: stop_rx },
            commands: command_rx,
            busy: busy.clone(),
        };
        let job = job(ctx);
        let finished = busy.clone();

        debug!("[WORKER] Starting {}", name);
        self.handle = Some(tokio::spawn(async move {
            job.await;
            finished.store(false, Ordering::SeqCst);
            debug!("[WORKER] {} finished", name);
        }));
        self.busy = busy;
        self.stop_tx = Some(stop_tx);
        self.commands = Some(command_tx);
        Ok(())
    }

    /// Ask the running job to stop
    pub fn stop(&self) {
        if let Some(stop_tx) = &self.stop_tx {
            stop_tx.send_replace(true);
        }
    }

    /// Wait for the current job to end, aborting it after `wait`
    pub async fn join(&mut self, wait: Duration) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match timeout(wait, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("[WORKER] Job ended abnormally: {}", e);
                self.busy.store(false, Ordering::SeqCst);
                Err(LinkError::WorkerStopped)
            }
            Err(_) => {
                warn!("[WORKER] Job did not finish within {:?}, aborting", wait);
                handle.abort();
                self.busy.store(false, Ordering::SeqCst);
                Err(LinkError::OperationTimeout(wait))
            }
        }
    }

    /// Submit a command and wait for its reply, bounded by `wait`
    pub async fn request<R>(
        &self,
        wait: Duration,
        command: impl FnOnce(oneshot::Sender<R>) -> WorkerCommand,
    ) -> Result<R> {
        let commands = self.commands.as_ref().ok_or(LinkError::WorkerStopped)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let exchange = async {
            commands
                .send(command(reply_tx))
                .await
                .map_err(|_| LinkError::WorkerStopped)?;
            reply_rx.await.map_err(|_| LinkError::WorkerStopped)
        };

        timeout(wait, exchange)
            .await
            .map_err(|_| LinkError::OperationTimeout(wait))?
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

//! # Settlement Monitor
//!
//! One background task per Lightning node connection. It consumes the
//! node's invoice-update stream and hands each revealed preimage to the
//! callers watching that payment hash.
//!
//! Callers talk to the task over a command channel, so the watcher
//! registry is owned by the task alone. Every registration is delivered
//! at most once and removed on delivery.
//!
//! On transport failure the task resubscribes with exponential backoff,
//! keeps serving commands while disconnected, and after every connect
//! looks up each watched invoice so a settlement missed while offline is
//! still delivered. Every lookup is capped by `lookup_timeout_ms`; a
//! lookup that overruns is logged and skipped.

use crate::algorithms::verify;
use crate::config::SwapConfig;
use crate::domain::{ExternalOrigin, Hash, Preimage, SwapError};
use crate::ports::outbound::{InvoiceStatus, InvoiceStream, LightningNode};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Watchers = HashMap<Hash, Vec<oneshot::Sender<Preimage>>>;

enum Command {
    Watch {
        payment_hash: Hash,
        notify: oneshot::Sender<Preimage>,
    },
    Unwatch {
        payment_hash: Hash,
        reply: oneshot::Sender<bool>,
    },
    ActiveWatches {
        reply: oneshot::Sender<Vec<Hash>>,
    },
    IsWatching {
        payment_hash: Hash,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Pending delivery for one watched payment hash.
pub struct SettlementWatch {
    payment_hash: Hash,
    rx: oneshot::Receiver<Preimage>,
}

impl SettlementWatch {
    /// The watched hash.
    pub fn payment_hash(&self) -> &Hash {
        &self.payment_hash
    }

    /// Wait for the preimage.
    ///
    /// Fails with `MonitorStopped` if the watch was removed or the monitor
    /// shut down first. Callers that need a deadline wrap this in
    /// `tokio::time::timeout`.
    pub async fn wait(self) -> Result<Preimage, SwapError> {
        self.rx.await.map_err(|_| SwapError::MonitorStopped)
    }
}

/// Handle to the settlement listener task.
pub struct SettlementMonitor {
    commands: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SettlementMonitor {
    /// Spawn the listener on the current tokio runtime.
    pub fn spawn<Ln: LightningNode + 'static>(node: Arc<Ln>, config: &SwapConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let (initial, max) = config.reconnect_backoff();
        let task = tokio::spawn(run(node, rx, initial, max, config.lookup_timeout()));
        Self {
            commands,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register interest in `payment_hash`.
    pub async fn watch(&self, payment_hash: Hash) -> Result<SettlementWatch, SwapError> {
        let (notify, rx) = oneshot::channel();
        self.send(Command::Watch {
            payment_hash,
            notify,
        })
        .await?;
        Ok(SettlementWatch { payment_hash, rx })
    }

    /// Drop every registration for `payment_hash`. Returns whether any existed.
    pub async fn unwatch(&self, payment_hash: &Hash) -> Result<bool, SwapError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unwatch {
            payment_hash: *payment_hash,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SwapError::MonitorStopped)
    }

    /// Hashes with at least one registration, sorted.
    pub async fn active_watches(&self) -> Result<Vec<Hash>, SwapError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveWatches { reply }).await?;
        rx.await.map_err(|_| SwapError::MonitorStopped)
    }

    /// Check if `payment_hash` is watched.
    pub async fn is_watching(&self, payment_hash: &Hash) -> Result<bool, SwapError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsWatching {
            payment_hash: *payment_hash,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SwapError::MonitorStopped)
    }

    /// Stop the listener and wait for it to exit. Pending watches fail
    /// with `MonitorStopped`.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "[swap] settlement monitor task failed");
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), SwapError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SwapError::MonitorStopped)
    }
}

async fn run<Ln: LightningNode>(
    node: Arc<Ln>,
    mut commands: mpsc::Receiver<Command>,
    initial_backoff: Duration,
    max_backoff: Duration,
    lookup_timeout: Duration,
) {
    let mut watchers = Watchers::new();
    let mut backoff = initial_backoff;

    loop {
        let mut stream: InvoiceStream = match node.subscribe_invoices().await {
            Ok(stream) => {
                backoff = initial_backoff;
                stream
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_ms = backoff.as_millis() as u64,
                    "[swap] invoice subscription failed, retrying"
                );
                let sleep = tokio::time::sleep(backoff);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        command = commands.recv() => {
                            if !handle_command(node.as_ref(), &mut watchers, command, lookup_timeout).await {
                                return stop(watchers);
                            }
                        }
                    }
                }
                backoff = (backoff * 2).min(max_backoff);
                continue;
            }
        };

        info!(watched = watchers.len(), "[swap] settlement monitor connected");
        reconcile(node.as_ref(), &mut watchers, lookup_timeout).await;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    if !handle_command(node.as_ref(), &mut watchers, command, lookup_timeout).await {
                        return stop(watchers);
                    }
                }
                update = stream.next() => match update {
                    Some(Ok(status)) => dispatch(&mut watchers, status),
                    Some(Err(e)) => {
                        warn!(error = %e, "[swap] invoice stream error, reconnecting");
                        break;
                    }
                    None => {
                        warn!("[swap] invoice stream closed, reconnecting");
                        break;
                    }
                }
            }
        }
    }
}

/// Returns false when the task should stop.
async fn handle_command<Ln: LightningNode>(
    node: &Ln,
    watchers: &mut Watchers,
    command: Option<Command>,
    lookup_timeout: Duration,
) -> bool {
    match command {
        None | Some(Command::Shutdown) => false,
        Some(Command::Watch {
            payment_hash,
            notify,
        }) => {
            watchers.entry(payment_hash).or_default().push(notify);
            debug!(payment_hash = %hex::encode(payment_hash), "[swap] watching invoice");
            // Settled before the watch arrived.
            match lookup(node, &payment_hash, lookup_timeout).await {
                Ok(status) => dispatch(watchers, status),
                Err(e) => debug!(
                    payment_hash = %hex::encode(payment_hash),
                    error = %e,
                    "[swap] initial invoice lookup failed"
                ),
            }
            true
        }
        Some(Command::Unwatch {
            payment_hash,
            reply,
        }) => {
            let removed = watchers.remove(&payment_hash).is_some();
            let _ = reply.send(removed);
            true
        }
        Some(Command::ActiveWatches { reply }) => {
            let mut hashes: Vec<Hash> = watchers.keys().copied().collect();
            hashes.sort_unstable();
            let _ = reply.send(hashes);
            true
        }
        Some(Command::IsWatching {
            payment_hash,
            reply,
        }) => {
            let _ = reply.send(watchers.contains_key(&payment_hash));
            true
        }
    }
}

async fn lookup<Ln: LightningNode>(
    node: &Ln,
    payment_hash: &Hash,
    limit: Duration,
) -> Result<InvoiceStatus, SwapError> {
    match tokio::time::timeout(limit, node.lookup_invoice(payment_hash)).await {
        Ok(result) => result,
        Err(_) => Err(SwapError::external(
            ExternalOrigin::Lightning,
            format!("invoice lookup timed out after {}ms", limit.as_millis()),
        )),
    }
}

async fn reconcile<Ln: LightningNode>(
    node: &Ln,
    watchers: &mut Watchers,
    lookup_timeout: Duration,
) {
    let hashes: Vec<Hash> = watchers.keys().copied().collect();
    for payment_hash in hashes {
        match lookup(node, &payment_hash, lookup_timeout).await {
            Ok(status) => dispatch(watchers, status),
            Err(e) => warn!(
                payment_hash = %hex::encode(payment_hash),
                error = %e,
                "[swap] reconcile lookup failed"
            ),
        }
    }
}

fn dispatch(watchers: &mut Watchers, status: InvoiceStatus) {
    if !status.is_settled() {
        return;
    }
    let Some(preimage) = status.preimage else {
        return;
    };
    if !watchers.contains_key(&status.payment_hash) {
        return;
    }
    if !verify(preimage.as_bytes(), &status.payment_hash) {
        warn!(
            payment_hash = %hex::encode(status.payment_hash),
            "[swap] settlement preimage does not match, ignoring"
        );
        return;
    }
    let Some(pending) = watchers.remove(&status.payment_hash) else {
        return;
    };
    let delivered = pending
        .into_iter()
        .filter_map(|notify| notify.send(preimage.clone()).ok())
        .count();
    info!(
        payment_hash = %hex::encode(status.payment_hash),
        delivered,
        "[swap] preimage delivered"
    );
}

fn stop(watchers: Watchers) {
    info!(dropped = watchers.len(), "[swap] settlement monitor stopped");
}

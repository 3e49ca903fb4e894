//! Presence context: the single owner of presence state for a process.
//!
//! One actor task owns the [`PresenceMachine`], the heartbeat timer, the
//! retry timer and the connection subscription. Everything else talks to
//! it through a cloneable [`PresenceHandle`]. Commands, timer ticks and
//! connection changes are handled one at a time on that task, so a tick
//! can never interleave with an offline transition.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use presence_core::{
    ConnectionState, Effect, PresenceConfig, PresenceMachine, PresencePhase, UserId,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use crate::link::RealtimeLink;
use crate::slot::{IdentitySlot, resolve_from};
use crate::writer::{WriteCounts, WriteOp, WriterStats, spawn_writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("presence context is not running")]
pub struct PresenceClosed;

#[derive(Debug)]
enum Command {
    EnsureStarted,
    StartHeartbeat,
    SetOffline,
    Snapshot(oneshot::Sender<PresenceSnapshot>),
    Flush(oneshot::Sender<()>),
}

/// Observable state of the presence context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub phase: PresencePhase,
    pub user_id: Option<String>,
    pub presence_key: Option<String>,
    pub connection: ConnectionState,
    pub heartbeat_armed: bool,
    pub retry_pending: bool,
    pub identity_attempts: u64,
    pub writes: WriteCounts,
}

// ─── Handle ──────────────────────────────────────────────────────────

/// Cloneable entry point into the presence context. Every call returns
/// immediately; the work happens on the context task.
#[derive(Debug, Clone)]
pub struct PresenceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PresenceHandle {
    /// Idempotent: initialize presence once an identity is available.
    pub fn ensure_started(&self) -> Result<(), PresenceClosed> {
        self.send(Command::EnsureStarted)
    }

    /// (Re)arm the heartbeat and assert online now.
    pub fn start_heartbeat(&self) -> Result<(), PresenceClosed> {
        self.send(Command::StartHeartbeat)
    }

    /// Stop the heartbeat and write the offline record.
    pub fn set_offline(&self) -> Result<(), PresenceClosed> {
        self.send(Command::SetOffline)
    }

    pub async fn snapshot(&self) -> Result<PresenceSnapshot, PresenceClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| PresenceClosed)
    }

    /// Wait until every write issued before this call has reached the link.
    pub async fn flush(&self) -> Result<(), PresenceClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.await.map_err(|_| PresenceClosed)
    }

    fn send(&self, command: Command) -> Result<(), PresenceClosed> {
        self.tx.send(command).map_err(|_| PresenceClosed)
    }
}

// ─── Context ─────────────────────────────────────────────────────────

pub struct PresenceContext<L: RealtimeLink> {
    machine: PresenceMachine,
    link: Arc<L>,
    slot: Arc<dyn IdentitySlot>,
    commands: mpsc::UnboundedReceiver<Command>,
    writes: mpsc::UnboundedSender<WriteOp>,
    stats: Arc<WriterStats>,
    heartbeat: Option<Interval>,
    retry: Option<Pin<Box<Sleep>>>,
    connection: Option<watch::Receiver<Option<Value>>>,
    identity_attempts: u64,
    cancel: CancellationToken,
}

impl<L: RealtimeLink> PresenceContext<L> {
    /// Spawn the context and its writer. The context runs until `cancel`
    /// fires or every handle is dropped.
    pub fn spawn(
        config: PresenceConfig,
        link: Arc<L>,
        slot: Arc<dyn IdentitySlot>,
        cancel: CancellationToken,
    ) -> (PresenceHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (writes, write_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WriterStats::default());
        let writer = spawn_writer(Arc::clone(&link), write_rx, Arc::clone(&stats));

        let context = Self {
            machine: PresenceMachine::new(config),
            link,
            slot,
            commands,
            writes,
            stats,
            heartbeat: None,
            retry: None,
            connection: None,
            identity_attempts: 0,
            cancel,
        };

        let task = tokio::spawn(async move {
            context.run().await;
            // Writer drains whatever is queued once the sender is gone.
            if let Err(e) = writer.await {
                tracing::warn!("presence writer task failed: {e}");
            }
        });

        (PresenceHandle { tx }, task)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!("presence context cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                changed = next_connection(&mut self.connection) => match changed {
                    Some(state) => {
                        tracing::info!(connection = ?state, "connection state changed");
                        let effects = self.machine.connection_changed(state, now_ms());
                        self.apply(effects);
                    }
                    None => {
                        tracing::warn!("connection subscription closed");
                        self.connection = None;
                    }
                },
                () = next_retry(&mut self.retry) => {
                    self.retry = None;
                    let user = self.resolve_identity().await;
                    let effects = self.machine.retry_elapsed(move || user);
                    self.apply(effects);
                }
                () = next_tick(&mut self.heartbeat) => {
                    tracing::debug!("heartbeat tick");
                    let effects = self.machine.heartbeat_tick(now_ms());
                    self.apply(effects);
                }
            }
        }
        tracing::debug!("presence context stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::EnsureStarted => {
                let user = self.resolve_identity().await;
                let effects = self.machine.ensure_started(move || user);
                self.apply(effects);
            }
            Command::StartHeartbeat => {
                let effects = self.machine.start_heartbeat(now_ms());
                if effects.is_empty() {
                    tracing::debug!("start_heartbeat before initialization ignored");
                }
                self.apply(effects);
            }
            Command::SetOffline => {
                let effects = self.machine.set_offline(now_ms());
                if effects.is_empty() {
                    tracing::debug!("set_offline before initialization ignored");
                }
                self.apply(effects);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Flush(done) => self.enqueue(WriteOp::Flush(done)),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ScheduleRetry { after } => {
                    tracing::debug!(
                        after_ms = after.as_millis() as u64,
                        "identity absent, retry scheduled"
                    );
                    self.retry = Some(Box::pin(sleep(after)));
                }
                Effect::CancelRetry => self.retry = None,
                Effect::SubscribeConnection { key } => {
                    if let Some(user) = self.machine.user() {
                        tracing::info!(user_id = %user, "presence initialized");
                    }
                    let mut rx = self.link.subscribe(&key);
                    let state = ConnectionState::from_value((*rx.borrow_and_update()).as_ref());
                    self.connection = Some(rx);
                    let more = self.machine.connection_subscribed(state, now_ms());
                    self.apply(more);
                }
                Effect::ArmHeartbeat { period } => {
                    // Replacing the interval drops the previous timer.
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(ticker);
                }
                Effect::DisarmHeartbeat => self.heartbeat = None,
                Effect::Write { key, record } => {
                    self.enqueue(WriteOp::Set { key, record });
                }
                Effect::RegisterDisconnect { key, record } => {
                    self.enqueue(WriteOp::RegisterDisconnect { key, record });
                }
            }
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.writes.send(op).is_err() {
            tracing::warn!("presence writer gone, dropping write");
        }
    }

    /// Read the identity slot on the blocking pool. Skipped once
    /// initialized, so the attempt counter only counts real reads.
    async fn resolve_identity(&mut self) -> Option<UserId> {
        if self.machine.is_initialized() {
            return None;
        }
        self.identity_attempts += 1;
        let slot = Arc::clone(&self.slot);
        match tokio::task::spawn_blocking(move || resolve_from(slot.as_ref())).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("identity slot read task failed: {e}");
                None
            }
        }
    }

    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            phase: self.machine.phase(),
            user_id: self.machine.user().map(|u| u.to_string()),
            presence_key: self.machine.presence_key().map(str::to_owned),
            connection: self.machine.connection(),
            heartbeat_armed: self.heartbeat.is_some(),
            retry_pending: self.retry.is_some(),
            identity_attempts: self.identity_attempts,
            writes: self.stats.snapshot(),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn next_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

/// Next connection notification, or `None` once the link dropped the key.
async fn next_connection(
    rx: &mut Option<watch::Receiver<Option<Value>>>,
) -> Option<ConnectionState> {
    let Some(rx) = rx else {
        return pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some(ConnectionState::from_value((*rx.borrow_and_update()).as_ref())),
        Err(_) => None,
    }
}

//! Ordered presence writer.
//!
//! All store mutations issued by the presence context go through one
//! queue drained by one task, so writes to the presence key reach the
//! link in the order they were issued. Callers never wait on a write;
//! outcomes are only logged and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use presence_core::PresenceRecord;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::link::RealtimeLink;

#[derive(Debug)]
pub(crate) enum WriteOp {
    Set { key: String, record: PresenceRecord },
    RegisterDisconnect { key: String, record: PresenceRecord },
    /// Resolved once every earlier op has completed.
    Flush(oneshot::Sender<()>),
}

// ─── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct WriterStats {
    online_ok: AtomicU64,
    offline_ok: AtomicU64,
    failed: AtomicU64,
    registrations: AtomicU64,
    registration_failures: AtomicU64,
}

/// Point-in-time copy of writer counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub online_ok: u64,
    pub offline_ok: u64,
    pub failed: u64,
    pub registrations: u64,
    pub registration_failures: u64,
}

impl WriterStats {
    pub(crate) fn snapshot(&self) -> WriteCounts {
        WriteCounts {
            online_ok: self.online_ok.load(Ordering::Relaxed),
            offline_ok: self.offline_ok.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
        }
    }
}

// ─── Task ────────────────────────────────────────────────────────────

pub(crate) fn spawn_writer<L: RealtimeLink>(
    link: Arc<L>,
    rx: mpsc::UnboundedReceiver<WriteOp>,
    stats: Arc<WriterStats>,
) -> JoinHandle<()> {
    tokio::spawn(run_writer(link, rx, stats))
}

async fn run_writer<L: RealtimeLink>(
    link: Arc<L>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    stats: Arc<WriterStats>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Set { key, record } => match link.write(&key, record.to_value()).await {
                Ok(()) => {
                    let counter = if record.online {
                        &stats.online_ok
                    } else {
                        &stats.offline_ok
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, online = record.online, "presence written");
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, online = record.online, "presence write failed: {e}");
                }
            },
            WriteOp::RegisterDisconnect { key, record } => {
                match link.on_disconnect(&key, record.to_value()).await {
                    Ok(()) => {
                        stats.registrations.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(key = %key, "disconnect action registered");
                    }
                    Err(e) => {
                        stats.registration_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(key = %key, "disconnect registration failed: {e}");
                    }
                }
            }
            WriteOp::Flush(done) => {
                // Receiver may have given up waiting.
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("presence writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_link::{MemoryLink, WriteOrigin};

    const KEY: &str = "presence/u1";

    #[tokio::test]
    async fn writes_apply_in_order_and_flush_waits() {
        let link = Arc::new(MemoryLink::new());
        let stats = Arc::new(WriterStats::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_writer(Arc::clone(&link), rx, Arc::clone(&stats));

        for (i, online) in [true, false, true, false].into_iter().enumerate() {
            let record = PresenceRecord {
                online,
                updated_at: i as i64,
            };
            tx.send(WriteOp::Set {
                key: KEY.into(),
                record,
            })
            .expect("writer alive");
        }
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WriteOp::Flush(done_tx)).expect("writer alive");
        done_rx.await.expect("flush acked");

        let stamps: Vec<i64> = link
            .records_by(KEY, WriteOrigin::Client)
            .iter()
            .map(|r| r.updated_at)
            .collect();
        assert_eq!(stamps, vec![0, 1, 2, 3]);
        assert_eq!(link.record(KEY), Some(PresenceRecord::offline(3)));

        let counts = stats.snapshot();
        assert_eq!(counts.online_ok, 2);
        assert_eq!(counts.offline_ok, 2);
        assert_eq!(counts.failed, 0);

        drop(tx);
        handle.await.expect("writer exits cleanly");
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let link = Arc::new(MemoryLink::new());
        let stats = Arc::new(WriterStats::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let _handle = spawn_writer(Arc::clone(&link), rx, Arc::clone(&stats));

        link.set_reject_writes(true);
        tx.send(WriteOp::Set {
            key: KEY.into(),
            record: PresenceRecord::online(1),
        })
        .expect("writer alive");
        tx.send(WriteOp::RegisterDisconnect {
            key: KEY.into(),
            record: PresenceRecord::offline(1),
        })
        .expect("writer alive");

        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WriteOp::Flush(done_tx)).expect("writer alive");
        done_rx.await.expect("flush acked");

        link.set_reject_writes(false);
        tx.send(WriteOp::Set {
            key: KEY.into(),
            record: PresenceRecord::online(2),
        })
        .expect("writer alive");
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WriteOp::Flush(done_tx)).expect("writer alive");
        done_rx.await.expect("flush acked");

        let counts = stats.snapshot();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.registration_failures, 1);
        assert_eq!(counts.online_ok, 1);
        assert_eq!(link.record(KEY), Some(PresenceRecord::online(2)));
    }
}

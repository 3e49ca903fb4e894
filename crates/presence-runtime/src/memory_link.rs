//! In-process realtime backend.
//!
//! Implements [`RealtimeLink`] with per-key values, per-key subscriptions,
//! the reserved connection key, and per-session disconnect intents. The
//! transport can be dropped and restored to simulate network loss; on drop
//! the backend executes the registered intents itself, recorded in the
//! write log as [`WriteOrigin::Backend`].
//!
//! The write log is a ring holding the most recent entries only.

use std::collections::{HashMap, VecDeque};
use std::future::{Future, ready};
use std::sync::{Arc, Mutex, MutexGuard};

use presence_core::PresenceRecord;
use presence_core::types::CONNECTED_KEY;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::link::{LinkError, RealtimeLink};

// ─── Write Log ───────────────────────────────────────────────────────

/// Entries kept in the write log before the oldest are evicted.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Who issued a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// Issued directly by the client.
    Client,
    /// Executed by the backend from a registered disconnect intent.
    Backend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteLogEntry {
    pub key: String,
    pub value: Value,
    pub origin: WriteOrigin,
    /// Transport session the write belongs to.
    pub session: u64,
}

// ─── Backend State ───────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    connected_key: String,
    values: HashMap<String, Value>,
    watchers: HashMap<String, watch::Sender<Option<Value>>>,
    connected: bool,
    session: u64,
    /// Disconnect intents registered during the current session.
    intents: HashMap<String, Value>,
    log: VecDeque<WriteLogEntry>,
    log_capacity: usize,
    reject_writes: bool,
}

impl Inner {
    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_owned(), value.clone());
        if let Some(tx) = self.watchers.get(key) {
            let next = Some(value);
            tx.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }

    fn push_log(&mut self, entry: WriteLogEntry) {
        if self.log_capacity == 0 {
            return;
        }
        while self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    /// Backend-side stamp for an executed intent: `updated_at` never goes
    /// below the one already stored at `key`.
    fn stamp_intent(&self, key: &str, mut value: Value) -> Value {
        let stored = self
            .values
            .get(key)
            .and_then(|v| v.get("updated_at"))
            .and_then(Value::as_i64);
        if let (Some(stored), Some(Value::Number(n))) = (stored, value.get_mut("updated_at")) {
            if n.as_i64().is_some_and(|at| at < stored) {
                *n = stored.into();
            }
        }
        value
    }

    fn publish_connection(&mut self) {
        let key = self.connected_key.clone();
        self.set(&key, Value::Bool(self.connected));
    }
}

/// Shared handle to an in-process backend. Clones see the same state.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLink {
    /// A backend with a live transport session.
    pub fn new() -> Self {
        Self::with_connection(true)
    }

    /// A backend whose transport is not yet reachable.
    pub fn disconnected() -> Self {
        Self::with_connection(false)
    }

    fn with_connection(connected: bool) -> Self {
        let mut inner = Inner {
            connected_key: CONNECTED_KEY.to_owned(),
            values: HashMap::new(),
            watchers: HashMap::new(),
            connected,
            session: u64::from(connected),
            intents: HashMap::new(),
            log: VecDeque::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            reject_writes: false,
        };
        inner.publish_connection();
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Keep at most `capacity` write log entries. Zero disables the log.
    pub fn with_log_capacity(self, capacity: usize) -> Self {
        {
            let mut inner = self.lock();
            inner.log_capacity = capacity;
            while inner.log.len() > capacity {
                inner.log.pop_front();
            }
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Transport simulation ────────────────────────────────────────

    /// Simulate losing the transport: run every registered intent, then
    /// flip the connection key. No-op if already disconnected.
    pub fn drop_connection(&self) {
        let mut inner = self.lock();
        if !inner.connected {
            return;
        }
        let session = inner.session;
        let mut intents: Vec<(String, Value)> = inner.intents.drain().collect();
        intents.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in intents {
            let value = inner.stamp_intent(&key, value);
            inner.set(&key, value.clone());
            inner.push_log(WriteLogEntry {
                key,
                value,
                origin: WriteOrigin::Backend,
                session,
            });
        }
        inner.connected = false;
        inner.publish_connection();
    }

    /// Simulate the transport coming back as a new session.
    pub fn restore_connection(&self) {
        let mut inner = self.lock();
        if inner.connected {
            return;
        }
        inner.connected = true;
        inner.session += 1;
        inner.publish_connection();
    }

    /// Make every client write and registration fail until cleared.
    pub fn set_reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn session(&self) -> u64 {
        self.lock().session
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    /// Presence record stored at `key`, if any.
    pub fn record(&self, key: &str) -> Option<PresenceRecord> {
        self.get(key).as_ref().and_then(PresenceRecord::from_value)
    }

    /// Disconnect intent registered for `key` in the current session.
    pub fn pending_intent(&self, key: &str) -> Option<Value> {
        self.lock().intents.get(key).cloned()
    }

    pub fn log(&self) -> Vec<WriteLogEntry> {
        self.lock().log.iter().cloned().collect()
    }

    /// Records written at `key` by `origin`, oldest first.
    pub fn records_by(&self, key: &str, origin: WriteOrigin) -> Vec<PresenceRecord> {
        self.lock()
            .log
            .iter()
            .filter(|e| e.key == key && e.origin == origin)
            .filter_map(|e| PresenceRecord::from_value(&e.value))
            .collect()
    }

    // ── Client operations ───────────────────────────────────────────

    fn client_write(&self, key: &str, value: Value) -> Result<(), LinkError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(LinkError::Disconnected);
        }
        if inner.reject_writes {
            return Err(LinkError::Rejected {
                key: key.to_owned(),
                reason: "rejected by backend".to_owned(),
            });
        }
        let session = inner.session;
        inner.set(key, value.clone());
        inner.push_log(WriteLogEntry {
            key: key.to_owned(),
            value,
            origin: WriteOrigin::Client,
            session,
        });
        Ok(())
    }

    fn register_intent(&self, key: &str, value: Value) -> Result<(), LinkError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(LinkError::Disconnected);
        }
        if inner.reject_writes {
            return Err(LinkError::Rejected {
                key: key.to_owned(),
                reason: "rejected by backend".to_owned(),
            });
        }
        inner.intents.insert(key.to_owned(), value);
        Ok(())
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeLink for MemoryLink {
    fn write(&self, key: &str, value: Value) -> impl Future<Output = Result<(), LinkError>> + Send {
        ready(self.client_write(key, value))
    }

    fn subscribe(&self, key: &str) -> watch::Receiver<Option<Value>> {
        let mut inner = self.lock();
        let current = inner.values.get(key).cloned();
        inner
            .watchers
            .entry(key.to_owned())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    fn on_disconnect(
        &self,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), LinkError>> + Send {
        ready(self.register_intent(key, value))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

//! Realtime link contract: the capabilities the presence subsystem needs
//! from the replicated store.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("write rejected at {key}: {reason}")]
    Rejected { key: String, reason: String },
    #[error("transport disconnected")]
    Disconnected,
    #[error("link closed")]
    Closed,
}

/// Keyed, replicated store with a server-executed on-disconnect action.
pub trait RealtimeLink: Send + Sync + 'static {
    /// Upsert `value` at `key`.
    fn write(&self, key: &str, value: Value) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Current value at `key` and every later change. `None` means no value.
    fn subscribe(&self, key: &str) -> watch::Receiver<Option<Value>>;

    /// Register `value` to be written at `key` by the backend, without
    /// client participation, when this client's transport session ends.
    /// A later registration for the same key in the same session replaces it.
    fn on_disconnect(
        &self,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}

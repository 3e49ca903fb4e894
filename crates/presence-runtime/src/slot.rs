//! Local identity slot: where the identification flow persists the user id.
//!
//! Read-only from the presence subsystem's side.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use presence_core::{UserId, resolve_identity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("failed to read identity slot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait IdentitySlot: Send + Sync + 'static {
    /// Raw slot content. `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> Result<Option<String>, SlotError>;
}

/// Resolve the current user from a slot. A read failure is logged and
/// treated like a missing identity so the retry loop keeps going.
pub fn resolve_from(slot: &dyn IdentitySlot) -> Option<UserId> {
    match slot.read() {
        Ok(raw) => resolve_identity(raw.as_deref()),
        Err(e) => {
            tracing::warn!("identity slot unreadable: {e}");
            None
        }
    }
}

// ─── File Slot ───────────────────────────────────────────────────────

/// Slot backed by a single file on disk.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentitySlot for FileSlot {
    fn read(&self) -> Result<Option<String>, SlotError> {
        // Malformed bytes still yield the raw stored value.
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SlotError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

// ─── Memory Slot ─────────────────────────────────────────────────────

/// In-memory slot; clones share the stored value.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    value: Arc<Mutex<Option<String>>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(raw: impl Into<String>) -> Self {
        let slot = Self::new();
        slot.set(raw);
        slot
    }

    pub fn set(&self, raw: impl Into<String>) {
        *self.value.lock().unwrap_or_else(|p| p.into_inner()) = Some(raw.into());
    }

    pub fn clear(&self) {
        *self.value.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl IdentitySlot for MemorySlot {
    fn read(&self) -> Result<Option<String>, SlotError> {
        Ok(self.value.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

//! presence-runtime: tokio runtime for the presence subsystem.
//!
//! Wires the pure [`presence_core::PresenceMachine`] to real timers, a
//! [`link::RealtimeLink`], an identity slot, and a lifecycle signal source.

pub mod bridge;
pub mod context;
pub mod link;
pub mod memory_link;
pub mod slot;
pub mod writer;

pub use bridge::{LifecycleBridge, SignalSource};
pub use context::{PresenceClosed, PresenceContext, PresenceHandle, PresenceSnapshot};
pub use link::{LinkError, RealtimeLink};
pub use memory_link::{MemoryLink, WriteOrigin};
pub use slot::{FileSlot, IdentitySlot, MemorySlot, SlotError};

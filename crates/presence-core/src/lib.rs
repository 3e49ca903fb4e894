//! presence-core: presence record types, identity decoding, lifecycle
//! signal mapping, and the deterministic presence state machine.
//!
//! No IO and no async; the runtime crate applies the effects.

pub mod identity;
pub mod lifecycle;
pub mod machine;
pub mod types;

pub use identity::resolve_identity;
pub use lifecycle::{DriverAction, LifecycleSignal};
pub use machine::{Effect, PresenceMachine, PresencePhase};
pub use types::{ConnectionState, PresenceConfig, PresenceError, PresenceRecord, UserId};

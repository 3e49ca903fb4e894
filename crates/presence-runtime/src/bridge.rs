//! Lifecycle bridge: forwards environment signals to the presence context.
//!
//! Each signal has its own named handler. Handlers are independent; a
//! failing one is logged and the bridge keeps dispatching.

use std::future::Future;

use presence_core::{DriverAction, LifecycleSignal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::{PresenceClosed, PresenceHandle};

/// Anything that yields lifecycle signals: a browser shim, a test channel,
/// a console. `None` means the source is exhausted.
pub trait SignalSource: Send {
    fn next_signal(&mut self) -> impl Future<Output = Option<LifecycleSignal>> + Send;
}

impl SignalSource for mpsc::Receiver<LifecycleSignal> {
    fn next_signal(&mut self) -> impl Future<Output = Option<LifecycleSignal>> + Send {
        self.recv()
    }
}

impl SignalSource for mpsc::UnboundedReceiver<LifecycleSignal> {
    fn next_signal(&mut self) -> impl Future<Output = Option<LifecycleSignal>> + Send {
        self.recv()
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleBridge {
    presence: PresenceHandle,
}

impl LifecycleBridge {
    pub fn new(presence: PresenceHandle) -> Self {
        Self { presence }
    }

    // ── Handlers ────────────────────────────────────────────────────

    pub fn on_visibility_hidden(&self) -> Result<(), PresenceClosed> {
        self.presence.set_offline()
    }

    pub fn on_visibility_visible(&self) -> Result<(), PresenceClosed> {
        self.presence.start_heartbeat()
    }

    pub fn on_focus(&self) -> Result<(), PresenceClosed> {
        self.presence.start_heartbeat()
    }

    pub fn on_blur(&self) -> Result<(), PresenceClosed> {
        self.presence.set_offline()
    }

    pub fn on_page_show(&self) -> Result<(), PresenceClosed> {
        self.presence.start_heartbeat()
    }

    pub fn on_page_hide(&self) -> Result<(), PresenceClosed> {
        self.presence.set_offline()
    }

    pub fn on_unload(&self) -> Result<(), PresenceClosed> {
        self.presence.set_offline()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Route one signal to its handler. Errors are logged, not returned.
    pub fn dispatch(&self, signal: LifecycleSignal) {
        let result = match signal {
            LifecycleSignal::VisibilityHidden => self.on_visibility_hidden(),
            LifecycleSignal::VisibilityVisible => self.on_visibility_visible(),
            LifecycleSignal::FocusGained => self.on_focus(),
            LifecycleSignal::FocusLost => self.on_blur(),
            LifecycleSignal::PageShow => self.on_page_show(),
            LifecycleSignal::PageHide => self.on_page_hide(),
            LifecycleSignal::Unload => self.on_unload(),
        };
        match result {
            Ok(()) => tracing::debug!(
                signal = %signal,
                action = ?signal.action(),
                "lifecycle signal forwarded"
            ),
            Err(e) => tracing::warn!(signal = %signal, "lifecycle handler failed: {e}"),
        }
    }

    /// Forward signals from `source` until it is exhausted or `cancel` fires.
    pub async fn run<S: SignalSource>(self, mut source: S, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                signal = source.next_signal() => match signal {
                    Some(signal) => self.dispatch(signal),
                    None => break,
                },
            }
        }
        tracing::debug!("lifecycle bridge stopped");
    }
}

/// True when the signal ends active presence (used to decide whether a
/// caller should flush before tearing down).
pub fn is_going_inactive(signal: LifecycleSignal) -> bool {
    signal.action() == DriverAction::SetOffline
}

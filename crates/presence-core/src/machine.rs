//! Presence state machine.
//!
//! Pure and deterministic: no timers, no IO, no clock access. Transitions
//! that write take the current wall-clock time in epoch milliseconds, and
//! all of them return the [`Effect`]s a runtime must apply, in order.
//!
//! ```text
//! Uninitialized ──ensure_started──► Initializing ──identity──► Active ⇄ Suspended
//!                                     │    ▲
//!                                     └────┘ retry every `retry_interval`
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lifecycle::DriverAction;
use crate::types::{ConnectionState, PresenceConfig, PresenceRecord, UserId};

// ─── Phase & Effects ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresencePhase {
    #[default]
    Uninitialized,
    /// Waiting for an identity; a retry may be pending.
    Initializing,
    /// Heartbeat armed, record asserted online.
    Active,
    /// No heartbeat, record forced offline.
    Suspended,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Call `ensure_started` again after `after`. Never emitted while one is pending.
    ScheduleRetry { after: Duration },
    CancelRetry,
    /// Subscribe to the connection-state key, then report the current
    /// value through [`PresenceMachine::connection_subscribed`].
    SubscribeConnection { key: String },
    /// Replace any existing heartbeat timer with one firing every `period`.
    ArmHeartbeat { period: Duration },
    DisarmHeartbeat,
    Write { key: String, record: PresenceRecord },
    /// Ask the backend to write `record` at `key` when this session drops.
    RegisterDisconnect { key: String, record: PresenceRecord },
}

// ─── Machine ──────────────────────────────────────────────────────

/// Single-instance presence state for one process.
#[derive(Debug, Clone)]
pub struct PresenceMachine {
    config: PresenceConfig,
    phase: PresencePhase,
    user: Option<UserId>,
    key: Option<String>,
    heartbeat_armed: bool,
    retry_pending: bool,
    connection: ConnectionState,
    last_stamp: i64,
}

impl PresenceMachine {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            phase: PresencePhase::Uninitialized,
            user: None,
            key: None,
            heartbeat_armed: false,
            retry_pending: false,
            connection: ConnectionState::Unreachable,
            last_stamp: i64::MIN,
        }
    }

    // ── Bootstrap ────────────────────────────────────────────────

    /// Idempotent initialization entry point.
    ///
    /// `resolve` is only invoked when not yet initialized. An absent
    /// identity schedules a retry unless one is already pending.
    pub fn ensure_started<F>(&mut self, resolve: F) -> Vec<Effect>
    where
        F: FnOnce() -> Option<UserId>,
    {
        if self.is_initialized() {
            return Vec::new();
        }

        let Some(user) = resolve() else {
            self.phase = PresencePhase::Initializing;
            if self.retry_pending {
                return Vec::new();
            }
            self.retry_pending = true;
            return vec![Effect::ScheduleRetry {
                after: self.config.retry_interval,
            }];
        };

        let mut effects = Vec::with_capacity(2);
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        self.key = Some(self.config.presence_key(&user));
        self.user = Some(user);
        self.phase = PresencePhase::Initializing;
        effects.push(Effect::SubscribeConnection {
            key: self.config.connected_key.clone(),
        });
        effects
    }

    /// The pending retry fired.
    pub fn retry_elapsed<F>(&mut self, resolve: F) -> Vec<Effect>
    where
        F: FnOnce() -> Option<UserId>,
    {
        self.retry_pending = false;
        self.ensure_started(resolve)
    }

    // ── Connection ───────────────────────────────────────────────

    /// Initial connection value right after subscribing. Heartbeating
    /// starts either way; the disconnect action is only registered once
    /// the transport is reachable.
    pub fn connection_subscribed(&mut self, state: ConnectionState, now_ms: i64) -> Vec<Effect> {
        if state.is_reachable() {
            return self.connection_changed(state, now_ms);
        }
        self.connection = state;
        self.start_heartbeat(now_ms)
    }

    /// A connection-state notification.
    ///
    /// Every reachable notification re-registers the disconnect action:
    /// the previous registration belonged to the replaced transport
    /// session, and a quick drop/restore may arrive as a single update.
    pub fn connection_changed(&mut self, state: ConnectionState, now_ms: i64) -> Vec<Effect> {
        self.connection = state;
        if !state.is_reachable() {
            return Vec::new();
        }
        let Some(key) = self.key.clone() else {
            return Vec::new();
        };

        let record = PresenceRecord::offline(self.stamp(now_ms));
        let mut effects = vec![Effect::RegisterDisconnect { key, record }];
        effects.extend(self.start_heartbeat(now_ms));
        effects
    }

    // ── Heartbeat Driver ─────────────────────────────────────────

    /// (Re)arm the heartbeat and assert online immediately.
    pub fn start_heartbeat(&mut self, now_ms: i64) -> Vec<Effect> {
        let Some(key) = self.key.clone() else {
            return Vec::new();
        };
        self.phase = PresencePhase::Active;
        self.heartbeat_armed = true;
        vec![
            Effect::ArmHeartbeat {
                period: self.config.heartbeat_interval,
            },
            Effect::Write {
                key,
                record: PresenceRecord::online(self.stamp(now_ms)),
            },
        ]
    }

    /// Stop heartbeating and force the record offline. The timer is
    /// disarmed before the write so no late tick can follow it.
    pub fn set_offline(&mut self, now_ms: i64) -> Vec<Effect> {
        let Some(key) = self.key.clone() else {
            return Vec::new();
        };
        self.phase = PresencePhase::Suspended;
        let mut effects = Vec::with_capacity(2);
        if self.heartbeat_armed {
            self.heartbeat_armed = false;
            effects.push(Effect::DisarmHeartbeat);
        }
        effects.push(Effect::Write {
            key,
            record: PresenceRecord::offline(self.stamp(now_ms)),
        });
        effects
    }

    /// Single online assertion without touching the timer.
    pub fn set_online(&mut self, now_ms: i64) -> Vec<Effect> {
        let Some(key) = self.key.clone() else {
            return Vec::new();
        };
        vec![Effect::Write {
            key,
            record: PresenceRecord::online(self.stamp(now_ms)),
        }]
    }

    /// A heartbeat tick. Ignored if the heartbeat was disarmed meanwhile.
    pub fn heartbeat_tick(&mut self, now_ms: i64) -> Vec<Effect> {
        if !self.heartbeat_armed {
            return Vec::new();
        }
        self.set_online(now_ms)
    }

    pub fn apply(&mut self, action: DriverAction, now_ms: i64) -> Vec<Effect> {
        match action {
            DriverAction::StartHeartbeat => self.start_heartbeat(now_ms),
            DriverAction::SetOffline => self.set_offline(now_ms),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn phase(&self) -> PresencePhase {
        self.phase
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn presence_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.user.is_some()
    }

    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat_armed
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Monotonic `updated_at`: never earlier than the previous stamp.
    fn stamp(&mut self, now_ms: i64) -> i64 {
        self.last_stamp = self.last_stamp.max(now_ms);
        self.last_stamp
    }
}

impl Default for PresenceMachine {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Helpers ──────────────────────────────────────────────────

    fn uid(s: &str) -> Option<UserId> {
        UserId::new(s)
    }

    fn started(now: i64) -> PresenceMachine {
        let mut m = PresenceMachine::default();
        m.ensure_started(|| uid("u1"));
        m.connection_subscribed(ConnectionState::Reachable, now);
        m
    }

    fn writes(effects: &[Effect]) -> Vec<PresenceRecord> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Write { record, .. } => Some(*record),
                _ => None,
            })
            .collect()
    }

    // ── Bootstrap ────────────────────────────────────────────────

    #[test]
    fn absent_identity_schedules_one_retry() {
        let mut m = PresenceMachine::default();
        let effects = m.ensure_started(|| None);
        assert_eq!(
            effects,
            vec![Effect::ScheduleRetry {
                after: Duration::from_secs(1)
            }]
        );
        assert_eq!(m.phase(), PresencePhase::Initializing);
        assert!(m.retry_pending());

        // Second call while a retry is pending does not schedule another.
        assert!(m.ensure_started(|| None).is_empty());
    }

    #[test]
    fn retry_elapsed_reschedules_while_absent() {
        let mut m = PresenceMachine::default();
        m.ensure_started(|| None);
        let effects = m.retry_elapsed(|| None);
        assert!(matches!(effects.as_slice(), [Effect::ScheduleRetry { .. }]));
        assert!(m.retry_pending());
    }

    #[test]
    fn identity_found_cancels_pending_retry_and_subscribes() {
        let mut m = PresenceMachine::default();
        m.ensure_started(|| None);
        let effects = m.ensure_started(|| uid("u1"));
        assert_eq!(
            effects,
            vec![
                Effect::CancelRetry,
                Effect::SubscribeConnection {
                    key: ".info/connected".into()
                },
            ]
        );
        assert!(!m.retry_pending());
        assert!(m.is_initialized());
        assert_eq!(m.presence_key(), Some("presence/u1"));
    }

    #[test]
    fn ensure_started_is_idempotent_once_initialized() {
        let mut m = started(0);
        let mut resolver_called = false;
        let effects = m.ensure_started(
            || {
                resolver_called = true;
                uid("other")
            },
        );
        assert!(effects.is_empty());
        assert!(!resolver_called);
        assert_eq!(m.user().map(UserId::as_str), Some("u1"));
    }

    // ── Connection ───────────────────────────────────────────────

    #[test]
    fn reachable_registers_disconnect_before_heartbeat() {
        let mut m = PresenceMachine::default();
        m.ensure_started(|| uid("u1"));
        let effects = m.connection_subscribed(ConnectionState::Reachable, 100);
        assert_eq!(
            effects,
            vec![
                Effect::RegisterDisconnect {
                    key: "presence/u1".into(),
                    record: PresenceRecord::offline(100),
                },
                Effect::ArmHeartbeat {
                    period: Duration::from_secs(15)
                },
                Effect::Write {
                    key: "presence/u1".into(),
                    record: PresenceRecord::online(100),
                },
            ]
        );
        assert_eq!(m.phase(), PresencePhase::Active);
    }

    #[test]
    fn unreachable_at_subscribe_still_heartbeats() {
        let mut m = PresenceMachine::default();
        m.ensure_started(|| uid("u1"));
        let effects = m.connection_subscribed(ConnectionState::Unreachable, 0);
        assert!(matches!(
            effects.as_slice(),
            [Effect::ArmHeartbeat { .. }, Effect::Write { .. }]
        ));
        assert!(m.heartbeat_armed());
    }

    #[test]
    fn unreachable_change_is_noop() {
        let mut m = started(0);
        assert!(m.connection_changed(ConnectionState::Unreachable, 5).is_empty());
        assert_eq!(m.connection(), ConnectionState::Unreachable);
        assert!(m.heartbeat_armed());
    }

    #[test]
    fn every_reconnect_re_registers() {
        let mut m = started(0);
        m.connection_changed(ConnectionState::Unreachable, 10);
        let effects = m.connection_changed(ConnectionState::Reachable, 20);
        assert!(matches!(effects[0], Effect::RegisterDisconnect { .. }));

        // Coalesced drop/restore arrives as reachable again.
        let effects = m.connection_changed(ConnectionState::Reachable, 30);
        assert!(matches!(effects[0], Effect::RegisterDisconnect { .. }));
    }

    // ── Heartbeat Driver ─────────────────────────────────────────

    #[test]
    fn set_offline_disarms_before_write() {
        let mut m = started(0);
        let effects = m.set_offline(50);
        assert_eq!(
            effects,
            vec![
                Effect::DisarmHeartbeat,
                Effect::Write {
                    key: "presence/u1".into(),
                    record: PresenceRecord::offline(50),
                },
            ]
        );
        assert_eq!(m.phase(), PresencePhase::Suspended);
    }

    #[test]
    fn repeated_offline_writes_without_disarm() {
        let mut m = started(0);
        m.set_offline(10);
        let effects = m.set_offline(20);
        assert_eq!(writes(&effects), vec![PresenceRecord::offline(20)]);
        assert!(!effects.contains(&Effect::DisarmHeartbeat));
    }

    #[test]
    fn tick_after_offline_is_ignored() {
        let mut m = started(0);
        m.set_offline(10);
        assert!(m.heartbeat_tick(15_000).is_empty());
    }

    #[test]
    fn tick_while_active_writes_online() {
        let mut m = started(0);
        assert_eq!(
            writes(&m.heartbeat_tick(15_000)),
            vec![PresenceRecord::online(15_000)]
        );
    }

    #[test]
    fn driver_calls_before_init_are_noops() {
        let mut m = PresenceMachine::default();
        assert!(m.start_heartbeat(0).is_empty());
        assert!(m.set_offline(0).is_empty());
        assert!(m.set_online(0).is_empty());
        assert_eq!(m.phase(), PresencePhase::Uninitialized);
    }

    #[test]
    fn suspended_resumes_on_start() {
        let mut m = started(0);
        m.apply(DriverAction::SetOffline, 10);
        let effects = m.apply(DriverAction::StartHeartbeat, 20);
        assert_eq!(writes(&effects), vec![PresenceRecord::online(20)]);
        assert_eq!(m.phase(), PresencePhase::Active);
        assert!(m.heartbeat_armed());
    }

    #[test]
    fn stamps_never_go_backwards() {
        let mut m = started(1_000);
        let effects = m.set_offline(500);
        assert_eq!(writes(&effects), vec![PresenceRecord::offline(1_000)]);
        let effects = m.start_heartbeat(2_000);
        assert_eq!(writes(&effects), vec![PresenceRecord::online(2_000)]);
    }
}

//! Engine events and the listener registry.
//!
//! Handlers run synchronously on the emitting thread, after the engine has
//! released its internal locks. A panicking handler is logged and skipped;
//! the remaining handlers still run.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use paintnook_core::Action;
use serde_json::Value;

use crate::conflict::RejectReason;
use crate::error::TransportError;
use crate::lock;
use crate::session::{Participant, SessionInfo};

/// Event names, matching the strings hosts subscribe with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionCreated,
    SessionJoined,
    SessionDisconnected,
    ActionLocal,
    ActionReceived,
    ActionRejected,
    ActionInvalid,
    ActionAcknowledged,
    ActionRetry,
    ActionFailed,
    ParticipantJoined,
    ParticipantLeft,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::SessionCreated,
        EventKind::SessionJoined,
        EventKind::SessionDisconnected,
        EventKind::ActionLocal,
        EventKind::ActionReceived,
        EventKind::ActionRejected,
        EventKind::ActionInvalid,
        EventKind::ActionAcknowledged,
        EventKind::ActionRetry,
        EventKind::ActionFailed,
        EventKind::ParticipantJoined,
        EventKind::ParticipantLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionCreated => "session:created",
            EventKind::SessionJoined => "session:joined",
            EventKind::SessionDisconnected => "session:disconnected",
            EventKind::ActionLocal => "action:local",
            EventKind::ActionReceived => "action:received",
            EventKind::ActionRejected => "action:rejected",
            EventKind::ActionInvalid => "action:invalid",
            EventKind::ActionAcknowledged => "action:acknowledged",
            EventKind::ActionRetry => "action:retry",
            EventKind::ActionFailed => "action:failed",
            EventKind::ParticipantJoined => "participant:joined",
            EventKind::ParticipantLeft => "participant:left",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Hosted a new session
    SessionCreated(SessionInfo),
    /// Joined a session as a client
    SessionJoined {
        session_id: String,
        participant: Participant,
    },
    SessionDisconnected,
    /// Local action applied optimistically, before delivery
    ActionLocal(Action),
    /// Remote action passed validation, dedup and conflict resolution
    ActionReceived(Action),
    ActionRejected {
        action: Action,
        reason: RejectReason,
    },
    /// Remote input that failed to decode or validate. `raw` is the input as
    /// received (a JSON string when it was not valid JSON).
    ActionInvalid {
        raw: Value,
        reason: String,
    },
    /// Transport accepted the action
    ActionAcknowledged(Action),
    ActionRetry {
        action: Action,
        attempt: u32,
        delay: Duration,
    },
    /// Retries exhausted; the action will not be resent
    ActionFailed {
        action: Action,
        error: TransportError,
        attempts: u32,
    },
    ParticipantJoined(Participant),
    ParticipantLeft {
        id: String,
        participant: Option<Participant>,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::SessionCreated(_) => EventKind::SessionCreated,
            SyncEvent::SessionJoined { .. } => EventKind::SessionJoined,
            SyncEvent::SessionDisconnected => EventKind::SessionDisconnected,
            SyncEvent::ActionLocal(_) => EventKind::ActionLocal,
            SyncEvent::ActionReceived(_) => EventKind::ActionReceived,
            SyncEvent::ActionRejected { .. } => EventKind::ActionRejected,
            SyncEvent::ActionInvalid { .. } => EventKind::ActionInvalid,
            SyncEvent::ActionAcknowledged(_) => EventKind::ActionAcknowledged,
            SyncEvent::ActionRetry { .. } => EventKind::ActionRetry,
            SyncEvent::ActionFailed { .. } => EventKind::ActionFailed,
            SyncEvent::ParticipantJoined(_) => EventKind::ParticipantJoined,
            SyncEvent::ParticipantLeft { .. } => EventKind::ParticipantLeft,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

/// Listener registry keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.subscriptions);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.subscriptions).iter().filter(|s| s.kind == kind).count()
    }

    pub fn clear(&self) {
        lock(&self.subscriptions).clear();
    }

    /// Deliver `event` to every handler subscribed to its kind.
    pub fn emit(&self, event: &SyncEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Event handler for {} panicked: {}", kind, msg);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &lock(&self.subscriptions).len())
            .finish()
    }
}

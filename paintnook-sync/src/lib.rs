//! # paintnook-sync: Session and action synchronization for PaintNook
//!
//! Delivers local drawing actions to peers and gates incoming ones. The peer
//! transport is supplied by the host application.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   send_action    ┌─────────────┐   flush   ┌───────────┐
//!  │ Tool / host  │ ───────────────► │ ActionQueue │ ────────► │ Transport │
//!  │ application  │                  │ (batching)  │  + retry  │ (seam)    │
//!  └──────▲───────┘                  └─────────────┘           └─────┬─────┘
//!         │ SyncEvent                                                │ peers
//!  ┌──────┴───────┐  handle_remote   ┌──────────────────┐            │
//!  │  EventBus    │ ◄─────────────── │ ConflictResolver │ ◄──────────┘
//!  │ (listeners)  │                  │ (ledger+strategy)│
//!  └──────────────┘                  └──────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! - [`config`]: retry, batching, priority and heartbeat settings
//! - [`events`]: event kinds, payloads and the listener registry
//! - [`transport`]: the `Transport` trait and an in-memory channel transport
//! - [`queue`]: size/latency bounded outbound batching
//! - [`conflict`]: conflict keys, strategies and the resolver ledger
//! - [`session`]: participants, session info, ids and password hashing
//! - [`engine`]: the `SyncEngine` tying it together
//!
//! ## Defaults
//!
//! | Setting | Value |
//! |---------|-------|
//! | Retry | 5 attempts, 1 s base, ×2, 30 s cap, ±10% jitter |
//! | Batch | 50 actions / 16 ms / 100 ms latency ceiling |
//! | Conflict window | 500 ms, host-override |
//! | Heartbeat | every 5 s, 15 s timeout |

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod session;
pub mod transport;

use std::sync::{Mutex, MutexGuard};

// Re-exports for convenience
pub use config::{BatchConfig, HeartbeatConfig, PriorityConfig, RetryConfig, SyncConfig};
pub use conflict::{
    conflict_key, ConflictResolver, ConflictStrategy, Crdt, HostOverride, LastWriteWins,
    LedgerEntry, MergeStrategy, RejectReason, Resolution,
};
pub use engine::{RemoteInput, RemoteOutcome, SyncEngine};
pub use error::{QueueError, SyncError, TransportError};
pub use events::{EventBus, EventKind, SubscriptionId, SyncEvent};
pub use queue::ActionQueue;
pub use session::{hash_password, Participant, Role, SessionInfo, SessionOptions};
pub use transport::{ChannelTransport, Frame, Transport};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

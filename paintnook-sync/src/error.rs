//! Error types for the sync layer.

use thiserror::Error;

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("no transport attached")]
    Unavailable,
    #[error("transport timed out")]
    Timeout,
    #[error("send failed: {0}")]
    Send(String),
}

/// Failure while handing a batch to the queue's flush callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("flush failed: {0}")]
    Flush(String),
}

/// Caller-facing errors from [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not connected to a session")]
    NotConnected,
    #[error("no transport available")]
    TransportUnavailable,
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

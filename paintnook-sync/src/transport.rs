//! Peer transport seam.
//!
//! The engine never dials, signals or relays; it hands outbound actions to a
//! [`Transport`] and is fed inbound actions by the host application through
//! [`SyncEngine::handle_remote_action`](crate::SyncEngine::handle_remote_action).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use paintnook_core::{Action, CodecError};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound side of a peer connection.
pub trait Transport: Send + Sync {
    fn send(&self, action: Action) -> BoxFuture<'static, Result<(), TransportError>>;

    fn close(&self) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Liveness probe. Transports without a keep-alive succeed trivially.
    fn heartbeat(&self, timestamp: u64) -> BoxFuture<'static, Result<(), TransportError>> {
        let _ = timestamp;
        future::ready(Ok(())).boxed()
    }
}

/// One message on an in-memory link.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Action(Action),
    Heartbeat { timestamp: u64 },
}

impl Frame {
    pub fn to_value(&self) -> Result<Value, CodecError> {
        Ok(match self {
            Frame::Action(action) => action.to_value()?,
            Frame::Heartbeat { timestamp } => json!({ "type": "heartbeat", "timestamp": timestamp }),
        })
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    /// Decode a JSON frame. Anything that is not a heartbeat must be a
    /// valid action.
    pub fn decode(raw: &str) -> Result<Frame, CodecError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("type").and_then(Value::as_str) == Some("heartbeat") {
            let timestamp = value.get("timestamp").and_then(Value::as_u64).unwrap_or(0);
            return Ok(Frame::Heartbeat { timestamp });
        }
        Ok(Frame::Action(Action::from_value(value)?))
    }
}

/// [`Transport`] over a bounded tokio channel.
///
/// Used for loopback wiring between engines in one process: the receiving
/// half is drained by whoever relays frames to the other engine.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    fn push(&self, frame: Frame) -> BoxFuture<'static, Result<(), TransportError>> {
        if self.is_closed() {
            return future::ready(Err(TransportError::Closed)).boxed();
        }
        let tx = self.tx.clone();
        async move { tx.send(frame).await.map_err(|_| TransportError::Closed) }.boxed()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, action: Action) -> BoxFuture<'static, Result<(), TransportError>> {
        self.push(Frame::Action(action))
    }

    fn close(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        self.closed.store(true, Ordering::Release);
        future::ready(Ok(())).boxed()
    }

    fn heartbeat(&self, timestamp: u64) -> BoxFuture<'static, Result<(), TransportError>> {
        self.push(Frame::Heartbeat { timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paintnook_core::{ActionPayload, EraseData, Point};

    fn erase() -> Action {
        Action::new("layer-1", ActionPayload::Erase(EraseData::new(vec![Point::new(0.5, 0.5)])))
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (transport, mut rx) = ChannelTransport::new(8);
        let a = erase();
        let b = erase();
        transport.send(a.clone()).await.unwrap();
        transport.heartbeat(42).await.unwrap();
        transport.send(b.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Action(a)));
        assert_eq!(rx.recv().await, Some(Frame::Heartbeat { timestamp: 42 }));
        assert_eq!(rx.recv().await, Some(Frame::Action(b)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _rx) = ChannelTransport::new(8);
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert_eq!(transport.send(erase()).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (transport, rx) = ChannelTransport::new(8);
        drop(rx);
        assert_eq!(transport.send(erase()).await, Err(TransportError::Closed));
    }

    #[test]
    fn test_frame_json() {
        let hb = Frame::Heartbeat { timestamp: 7 }.encode().unwrap();
        assert_eq!(Frame::decode(&hb).unwrap(), Frame::Heartbeat { timestamp: 7 });

        let action = erase();
        let encoded = Frame::Action(action.clone()).encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), Frame::Action(action));

        assert!(Frame::decode(r#"{"type":"teleport","id":"x"}"#).is_err());
    }
}

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::error::Elapsed;

use crate::event::Event;

/// Errors surfaced by a [`Connection`].
///
/// `Closed` is the normal, expected termination signal for a participant's
/// pumps, not an exceptional condition. Anything transport-specific is
/// carried opaquely in `Transport`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection reached terminal state.
    #[error("connection closed")]
    Closed,

    /// Opaque transport or serialization failure from an adapter.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Transport-agnostic duplex event channel between the hub and one
/// participant.
///
/// Concrete adapters (WebSocket, gRPC, in-memory) implement this; the hub
/// consumes it and only calls [`close`](Connection::close) during teardown.
/// All operations must fail cleanly, never panic, after the connection is
/// closed.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Sends an event to the remote side.
    async fn send_event(&self, event: Event) -> Result<(), ConnectionError>;

    /// Waits for the next inbound event.
    async fn read_event(&self) -> Result<Event, ConnectionError>;

    /// Closes the connection, recording the terminal reason.
    ///
    /// Returns [`ConnectionError::Closed`] when already closed.
    async fn close(&self, reason: Option<ConnectionError>) -> Result<(), ConnectionError>;

    /// Whether the connection reached terminal state.
    fn closed(&self) -> bool;

    /// The reason the connection closed with, if any.
    fn err(&self) -> Option<ConnectionError>;

    /// Suspends until the connection reaches terminal state, returning the
    /// recorded reason. Transport adapters use this to know when to return.
    async fn wait(&self) -> Option<ConnectionError>;

    /// [`wait`](Connection::wait) with a deadline.
    async fn wait_timeout(&self, limit: Duration) -> Result<Option<ConnectionError>, Elapsed> {
        tokio::time::timeout(limit, self.wait()).await
    }
}

/// `None` while open, `Some(reason)` once closed.
type ClosedState = Option<Option<ConnectionError>>;

/// In-memory [`Connection`] over a pair of unbounded channels.
///
/// Used by tests and in-process frontends; [`pair`](ChannelConnection::pair)
/// yields two cross-wired endpoints.
pub struct ChannelConnection {
    event_in: Mutex<mpsc::UnboundedReceiver<Event>>,
    event_out: mpsc::UnboundedSender<Event>,
    closed_tx: watch::Sender<ClosedState>,
}

impl ChannelConnection {
    pub fn new(
        event_in: mpsc::UnboundedReceiver<Event>,
        event_out: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            event_in: Mutex::new(event_in),
            event_out,
            closed_tx,
        }
    }

    /// Creates two endpoints where each side reads what the other sends.
    pub fn pair() -> (ChannelConnection, ChannelConnection) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            ChannelConnection::new(left_rx, left_tx),
            ChannelConnection::new(right_rx, right_tx),
        )
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send_event(&self, event: Event) -> Result<(), ConnectionError> {
        if self.closed() {
            return Err(ConnectionError::Closed);
        }
        self.event_out
            .send(event)
            .map_err(|_| ConnectionError::Closed)
    }

    async fn read_event(&self) -> Result<Event, ConnectionError> {
        let mut closed_rx = self.closed_tx.subscribe();
        let mut event_in = self.event_in.lock().await;
        tokio::select! {
            _ = closed_rx.wait_for(|state| state.is_some()) => Err(ConnectionError::Closed),
            event = event_in.recv() => event.ok_or(ConnectionError::Closed),
        }
    }

    async fn close(&self, reason: Option<ConnectionError>) -> Result<(), ConnectionError> {
        let mut reason = Some(reason);
        let modified = self.closed_tx.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(reason.take().flatten());
                true
            }
        });
        if modified {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }

    fn closed(&self) -> bool {
        self.closed_tx.borrow().is_some()
    }

    fn err(&self) -> Option<ConnectionError> {
        self.closed_tx.borrow().clone().flatten()
    }

    async fn wait(&self) -> Option<ConnectionError> {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so wait_for cannot fail.
        let reason = match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => state.clone().flatten(),
            Err(_) => self.err(),
        };
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::time::timeout;

    fn enter_event(name: &str) -> Event {
        Event::UserEnter {
            time: Utc::now(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_pair_exchanges_events() {
        let (left, right) = ChannelConnection::pair();

        left.send_event(enter_event("u1")).await.unwrap();
        let received = right.read_event().await.unwrap();
        assert!(matches!(received, Event::UserEnter { ref name, .. } if name == "u1"));

        right.send_event(enter_event("u2")).await.unwrap();
        let received = left.read_event().await.unwrap();
        assert!(matches!(received, Event::UserEnter { ref name, .. } if name == "u2"));
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let (left, _right) = ChannelConnection::pair();

        assert!(!left.closed());
        left.close(None).await.unwrap();
        assert!(left.closed());
        assert_eq!(left.close(None).await, Err(ConnectionError::Closed));

        assert_eq!(left.send_event(enter_event("u1")).await, Err(ConnectionError::Closed));
        assert_eq!(left.read_event().await, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_close_records_reason() {
        let (left, _right) = ChannelConnection::pair();
        let reason = ConnectionError::Transport("io failure".into());

        left.close(Some(reason.clone())).await.unwrap();
        assert_eq!(left.err(), Some(reason.clone()));
        assert_eq!(left.wait().await, Some(reason));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (left, right) = ChannelConnection::pair();
        let left = std::sync::Arc::new(left);

        let reader = {
            let left = std::sync::Arc::clone(&left);
            tokio::spawn(async move { left.read_event().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        left.close(None).await.unwrap();

        let result = timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(ConnectionError::Closed));
        drop(right);
    }

    #[tokio::test]
    async fn test_wait_timeout_elapses_while_open() {
        let (left, _right) = ChannelConnection::pair();
        assert!(left.wait_timeout(Duration::from_millis(20)).await.is_err());
    }

    #[tokio::test]
    async fn test_read_fails_when_peer_dropped() {
        let (left, right) = ChannelConnection::pair();
        drop(right);
        assert_eq!(left.read_event().await, Err(ConnectionError::Closed));
    }
}

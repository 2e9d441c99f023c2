use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};

/// Errors returned by [`EventQueue`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue no longer accepts new items.
    #[error("queue closed")]
    Closed,

    /// The queue is closed and every buffered item has been read.
    #[error("queue closed and empty")]
    Drained,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Closable, unbounded FIFO decoupling event producers from a single
/// consuming task.
///
/// Closing stops new `add`s but keeps buffered items readable, so a
/// disconnect does not discard events enqueued moments earlier. The
/// [`drained`](EventQueue::drained) signal fires once the queue is both
/// closed and empty, which is the point where teardown is safe.
///
/// Multiple producers may `add` concurrently; `read` assumes a single
/// consumer.
pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
    readable: Notify,
    drained_tx: watch::Sender<bool>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        let (drained_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            drained_tx,
        }
    }

    /// Appends an item to the tail, waking a blocked reader if present.
    ///
    /// Returns [`QueueError::Closed`] when the queue was already closed; the
    /// caller must treat that as "recipient unreachable".
    pub async fn add(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.items.push_back(item);
        drop(state);
        self.readable.notify_one();
        Ok(())
    }

    /// Removes and returns the head item, FIFO ordered.
    ///
    /// Suspends while the queue is empty and open. Once closed, buffered
    /// items keep coming out in order until [`QueueError::Drained`] reports
    /// closed-and-empty.
    pub async fn read(&self) -> Result<T, QueueError> {
        loop {
            // Created before the state check so a wakeup between check and
            // await is not lost (notify_one stores a permit).
            let notified = self.readable.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    if state.closed && state.items.is_empty() {
                        self.drained_tx.send_replace(true);
                    }
                    return Ok(item);
                }
                if state.closed {
                    self.drained_tx.send_replace(true);
                    return Err(QueueError::Drained);
                }
            }
            notified.await;
        }
    }

    /// Marks the queue non-acceptive of new items. Idempotent.
    ///
    /// Buffered items stay readable; see [`read`](EventQueue::read).
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        if state.items.is_empty() {
            self.drained_tx.send_replace(true);
        }
        drop(state);
        // Wake a reader blocked on an empty queue so it observes the close.
        self.readable.notify_one();
    }

    /// Resolves once the queue is closed and holds no buffered items.
    pub async fn drained(&self) {
        let mut rx = self.drained_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.add(1).await.unwrap();
        queue.add(2).await.unwrap();
        queue.add(3).await.unwrap();

        assert_eq!(queue.read().await.unwrap(), 1);
        assert_eq!(queue.read().await.unwrap(), 2);
        assert_eq!(queue.read().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_blocks_until_add() {
        let queue = Arc::new(EventQueue::new());

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.read().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add(7).await.unwrap();

        let item = timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_add_after_close_fails() {
        let queue = EventQueue::new();
        queue.close().await;
        assert_eq!(queue.add(1).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_drains_buffered_items_after_close() {
        let queue = EventQueue::new();
        queue.add(1).await.unwrap();
        queue.add(2).await.unwrap();
        queue.close().await;

        assert_eq!(queue.read().await.unwrap(), 1);
        assert_eq!(queue.read().await.unwrap(), 2);
        assert_eq!(queue.read().await, Err(QueueError::Drained));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_reader() {
        let queue = Arc::new(EventQueue::<i32>::new());

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.read().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close().await;

        let result = timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(QueueError::Drained));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue = EventQueue::<i32>::new();
        queue.close().await;
        queue.close().await;
        assert_eq!(queue.add(1).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_drained_fires_when_closed_empty() {
        let queue = EventQueue::<i32>::new();
        queue.close().await;
        timeout(Duration::from_secs(1), queue.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drained_waits_for_buffered_items() {
        let queue = Arc::new(EventQueue::new());
        queue.add(1).await.unwrap();
        queue.close().await;

        // Still one buffered item, so the signal must not have fired.
        assert!(timeout(Duration::from_millis(50), queue.drained())
            .await
            .is_err());

        assert_eq!(queue.read().await.unwrap(), 1);
        timeout(Duration::from_secs(1), queue.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drained_never_fires_while_open() {
        let queue = EventQueue::<i32>::new();
        assert!(timeout(Duration::from_millis(50), queue.drained())
            .await
            .is_err());
    }
}

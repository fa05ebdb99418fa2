//! Bidirectional envelope channel
//!
//! A [`Channel`] is one endpoint of an in-process duplex pipe carrying
//! decoded envelopes. The broker's peer actors and the transport bridges
//! both speak this type, which keeps the broker decoupled from any concrete
//! transport and lets tests drive peers without sockets.
//!
//! Delivery is in send order per direction. Closing either endpoint closes
//! the pair; queued envelopes are still drained before `recv` reports the
//! close, so a best-effort farewell message sent just before `close` is
//! observable on the other side.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

use crate::{Envelope, ProtocolError, Result};

/// One endpoint of a duplex envelope channel
#[derive(Debug)]
pub struct Channel {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Channel {
    /// Create a connected pair of endpoints with the given buffer capacity
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let (close_tx, _) = watch::channel(false);
        let closed = Arc::new(close_tx);
        let a = Self { tx: a_tx, rx: Mutex::new(a_rx), closed: Arc::clone(&closed) };
        let b = Self { tx: b_tx, rx: Mutex::new(b_rx), closed };
        (a, b)
    }

    /// Send an envelope to the other endpoint
    ///
    /// On a closed channel this is a no-op error, never a panic.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ChannelClosed);
        }
        self.tx.send(envelope).await.map_err(|_| ProtocolError::ChannelClosed)
    }

    /// Receive the next envelope, `None` once the channel is closed
    ///
    /// Envelopes already queued at close time are drained first.
    pub async fn recv(&self) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        let mut closed = self.closed.subscribe();
        tokio::select! {
            // Drain queued envelopes before honoring the close flag.
            biased;
            msg = rx.recv() => match msg {
                Some(envelope) => Some(envelope),
                None => {
                    // Other endpoint dropped its sender.
                    self.close();
                    None
                }
            },
            _ = closed.wait_for(|c| *c) => None,
        }
    }

    /// Close the channel; idempotent, affects both endpoints
    pub fn close(&self) {
        let _ = self.closed.send_replace(true);
    }

    /// Whether the channel has been closed by either endpoint
    pub fn is_closed(&self) -> bool {
        *self.closed.subscribe().borrow()
    }

    /// Wait until the channel is closed
    ///
    /// Resolves immediately when the channel is already closed; each waiter
    /// observes the close exactly once.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // Err means the watch sender dropped, which also only happens on teardown.
        let _ = rx.wait_for(|c| *c).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delivers_in_send_order() {
        let (a, b) = Channel::pair(8);
        a.send(Envelope::error("first")).await.unwrap();
        a.send(Envelope::error("second")).await.unwrap();

        assert_eq!(b.recv().await, Some(Envelope::error("first")));
        assert_eq!(b.recv().await, Some(Envelope::error("second")));
    }

    #[tokio::test]
    async fn test_send_after_close_errors() {
        let (a, b) = Channel::pair(8);
        b.close();
        let err = a.send(Envelope::error("late")).await.unwrap_err();
        assert_eq!(err, ProtocolError::ChannelClosed);
    }

    #[tokio::test]
    async fn test_recv_drains_before_close() {
        let (a, b) = Channel::pair(8);
        a.send(Envelope::error("farewell")).await.unwrap();
        a.close();

        assert_eq!(b.recv().await, Some(Envelope::error("farewell")));
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, b) = Channel::pair(8);
        a.close();
        a.close();
        b.close();
        assert!(a.is_closed());
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_resolves_for_late_waiter() {
        let (a, _b) = Channel::pair(8);
        a.close();
        // Must not hang even though close happened before the wait.
        tokio::time::timeout(Duration::from_secs(1), a.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_closes_pair() {
        let (a, b) = Channel::pair(8);
        drop(a);
        assert_eq!(b.recv().await, None);
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_closed_fires_on_peer_close() {
        let (a, b) = Channel::pair(8);
        let waiter = tokio::spawn(async move { a.closed().await });
        b.close();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}

//! Message relay
//!
//! Owns the table of outbound requests awaiting a reply and performs
//! broadcast fan-out. Correlation ids are broker-chosen 24-character
//! strings, so relayed requests never collide regardless of what ids the
//! originating clients picked.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::peer::Peer;
use confab_auth::secure_id;
use confab_protocol::{Envelope, MessageId};

/// How long a relayed request may stay unanswered
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Relay failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// No reply arrived within [`REQUEST_TIMEOUT`]
    #[error("request timed out")]
    RequestTimeout,

    /// The target peer's channel is closed
    #[error("peer channel is closed")]
    ChannelClosed,

    /// The target peer answered with an error
    #[error("{0}")]
    Remote(String),
}

#[derive(Debug)]
struct Pending {
    /// Peer the request was sent to, for drain on disconnect
    target: String,
    settle: oneshot::Sender<Result<Value, RelayError>>,
}

/// Routes requests, responses, and broadcasts between peers
#[derive(Clone, Default)]
pub struct Relay {
    pending: Arc<DashMap<String, Pending>>,
}

impl Relay {
    /// Create a relay with an empty pending table
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a request to `target` and return a handle for the reply
    ///
    /// Allocates a fresh correlation id, records the pending entry, and
    /// writes the request on the target's channel. Fails immediately when
    /// the channel is closed. Await the returned [`PendingReply`] for the
    /// outcome; dropping it withdraws the entry.
    pub async fn send_request(
        &self,
        target: &Peer,
        method: &str,
        params: Vec<Value>,
    ) -> Result<PendingReply, RelayError> {
        if target.channel().is_closed() {
            return Err(RelayError::ChannelClosed);
        }

        let correlation = secure_id();
        let (settle, rx) = oneshot::channel();
        self.pending.insert(
            correlation.clone(),
            Pending { target: target.id().to_string(), settle },
        );

        let request = Envelope::request(MessageId::String(correlation.clone()), method, params);
        if target.send(request).await.is_err() {
            self.pending.remove(&correlation);
            return Err(RelayError::ChannelClosed);
        }

        Ok(PendingReply { relay: self.clone(), correlation, rx })
    }

    /// Settle the pending entry for a response or response-error
    ///
    /// Unknown ids are dropped silently: the entry may have timed out, been
    /// drained, or already been settled by an earlier reply.
    pub fn push_response(&self, id: &MessageId, outcome: Result<Value, String>) {
        let MessageId::String(correlation) = id else {
            debug!(%id, "dropping reply with non-relay id");
            return;
        };
        let Some((_, entry)) = self.pending.remove(correlation) else {
            debug!(%correlation, "dropping reply with no pending request");
            return;
        };
        let _ = entry.settle.send(outcome.map_err(RelayError::Remote));
    }

    /// Deliver a notification once; no correlation, no retry
    pub async fn send_notification(&self, target: &Peer, envelope: Envelope) -> Result<(), RelayError> {
        target.send(envelope).await.map_err(|_| RelayError::ChannelClosed)
    }

    /// Fan a broadcast out to every peer in `peers` except the origin
    ///
    /// Stamps the envelope's `clientId` with the origin peer id and
    /// delivers in list order. Closed member channels are skipped.
    pub async fn broadcast(&self, peers: &[Arc<Peer>], origin: &str, mut envelope: Envelope) {
        if let Envelope::Broadcast { client_id, .. } = &mut envelope {
            *client_id = origin.to_string();
        }
        for peer in peers {
            if peer.id() == origin {
                continue;
            }
            if peer.send(envelope.clone()).await.is_err() {
                debug!(peer = %peer.id(), "skipping broadcast to closed channel");
            }
        }
    }

    /// Reject every pending request targeting `peer_id`
    ///
    /// Called when a peer leaves its room or the room closes, so waiters do
    /// not sit out the full request timeout against a dead channel.
    pub fn drain_peer(&self, peer_id: &str) {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().target == peer_id)
            .map(|entry| entry.key().clone())
            .collect();
        for correlation in stale {
            if let Some((_, entry)) = self.pending.remove(&correlation) {
                let _ = entry.settle.send(Err(RelayError::ChannelClosed));
            }
        }
    }

    /// Number of requests currently awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay").field("pending", &self.pending.len()).finish()
    }
}

/// Handle for one outstanding relayed request
///
/// Exactly one of reply, error reply, or timeout settles it; the pending
/// entry is gone afterwards in every case.
#[derive(Debug)]
pub struct PendingReply {
    relay: Relay,
    correlation: String,
    rx: oneshot::Receiver<Result<Value, RelayError>>,
}

impl PendingReply {
    /// Correlation id assigned to the relayed request
    pub fn correlation(&self) -> &str {
        &self.correlation
    }

    /// Wait for the reply, at most [`REQUEST_TIMEOUT`]
    pub async fn wait(mut self) -> Result<Value, RelayError> {
        match tokio::time::timeout(REQUEST_TIMEOUT, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Entry vanished without settling; the channel is gone.
            Ok(Err(_)) => Err(RelayError::ChannelClosed),
            Err(_) => Err(RelayError::RequestTimeout),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // No-op when the entry was already settled or drained.
        self.relay.pending.remove(&self.correlation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_auth::User;
    use confab_protocol::Channel;
    use serde_json::json;

    fn user(name: &str) -> User {
        User { id: secure_id(), name: name.to_string(), email: None }
    }

    fn peer(name: &str) -> (Arc<Peer>, Channel) {
        let (local, remote) = Channel::pair(16);
        (Peer::new(user(name), local), remote)
    }

    async fn read_request(remote: &Channel) -> (MessageId, String, Vec<Value>) {
        match remote.recv().await.expect("request frame") {
            Envelope::Request { id, method, params, .. } => (id, method, params),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_correlates_response() {
        let relay = Relay::new();
        let (host, host_remote) = peer("host");

        let reply = relay.send_request(&host, "peer/join", vec![json!({"name": "Bob"})]).await.unwrap();
        assert_eq!(relay.pending_count(), 1);

        let (id, method, params) = read_request(&host_remote).await;
        assert_eq!(method, "peer/join");
        assert_eq!(params, vec![json!({"name": "Bob"})]);

        relay.push_response(&id, Ok(json!(true)));
        assert_eq!(reply.wait().await.unwrap(), json!(true));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_error_settles_with_remote_error() {
        let relay = Relay::new();
        let (host, host_remote) = peer("host");

        let reply = relay.send_request(&host, "peer/init", vec![]).await.unwrap();
        let (id, _, _) = read_request(&host_remote).await;
        relay.push_response(&id, Err("not ready".to_string()));

        assert_eq!(reply.wait().await.unwrap_err(), RelayError::Remote("not ready".into()));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let relay = Relay::new();
        let (host, _host_remote) = peer("host");

        let reply = relay.send_request(&host, "peer/init", vec![]).await.unwrap();
        assert_eq!(reply.wait().await.unwrap_err(), RelayError::RequestTimeout);
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_dropped_silently() {
        let relay = Relay::new();
        let (host, host_remote) = peer("host");

        let reply = relay.send_request(&host, "peer/init", vec![]).await.unwrap();
        let (id, _, _) = read_request(&host_remote).await;
        reply.wait().await.unwrap_err();

        // Entry is gone; the late reply must vanish without effect.
        relay.push_response(&id, Ok(json!("late")));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_target_rejected_immediately() {
        let relay = Relay::new();
        let (host, host_remote) = peer("host");
        host_remote.close();

        let err = relay.send_request(&host, "peer/init", vec![]).await.unwrap_err();
        assert_eq!(err, RelayError::ChannelClosed);
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_peer_rejects_pending() {
        let relay = Relay::new();
        let (host, _host_remote) = peer("host");

        let reply = relay.send_request(&host, "peer/init", vec![]).await.unwrap();
        relay.drain_peer(host.id());

        assert_eq!(reply.wait().await.unwrap_err(), RelayError::ChannelClosed);
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_origin_and_stamps_id() {
        let relay = Relay::new();
        let (host, host_remote) = peer("host");
        let (bob, bob_remote) = peer("bob");
        let (carol, carol_remote) = peer("carol");
        let peers = vec![Arc::clone(&host), Arc::clone(&bob), Arc::clone(&carol)];

        let envelope = Envelope::broadcast("spoofed", "editor/update", vec![json!("delta")]);
        relay.broadcast(&peers, bob.id(), envelope).await;

        for remote in [&host_remote, &carol_remote] {
            match remote.recv().await.unwrap() {
                Envelope::Broadcast { client_id, method, .. } => {
                    assert_eq!(client_id, bob.id());
                    assert_eq!(method, "editor/update");
                }
                other => panic!("expected broadcast, got {:?}", other),
            }
        }
        // Origin must not see its own broadcast.
        bob_remote.close();
        assert_eq!(bob_remote.recv().await, None);
    }
}

//! Peer actor
//!
//! One [`Peer`] per accepted connection, one task per peer consuming its
//! channel in arrival order. The task classifies each inbound envelope and
//! hands it to the relay; replies to relayed requests are awaited on a
//! spawned waiter so a slow host never stalls the origin's inbound stream.

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::relay::Relay;
use crate::room::RoomManager;
use confab_auth::{secure_id, User};
use confab_protocol::methods::PeerInfo;
use confab_protocol::{Channel, Envelope, MessageId};

/// A live participant in one room
#[derive(Debug)]
pub struct Peer {
    id: String,
    user: User,
    channel: Channel,
}

impl Peer {
    /// Wrap a channel into a peer with a fresh connection-scoped id
    pub fn new(user: User, channel: Channel) -> Arc<Self> {
        Arc::new(Self { id: secure_id(), user, channel })
    }

    /// Connection-scoped peer id, distinct from the user id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity this peer connected with
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Underlying envelope channel
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Write an envelope to this peer
    pub async fn send(&self, envelope: Envelope) -> confab_protocol::Result<()> {
        self.channel.send(envelope).await
    }

    /// Public projection advertised to other peers
    ///
    /// Exposes the peer id and display fields only; the user's broker-side
    /// id stays private.
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            name: self.user.name.clone(),
            email: self.user.email.clone(),
        }
    }
}

/// Run a peer's inbound loop until its channel closes
pub fn spawn(peer: Arc<Peer>, rooms: RoomManager, relay: Relay) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = peer.channel().recv().await {
            dispatch(&peer, &rooms, &relay, envelope).await;
        }
        debug!(peer = %peer.id(), "peer channel closed");
    })
}

async fn dispatch(peer: &Arc<Peer>, rooms: &RoomManager, relay: &Relay, envelope: Envelope) {
    match envelope {
        Envelope::Response { id, response, .. } => relay.push_response(&id, Ok(response)),
        Envelope::ResponseError { id, message, .. } => relay.push_response(&id, Err(message)),
        Envelope::Request { id, method, params, .. } => {
            relay_request(peer, rooms, relay, id, method, params).await;
        }
        Envelope::Notification { method, params, .. } => {
            relay_notification(peer, rooms, relay, method, params).await;
        }
        Envelope::Broadcast { method, params, .. } => {
            relay_broadcast(peer, rooms, relay, method, params).await;
        }
        Envelope::Error { message, .. } => {
            warn!(peer = %peer.id(), %message, "error envelope from peer");
        }
    }
}

/// Forward a request to the origin's room host and reply with the outcome
async fn relay_request(
    peer: &Arc<Peer>,
    rooms: &RoomManager,
    relay: &Relay,
    id: MessageId,
    method: String,
    params: Vec<Value>,
) {
    let Some(room) = rooms.room_of(peer.id()) else {
        respond_error(peer, id, BrokerError::NoRoom.to_string()).await;
        return;
    };

    match relay.send_request(&room.host(), &method, params).await {
        Ok(reply) => {
            // The reply is awaited off the inbound loop so later messages
            // from this peer are not held up behind a slow host.
            let origin = Arc::clone(peer);
            tokio::spawn(async move {
                tokio::select! {
                    outcome = reply.wait() => {
                        let envelope = match outcome {
                            Ok(value) => Envelope::response(id, value),
                            Err(err) => Envelope::response_error(id, err.to_string()),
                        };
                        let _ = origin.send(envelope).await;
                    }
                    // Origin gone; dropping the reply withdraws the
                    // pending entry instead of letting it ride out the
                    // full request timeout.
                    _ = origin.channel().closed() => {}
                }
            });
        }
        Err(err) => respond_error(peer, id, err.to_string()).await,
    }
}

/// Forward a notification to the origin's room host
async fn relay_notification(
    peer: &Arc<Peer>,
    rooms: &RoomManager,
    relay: &Relay,
    method: String,
    params: Vec<Value>,
) {
    let Some(room) = rooms.room_of(peer.id()) else {
        debug!(peer = %peer.id(), %method, "dropping notification from roomless peer");
        return;
    };
    let envelope = Envelope::notification(method, params);
    if relay.send_notification(&room.host(), envelope).await.is_err() {
        debug!(peer = %peer.id(), "host channel closed during notification");
    }
}

/// Fan a broadcast out to the rest of the origin's room
async fn relay_broadcast(
    peer: &Arc<Peer>,
    rooms: &RoomManager,
    relay: &Relay,
    method: String,
    params: Vec<Value>,
) {
    let Some(room) = rooms.room_of(peer.id()) else {
        debug!(peer = %peer.id(), %method, "dropping broadcast from roomless peer");
        return;
    };
    let envelope = Envelope::broadcast(peer.id(), method, params);
    relay.broadcast(&room.peers(), peer.id(), envelope).await;
}

async fn respond_error(peer: &Arc<Peer>, id: MessageId, message: impl Into<String>) {
    let _ = peer.send(Envelope::response_error(id, message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hides_user_id() {
        let (local, _remote) = Channel::pair(4);
        let user = User {
            id: "server-side".into(),
            name: "Alice".into(),
            email: Some("alice@example.com".into()),
        };
        let peer = Peer::new(user, local);

        let info = peer.info();
        assert_eq!(info.id, peer.id());
        assert_eq!(info.name, "Alice");
        assert_eq!(info.email.as_deref(), Some("alice@example.com"));
        assert_ne!(info.id, "server-side");
    }

    #[test]
    fn test_peer_ids_are_unique() {
        let (a, _ar) = Channel::pair(4);
        let (b, _br) = Channel::pair(4);
        let user = User { id: "u1".into(), name: "Alice".into(), email: None };
        assert_ne!(Peer::new(user.clone(), a).id(), Peer::new(user, b).id());
    }
}

//! Rooms and membership
//!
//! The room manager owns all rooms and the peer-to-room index. Peers never
//! hold references to their room; membership is always resolved through the
//! index, and all mutations go through manager operations so the index and
//! the member lists stay consistent under concurrent peer tasks.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::peer::Peer;
use crate::relay::{Relay, RelayError};
use confab_auth::{secure_id, AuthService, RoomClaim, User};
use confab_protocol::methods::{self, UserInfo};
use confab_protocol::Envelope;

/// A set of peers sharing one host's workspace
#[derive(Debug)]
pub struct Room {
    id: String,
    host: Arc<Peer>,
    guests: RwLock<Vec<Arc<Peer>>>,
}

impl Room {
    fn new(id: String, host: Arc<Peer>) -> Self {
        Self { id, host, guests: RwLock::new(Vec::new()) }
    }

    /// Room identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The peer that created the room; fixed for the room's lifetime
    pub fn host(&self) -> Arc<Peer> {
        Arc::clone(&self.host)
    }

    /// Guests in join order
    pub fn guests(&self) -> Vec<Arc<Peer>> {
        self.guests.read().expect("guest list lock").clone()
    }

    /// All members, host first then guests in join order
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        let guests = self.guests.read().expect("guest list lock");
        let mut peers = Vec::with_capacity(1 + guests.len());
        peers.push(Arc::clone(&self.host));
        peers.extend(guests.iter().cloned());
        peers
    }

    /// Whether the given peer id is a member
    pub fn contains(&self, peer_id: &str) -> bool {
        self.host.id() == peer_id
            || self.guests.read().expect("guest list lock").iter().any(|p| p.id() == peer_id)
    }

    fn add_guest(&self, peer: Arc<Peer>) {
        self.guests.write().expect("guest list lock").push(peer);
    }

    fn remove_guest(&self, peer_id: &str) -> bool {
        let mut guests = self.guests.write().expect("guest list lock");
        let before = guests.len();
        guests.retain(|p| p.id() != peer_id);
        guests.len() != before
    }
}

/// Room id plus the signed host claim handed out before the host connects
///
/// The room itself exists only once the host actually connects; until then
/// the id lives nowhere but inside the token.
#[derive(Debug, Clone)]
pub struct PreparedRoom {
    /// Generated room id
    pub id: String,
    /// Signed host claim for this room
    pub jwt: String,
}

/// Creates, indexes, and tears down rooms
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<DashMap<String, Arc<Room>>>,
    /// peer id -> room id
    peer_index: Arc<DashMap<String, String>>,
    relay: Relay,
    auth: Arc<AuthService>,
}

impl RoomManager {
    /// Create an empty manager
    pub fn new(auth: Arc<AuthService>, relay: Relay) -> Self {
        Self { rooms: Arc::new(DashMap::new()), peer_index: Arc::new(DashMap::new()), relay, auth }
    }

    /// Generate a room id and sign the host claim for it
    ///
    /// No room entry is created; the host's later connection installs it.
    pub fn prepare_room(&self, user: &User) -> Result<PreparedRoom, BrokerError> {
        let id = secure_id();
        let claim = RoomClaim { room: id.clone(), user: user.clone(), host: true };
        let jwt = self.auth.sign_room_claim(&claim)?;
        Ok(PreparedRoom { id, jwt })
    }

    /// Add a connected peer to a room
    ///
    /// A host claim installs a new room; a guest claim appends to an
    /// existing one or fails with [`BrokerError::RoomNotFound`]. Either way
    /// the peer is indexed, watched for disconnect, and told its own public
    /// identity via `peer/info`; a joining guest is announced to the rest
    /// of the room with `room/joined`.
    pub async fn join(
        &self,
        peer: Arc<Peer>,
        room_id: &str,
        host: bool,
    ) -> Result<Arc<Room>, BrokerError> {
        let room = if host {
            let room = Arc::new(Room::new(room_id.to_string(), Arc::clone(&peer)));
            match self.rooms.entry(room_id.to_string()) {
                Entry::Occupied(_) => return Err(BrokerError::RoomActive(room_id.to_string())),
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&room));
                }
            }
            info!(room = %room_id, host = %peer.id(), "room opened");
            room
        } else {
            let room = self
                .rooms
                .get(room_id)
                .map(|r| Arc::clone(&r))
                .ok_or_else(|| BrokerError::RoomNotFound(room_id.to_string()))?;
            room.add_guest(Arc::clone(&peer));
            info!(room = %room_id, guest = %peer.id(), "guest joined");
            room
        };

        self.peer_index.insert(peer.id().to_string(), room_id.to_string());
        self.watch_disconnect(Arc::clone(&peer), room_id.to_string(), host);

        let info = json!(peer.info());
        let notice = Envelope::notification(methods::PEER_INFO, vec![info.clone()]);
        if self.relay.send_notification(&peer, notice).await.is_err() {
            debug!(peer = %peer.id(), "peer closed before peer/info");
        }

        if !host {
            let joined = Envelope::broadcast(peer.id(), methods::ROOM_JOINED, vec![info]);
            self.relay.broadcast(&room.peers(), peer.id(), joined).await;
        }

        Ok(room)
    }

    /// Ask the room host to admit `user`, returning a signed guest claim
    ///
    /// Issues a `peer/join` request carrying the public user fields and
    /// waits for the host's boolean verdict.
    pub async fn request_join(&self, room: &Room, user: &User) -> Result<String, BrokerError> {
        let info = UserInfo { name: user.name.clone(), email: user.email.clone() };
        let reply = self.relay.send_request(&room.host(), methods::PEER_JOIN, vec![json!(info)]).await?;

        match reply.wait().await {
            Ok(verdict) => {
                if verdict.as_bool().unwrap_or(false) {
                    let claim =
                        RoomClaim { room: room.id().to_string(), user: user.clone(), host: false };
                    Ok(self.auth.sign_room_claim(&claim)?)
                } else {
                    Err(BrokerError::JoinRejected)
                }
            }
            Err(RelayError::RequestTimeout) => Err(BrokerError::JoinTimeout),
            Err(err) => Err(err.into()),
        }
    }

    /// Tear a room down; no-op for an unknown id
    ///
    /// Announces `room/closed` to the guests best-effort, then de-indexes
    /// every member, rejects requests targeting them, and closes their
    /// channels.
    pub async fn close_room(&self, room_id: &str) {
        let Some((_, room)) = self.rooms.remove(room_id) else {
            return;
        };
        info!(room = %room_id, "room closed");

        let host = room.host();
        self.peer_index.remove(host.id());
        self.relay.drain_peer(host.id());

        let peers = room.peers();
        let closed = Envelope::broadcast(host.id(), methods::ROOM_CLOSED, vec![]);
        self.relay.broadcast(&peers, host.id(), closed).await;

        for peer in &peers {
            self.peer_index.remove(peer.id());
            self.relay.drain_peer(peer.id());
            peer.channel().close();
        }
    }

    /// Look a room up by id
    pub fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(&r))
    }

    /// Resolve the room a peer belongs to
    pub fn room_of(&self, peer_id: &str) -> Option<Arc<Room>> {
        let room_id = self.peer_index.get(peer_id)?.clone();
        self.get_room(&room_id)
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Tear down the membership of a guest whose channel closed
    async fn remove_guest(&self, peer: &Arc<Peer>) {
        let Some((_, room_id)) = self.peer_index.remove(peer.id()) else {
            // Already torn down by a room close.
            return;
        };
        self.relay.drain_peer(peer.id());

        let Some(room) = self.get_room(&room_id) else {
            return;
        };
        if room.remove_guest(peer.id()) {
            info!(room = %room_id, guest = %peer.id(), "guest left");
            let left = Envelope::broadcast(peer.id(), methods::ROOM_LEFT, vec![json!(peer.info())]);
            self.relay.broadcast(&room.peers(), peer.id(), left).await;
        }
    }

    /// Watch a member's channel and run its teardown on close
    fn watch_disconnect(&self, peer: Arc<Peer>, room_id: String, host: bool) {
        let manager = self.clone();
        tokio::spawn(async move {
            peer.channel().closed().await;
            if host {
                manager.close_room(&room_id).await;
            } else {
                manager.remove_guest(&peer).await;
            }
        });
    }
}

impl std::fmt::Debug for RoomManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("rooms", &self.rooms.len())
            .field("peers", &self.peer_index.len())
            .finish()
    }
}

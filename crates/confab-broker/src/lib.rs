//! Confab session broker
//!
//! Mediates multi-participant editing sessions: authenticates peers,
//! assembles them into rooms around a host, and routes typed envelopes
//! among them. The broker stores no documents and resolves no conflicts;
//! it only relays.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod http;
pub mod peer;
pub mod relay;
pub mod room;

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use http::router;
pub use peer::Peer;
pub use relay::{PendingReply, Relay, RelayError, REQUEST_TIMEOUT};
pub use room::{PreparedRoom, Room, RoomManager};

use std::sync::Arc;
use tracing::debug;

use confab_auth::{AuthService, LoginRegistry, RoomClaim};
use confab_protocol::{Channel, Envelope};

/// Process-wide broker state
///
/// Bundles the credential service, deferred-login registry, relay, and
/// room manager behind one value built at startup.
pub struct Broker {
    config: BrokerConfig,
    auth: Arc<AuthService>,
    logins: LoginRegistry,
    relay: Relay,
    rooms: RoomManager,
}

impl Broker {
    /// Build a broker with the secret resolved from the environment
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Self::with_auth(config, AuthService::from_env())
    }

    /// Build a broker around an explicit credential service
    pub fn with_auth(mut config: BrokerConfig, auth: AuthService) -> Arc<Self> {
        config.validate();
        let auth = Arc::new(auth);
        let relay = Relay::new();
        let rooms = RoomManager::new(Arc::clone(&auth), relay.clone());
        Arc::new(Self { config, auth, logins: LoginRegistry::new(), relay, rooms })
    }

    /// Broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Credential service
    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Deferred-login registry
    pub fn logins(&self) -> &LoginRegistry {
        &self.logins
    }

    /// Message relay
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Room manager
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Admit a verified connection into its claimed room
    ///
    /// Builds a peer over the channel, joins it to the room named by the
    /// claim, and starts its inbound loop. On a join failure the client is
    /// sent one error envelope and the channel is closed.
    pub async fn attach(
        &self,
        claim: RoomClaim,
        channel: Channel,
    ) -> Result<Arc<Peer>, BrokerError> {
        let peer = Peer::new(claim.user, channel);
        match self.rooms.join(Arc::clone(&peer), &claim.room, claim.host).await {
            Ok(_) => {
                peer::spawn(Arc::clone(&peer), self.rooms.clone(), self.relay.clone());
                Ok(peer)
            }
            Err(err) => {
                debug!(peer = %peer.id(), %err, "join failed");
                let _ = peer.send(Envelope::error(err.to_string())).await;
                peer.channel().close();
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("rooms", &self.rooms)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

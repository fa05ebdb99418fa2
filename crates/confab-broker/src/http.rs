//! HTTP and WebSocket front
//!
//! Thin JSON layer over the credentials and room subsystems plus the
//! transport-accept path. Authenticated calls carry a user token in the
//! `x-jwt` header; the WebSocket handshake carries a room claim in the
//! same header. CORS is permissive: the broker forwards no browser
//! credentials and every call is token-authenticated.

use axum::extract::ws::{Message as WsMsg, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::error::BrokerError;
use crate::Broker;
use confab_auth::{secure_id, AuthError, RoomClaim, User};
use confab_protocol::{envelope, Channel, Envelope};

/// Header carrying user tokens and room claims
const JWT_HEADER: &str = "x-jwt";

/// Buffered envelopes per direction on a peer channel
const CHANNEL_CAPACITY: usize = 64;

/// Build the broker's router
pub fn router(broker: Arc<Broker>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/login/url", post(login_url))
        .route("/api/login/confirm/{token}", post(login_confirm))
        .route("/api/login/simple", post(login_simple))
        .route("/api/login/validate", post(login_validate))
        .route("/api/session/create", post(session_create))
        .route("/api/session/join/{room}", post(session_join))
        .route("/api/connect", get(connect))
        .layer(cors)
        .with_state(broker)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct LoginUrlReply {
    url: String,
    token: String,
}

/// Hand out a confirm token and the login page for it
async fn login_url(State(broker): State<Arc<Broker>>) -> Json<LoginUrlReply> {
    let token = secure_id();
    let url = format!("{}/login?token={}", broker.config().public_url(), token);
    Json(LoginUrlReply { url, token })
}

#[derive(Debug, Serialize)]
struct LoginConfirmReply {
    user: User,
    token: String,
}

/// Park until the login under this confirm token is completed
async fn login_confirm(
    State(broker): State<Arc<Broker>>,
    Path(token): Path<String>,
) -> Result<Json<LoginConfirmReply>, BrokerError> {
    let login = broker.logins().confirm_auth(&token).await?;
    Ok(Json(LoginConfirmReply { user: login.user, token: login.token }))
}

#[derive(Debug, Deserialize)]
struct SimpleLogin {
    token: String,
    user: String,
    #[serde(default)]
    email: Option<String>,
}

/// Complete a pending login with a caller-supplied identity (dev mode)
async fn login_simple(
    State(broker): State<Arc<Broker>>,
    Json(body): Json<SimpleLogin>,
) -> Result<&'static str, BrokerError> {
    broker.logins().confirm_user(broker.auth(), &body.token, body.user, body.email)?;
    Ok("Ok")
}

/// Report whether the presented user token verifies
async fn login_validate(State(broker): State<Arc<Broker>>, headers: HeaderMap) -> &'static str {
    match authenticate(&broker, &headers) {
        Ok(_) => "true",
        Err(_) => "false",
    }
}

#[derive(Debug, Serialize)]
struct SessionCreateReply {
    room: String,
    token: String,
}

/// Prepare a room and sign the caller's host claim for it
async fn session_create(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
) -> Result<Json<SessionCreateReply>, BrokerError> {
    let user = authenticate(&broker, &headers)?;
    let prepared = broker.rooms().prepare_room(&user)?;
    Ok(Json(SessionCreateReply { room: prepared.id, token: prepared.jwt }))
}

#[derive(Debug, Serialize)]
struct SessionJoinReply {
    token: String,
}

/// Ask the room host to admit the caller; parks until the host answers
async fn session_join(
    State(broker): State<Arc<Broker>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionJoinReply>, BrokerError> {
    let user = authenticate(&broker, &headers)?;
    let room = broker
        .rooms()
        .get_room(&room_id)
        .ok_or_else(|| BrokerError::RoomNotFound(room_id.clone()))?;
    let token = broker.rooms().request_join(&room, &user).await?;
    Ok(Json(SessionJoinReply { token }))
}

/// Upgrade to the envelope transport
///
/// The room claim is verified before the upgrade; verification failures
/// still upgrade so the client receives one error envelope before the
/// socket closes, matching the error surface of a post-upgrade failure.
async fn connect(
    State(broker): State<Arc<Broker>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> impl IntoResponse {
    let claim = bearer_token(&headers)
        .ok_or(AuthError::Invalid)
        .and_then(|token| broker.auth().verify_jwt::<RoomClaim>(&token));
    ws.on_upgrade(move |socket| accept_peer(socket, broker, claim))
}

async fn accept_peer(socket: WebSocket, broker: Arc<Broker>, claim: Result<RoomClaim, AuthError>) {
    let (local, remote) = Channel::pair(CHANNEL_CAPACITY);

    match claim {
        Ok(claim) => {
            if let Err(err) = broker.attach(claim, local).await {
                debug!(%err, "connection rejected");
            }
        }
        Err(err) => {
            let _ = local.send(Envelope::error(BrokerError::from(err).to_string())).await;
            local.close();
        }
    }

    // Runs until either side closes; also flushes the rejection envelope.
    bridge_socket(socket, remote).await;
}

/// Pump a WebSocket against a channel endpoint until either side closes
///
/// Text frames are decoded into envelopes; an undecodable frame earns the
/// client one error envelope before the socket is torn down.
pub(crate) async fn bridge_socket(socket: WebSocket, channel: Channel) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = channel.recv() => match outbound {
                Some(envelope) => {
                    let Ok(frame) = envelope::encode(&envelope) else {
                        break;
                    };
                    if sink.send(WsMsg::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(WsMsg::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMsg::Text(frame))) => {
                    if !push_frame(&mut sink, &channel, &frame).await {
                        break;
                    }
                }
                Some(Ok(WsMsg::Ping(_) | WsMsg::Pong(_))) => {}
                Some(Ok(WsMsg::Binary(_))) => {
                    let reject = Envelope::error("expected one JSON envelope per text frame");
                    send_envelope(&mut sink, &reject).await;
                    break;
                }
                Some(Ok(WsMsg::Close(_))) | Some(Err(_)) | None => break,
            },
        }
    }

    channel.close();
}

/// Decode one inbound frame into the channel; false ends the connection
async fn push_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, WsMsg>,
    channel: &Channel,
    frame: &Utf8Bytes,
) -> bool {
    match envelope::decode(frame.as_str()) {
        Ok(envelope) => channel.send(envelope).await.is_ok(),
        Err(err) => {
            debug!(%err, "closing connection on invalid envelope");
            send_envelope(sink, &Envelope::error(err.to_string())).await;
            false
        }
    }
}

async fn send_envelope(
    sink: &mut futures::stream::SplitSink<WebSocket, WsMsg>,
    envelope: &Envelope,
) {
    if let Ok(frame) = envelope::encode(envelope) {
        let _ = sink.send(WsMsg::Text(frame.into())).await;
    }
}

/// Extract and verify the caller's user token
fn authenticate(broker: &Broker, headers: &HeaderMap) -> Result<User, BrokerError> {
    let token = bearer_token(headers).ok_or(AuthError::Invalid)?;
    Ok(broker.auth().get_user(&token)?)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers.get(JWT_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

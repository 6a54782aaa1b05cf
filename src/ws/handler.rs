//! WebSocket upgrade handler and per-connection pumps

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::entity::PlayerId;
use crate::game::room::{Room, RoomConfig, RoomError, RoomRules};
use crate::game::RoomRegistry;
use crate::http::middleware::{verify_jwt, AuthError};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::connection::{Connection, ConnectionManager};
use crate::ws::protocol::{decode_client_msg, ClientMsg, ProtocolError, ServerMsg};

/// Interval between server pings
pub const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Reader gives up after this long without any inbound frame
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Deadline for a single outbound write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Largest inbound message accepted
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token else {
        warn!("WebSocket upgrade without token");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    // Verify JWT token before upgrading
    let player_id = match verify_jwt(&token, &state.config.jwt_secret)
        .and_then(|claims| claims.player_id().ok_or(AuthError::MissingIdentity))
    {
        Ok(player_id) => player_id,
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            return e.into_response();
        }
    };

    info!(player_id, "WebSocket upgrade for authenticated player");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: PlayerId, state: AppState) {
    let (connection, outbound) = match state.connections.register(Some(player_id)) {
        Ok(registered) => registered,
        Err(e) => {
            error!(player_id, error = %e, "Connection refused");
            return;
        }
    };

    state.connections.send(
        &connection,
        &ServerMsg::Welcome {
            connection_id: connection.id,
            player_id,
            server_time: unix_millis(),
        },
    );

    let (ws_sink, ws_stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(connection.id, ws_sink, outbound));
    let mut writer_done = false;

    tokio::select! {
        _ = &mut writer => {
            writer_done = true;
            debug!(connection_id = %connection.id, "Writer ended first");
        }
        _ = read_pump(&state, &connection, ws_stream) => {}
    }

    // Releases the outbound queue, so the writer drains and exits
    state.connections.close(&connection);

    if !writer_done {
        match timeout(WRITE_WAIT, &mut writer).await {
            Ok(_) => {}
            Err(_) => {
                warn!(connection_id = %connection.id, "Writer did not stop in time");
                writer.abort();
            }
        }
    }

    info!(connection_id = %connection.id, player_id, "WebSocket connection closed");
}

/// Inbound pump: WebSocket -> room dispatch
async fn read_pump(
    state: &AppState,
    connection: &Arc<Connection>,
    mut ws_stream: SplitStream<WebSocket>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    loop {
        let next = match timeout(PONG_WAIT, ws_stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(connection_id = %connection.id, "Keep-alive timeout");
                break;
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(connection_id = %connection.id, error = %e, "WebSocket read error");
                break;
            }
            None => break,
        };

        connection.touch();

        match message {
            Message::Text(text) => {
                if !rate_limiter.check_input() {
                    warn!(connection_id = %connection.id, "Rate limited inbound message");
                    continue;
                }

                match decode_client_msg(&text) {
                    Ok(msg) => dispatch(&state.rooms, &state.connections, connection, msg),
                    Err(ProtocolError::UnknownMessageType(kind)) => {
                        warn!(connection_id = %connection.id, kind = %kind, "Unknown message type");
                    }
                    Err(e) => {
                        warn!(connection_id = %connection.id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Message::Binary(_) => {
                warn!(connection_id = %connection.id, "Received binary message, ignoring");
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                info!(connection_id = %connection.id, "Client initiated close");
                break;
            }
        }

        if !connection.is_alive() {
            break;
        }
    }
}

/// Outbound pump: queued frames and periodic pings -> WebSocket
async fn write_pump(
    connection_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
) {
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ping.tick().await;

    loop {
        let message = tokio::select! {
            queued = outbound.recv() => match queued {
                Some(text) => Message::Text(text),
                None => {
                    let _ = timeout(WRITE_WAIT, ws_sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(WRITE_WAIT, ws_sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                warn!(connection_id = %connection_id, "WebSocket write deadline exceeded");
                break;
            }
        }
    }
}

/// Route one decoded client message. Room errors go back to the sender.
pub fn dispatch(
    rooms: &RoomRegistry,
    connections: &ConnectionManager,
    connection: &Arc<Connection>,
    msg: ClientMsg,
) {
    let result = match msg {
        ClientMsg::JoinRoom {
            room_id,
            character_id,
        } => rooms
            .get(&room_id)
            .ok_or(RoomError::NotFound)
            .and_then(|room| room.add_player(connection, character_id))
            .map(|_| ()),

        ClientMsg::CreateRoom {
            name,
            mode,
            max_players,
            map_id,
            time_limit_secs,
            score_limit,
            friendly_fire,
            private,
            character_id,
        } => {
            if connection.current_room().is_some() {
                Err(RoomError::AlreadyInRoom)
            } else {
                let mut config = RoomConfig::new(name, mode);
                let defaults = RoomRules::default();
                config.max_players = max_players.unwrap_or(config.max_players);
                config.map_id = map_id.unwrap_or(config.map_id);
                config.rules = RoomRules {
                    time_limit_secs: time_limit_secs.unwrap_or(defaults.time_limit_secs),
                    score_limit: score_limit.unwrap_or(defaults.score_limit),
                    friendly_fire: friendly_fire.unwrap_or(defaults.friendly_fire),
                    private: private.unwrap_or(defaults.private),
                };
                rooms
                    .create_room(config)
                    .and_then(|room| room.add_player(connection, character_id))
                    .map(|_| ())
            }
        }

        ClientMsg::LeaveRoom => match connection.current_room() {
            Some(room) if room.remove_player(connection.id) => Ok(()),
            _ => Err(RoomError::NotInRoom),
        },

        ClientMsg::Ready => with_room(connection, |room| room.set_ready(connection.id, true)),
        ClientMsg::Unready => with_room(connection, |room| room.set_ready(connection.id, false)),

        ClientMsg::PlayerInput(input) => with_room(connection, |room| {
            room.handle_input(connection.id, &input).map(|_| ())
        }),

        ClientMsg::Ping { t } => {
            connections.send(
                connection,
                &ServerMsg::Pong {
                    t,
                    server_time: unix_millis(),
                },
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        debug!(
            connection_id = %connection.id,
            code = e.code(),
            "Request rejected"
        );
        connections.send(connection, &ServerMsg::error(e.code(), e.to_string()));
    }
}

fn with_room<F>(connection: &Connection, f: F) -> Result<(), RoomError>
where
    F: FnOnce(&Room) -> Result<(), RoomError>,
{
    let room = connection.current_room().ok_or(RoomError::NotInRoom)?;
    f(&room)
}

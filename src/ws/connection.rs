//! Connection registry and outbound delivery

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::entity::PlayerId;
use crate::game::room::Room;
use crate::http::middleware::AuthError;
use crate::matchmaking::{MatchNotifier, RoomHandle};
use crate::ws::protocol::{encode_server_msg, ServerMsg};

/// Default capacity of a connection's outbound queue
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// One live player connection
pub struct Connection {
    pub id: Uuid,
    pub player_id: PlayerId,
    pub connected_at: Instant,
    last_active: Mutex<Instant>,
    /// Dropped on close so the writer drains and exits
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    alive: AtomicBool,
    room: Mutex<Option<Weak<Room>>>,
}

enum Enqueue {
    Sent,
    Closed,
    Full,
}

impl Connection {
    fn new(player_id: PlayerId, sender: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            player_id,
            connected_at: now,
            last_active: Mutex::new(now),
            outbound: Mutex::new(Some(sender)),
            alive: AtomicBool::new(true),
            room: Mutex::new(None),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Record inbound activity
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// The room this connection currently occupies
    pub fn current_room(&self) -> Option<Arc<Room>> {
        self.room.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_room(&self, room: Weak<Room>) {
        *self.room.lock() = Some(room);
    }

    /// Clear the back-reference if it still points at `room_id`
    pub(crate) fn clear_room(&self, room_id: Uuid) {
        let mut slot = self.room.lock();
        let points_here = slot
            .as_ref()
            .and_then(Weak::upgrade)
            .map_or(true, |room| room.id == room_id);
        if points_here {
            *slot = None;
        }
    }

    fn enqueue(&self, text: String) -> Enqueue {
        let outbound = self.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return Enqueue::Closed;
        };
        match sender.try_send(text) {
            Ok(()) => Enqueue::Sent,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Registry of live connections
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    outbound_capacity: usize,
}

impl ConnectionManager {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a connection for an authenticated player.
    ///
    /// Returns the connection and the receiving end of its outbound queue,
    /// which the socket writer drains.
    pub fn register(
        &self,
        player_id: Option<PlayerId>,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<String>), AuthError> {
        let player_id = player_id.ok_or(AuthError::MissingIdentity)?;
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let connection = Arc::new(Connection::new(player_id, tx));

        self.connections
            .write()
            .insert(connection.id, connection.clone());

        info!(
            connection_id = %connection.id,
            player_id,
            "Connection registered"
        );

        Ok((connection, rx))
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Live connections belonging to a player
    pub fn for_player(&self, player_id: PlayerId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.player_id == player_id)
            .cloned()
            .collect()
    }

    /// Serialize and enqueue a message. Returns false if it was not delivered.
    pub fn send(&self, connection: &Arc<Connection>, msg: &ServerMsg) -> bool {
        match encode_server_msg(msg) {
            Ok(text) => self.send_text(connection, text),
            Err(e) => {
                error!(connection_id = %connection.id, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    /// Serialize once, deliver to every connection
    pub fn broadcast<'a, I>(&self, msg: &ServerMsg, connections: I)
    where
        I: IntoIterator<Item = &'a Arc<Connection>>,
    {
        let text = match encode_server_msg(msg) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast");
                return;
            }
        };

        for connection in connections {
            self.send_text(connection, text.clone());
        }
    }

    fn send_text(&self, connection: &Arc<Connection>, text: String) -> bool {
        if !connection.is_alive() {
            return false;
        }
        match connection.enqueue(text) {
            Enqueue::Sent => true,
            Enqueue::Closed => false,
            Enqueue::Full => {
                warn!(
                    connection_id = %connection.id,
                    player_id = connection.player_id,
                    "Outbound queue full, dropping slow connection"
                );
                self.close(connection);
                false
            }
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn close(&self, connection: &Arc<Connection>) {
        if !connection.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        let room = connection.room.lock().take().and_then(|weak| weak.upgrade());
        if let Some(room) = room {
            room.remove_player(connection.id);
        }

        connection.outbound.lock().take();
        self.connections.write().remove(&connection.id);

        info!(
            connection_id = %connection.id,
            player_id = connection.player_id,
            session_secs = connection.connected_at.elapsed().as_secs(),
            idle_ms = connection.last_active().elapsed().as_millis() as u64,
            "Connection closed"
        );
    }

    /// Deliver a message to every connection of a player
    pub fn notify_player(&self, player_id: PlayerId, msg: &ServerMsg) -> bool {
        let targets = self.for_player(player_id);
        let mut delivered = false;
        for connection in &targets {
            delivered |= self.send(connection, msg);
        }
        if !delivered {
            debug!(player_id, "No live connection to notify");
        }
        delivered
    }

    pub fn close_all(&self) {
        let all: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        let count = all.len();
        for connection in all {
            self.close(&connection);
        }
        info!(count, "Closed all connections");
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl MatchNotifier for ConnectionManager {
    fn notify_match(&self, player_id: PlayerId, room: &RoomHandle) -> bool {
        self.notify_player(
            player_id,
            &ServerMsg::MatchFound {
                room_id: room.id,
                name: room.name.clone(),
                mode: room.mode,
                max_players: room.max_players,
                map_id: room.map_id,
            },
        )
    }
}

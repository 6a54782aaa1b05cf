//! Registry of live rooms and their tick tasks

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::matchmaking::{DispatchError, RoomFactory, RoomHandle};
use crate::store::stats::StatsClient;
use crate::ws::connection::ConnectionManager;
use crate::ws::protocol::{GameMode, RoomSummary};

use super::room::{Room, RoomConfig, RoomError};

struct RoomEntry {
    room: Arc<Room>,
    task: Option<JoinHandle<()>>,
}

/// Owns every room on this server
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, RoomEntry>>,
    connections: Arc<ConnectionManager>,
    stats: StatsClient,
    shutdown: watch::Receiver<bool>,
    max_rooms: usize,
    tick: Duration,
}

impl RoomRegistry {
    pub fn new(
        connections: Arc<ConnectionManager>,
        stats: StatsClient,
        shutdown: watch::Receiver<bool>,
        max_rooms: usize,
        tick: Duration,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections,
            stats,
            shutdown,
            max_rooms,
            tick,
        }
    }

    /// Create a room and start its tick loop
    pub fn create_room(&self, config: RoomConfig) -> Result<Arc<Room>, RoomError> {
        config.validate()?;
        let mut rooms = self.rooms.write();
        if rooms.len() >= self.max_rooms {
            warn!(max_rooms = self.max_rooms, "Room capacity reached");
            return Err(RoomError::CapacityReached);
        }

        let room = Arc::new(Room::new(
            config,
            self.connections.clone(),
            self.stats.clone(),
            rand::random::<u64>(),
        ));

        let task = tokio::spawn(room.clone().run(self.tick, self.shutdown.clone()));
        rooms.insert(
            room.id,
            RoomEntry {
                room: room.clone(),
                task: Some(task),
            },
        );

        info!(
            room_id = %room.id,
            name = %room.name,
            mode = %room.mode,
            max_players = room.max_players,
            "Room created"
        );

        Ok(room)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Room>> {
        self.rooms.read().get(id).map(|e| e.room.clone())
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms
            .read()
            .values()
            .map(|e| e.room.player_count())
            .sum()
    }

    /// Summaries of all rooms, optionally including private ones
    pub fn list(&self, include_private: bool) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .read()
            .values()
            .filter(|e| include_private || !e.room.rules.private)
            .map(|e| e.room.summary())
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Drop rooms that are idle-empty or past their ended grace period
    pub fn sweep(&self, now: Instant) -> Vec<Uuid> {
        let expired: Vec<RoomEntry> = {
            let mut rooms = self.rooms.write();
            let ids: Vec<Uuid> = rooms
                .iter()
                .filter(|(_, e)| e.room.should_cleanup(now))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| rooms.remove(id)).collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for entry in expired {
            entry.room.terminate();
            info!(room_id = %entry.room.id, "Room cleaned up");
            removed.push(entry.room.id);
        }
        removed
    }

    /// Periodic sweep until shutdown
    pub async fn run_cleanup(self: Arc<Self>, every: Duration) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Stop every room and wait for its task, up to `grace`
    pub async fn shutdown_all(&self, grace: Duration) {
        let entries: Vec<RoomEntry> = self.rooms.write().drain().map(|(_, e)| e).collect();
        let count = entries.len();

        let mut tasks = Vec::with_capacity(count);
        for mut entry in entries {
            entry.room.terminate();
            if let Some(task) = entry.task.take() {
                tasks.push(task);
            }
        }

        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(grace_secs = grace.as_secs(), "Room tasks did not stop within grace period");
        }

        info!(count, "All rooms stopped");
    }
}

impl RoomFactory for RoomRegistry {
    fn create_room(
        &self,
        name: &str,
        mode: GameMode,
        required_players: usize,
        map_id: u32,
    ) -> Result<RoomHandle, DispatchError> {
        let mut config = RoomConfig::new(name, mode);
        config.max_players = required_players;
        config.map_id = map_id;

        let room = RoomRegistry::create_room(self, config)
            .map_err(|e| DispatchError::RoomCreation(e.to_string()))?;

        Ok(RoomHandle {
            id: room.id,
            name: room.name.clone(),
            mode: room.mode,
            max_players: room.max_players,
            map_id: room.map_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::{RoomRules, IDLE_TIMEOUT};

    fn registry(max_rooms: usize) -> (Arc<RoomRegistry>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let registry = RoomRegistry::new(
            Arc::new(ConnectionManager::default()),
            StatsClient::disabled(),
            rx,
            max_rooms,
            Duration::from_millis(10),
        );
        (Arc::new(registry), tx)
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let (registry, _tx) = registry(1);
        registry
            .create_room(RoomConfig::new("a", GameMode::DeathMatch))
            .unwrap();
        assert!(matches!(
            registry.create_room(RoomConfig::new("b", GameMode::DeathMatch)),
            Err(RoomError::CapacityReached)
        ));
        assert!(RoomFactory::create_room(registry.as_ref(), "c", GameMode::DeathMatch, 4, 1).is_err());
    }

    #[tokio::test]
    async fn factory_handle_describes_room() {
        let (registry, _tx) = registry(10);
        let handle = RoomFactory::create_room(registry.as_ref(), "dm-1", GameMode::TeamDeathMatch, 6, 1).unwrap();

        let room = registry.get(&handle.id).unwrap();
        assert_eq!(room.max_players, 6);
        assert_eq!(handle.name, "dm-1");
        assert_eq!(handle.mode, GameMode::TeamDeathMatch);
    }

    #[tokio::test]
    async fn listing_hides_private_rooms() {
        let (registry, _tx) = registry(10);
        registry
            .create_room(RoomConfig::new("public", GameMode::DeathMatch))
            .unwrap();
        let mut private = RoomConfig::new("secret", GameMode::DeathMatch);
        private.rules = RoomRules {
            private: true,
            ..RoomRules::default()
        };
        registry.create_room(private).unwrap();

        assert_eq!(registry.list(false).len(), 1);
        assert_eq!(registry.list(true).len(), 2);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_rooms() {
        let (registry, _tx) = registry(10);
        let room = registry
            .create_room(RoomConfig::new("idle", GameMode::DeathMatch))
            .unwrap();

        assert!(registry.sweep(Instant::now()).is_empty());
        assert_eq!(registry.len(), 1);

        let later = Instant::now() + IDLE_TIMEOUT + Duration::from_secs(1);
        assert_eq!(registry.sweep(later), vec![room.id]);
        assert_eq!(registry.len(), 0);
        assert!(room.is_stopped());
    }

    #[tokio::test]
    async fn shutdown_stops_room_tasks() {
        let (registry, tx) = registry(10);
        let room = registry
            .create_room(RoomConfig::new("a", GameMode::DeathMatch))
            .unwrap();

        tx.send(true).unwrap();
        registry.shutdown_all(Duration::from_secs(2)).await;

        assert_eq!(registry.len(), 0);
        assert!(room.is_stopped());
    }
}

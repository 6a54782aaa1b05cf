//! Room state and authoritative tick loop

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::stats::{MatchResult, StatsClient};
use crate::util::time::unix_millis;
use crate::ws::connection::{Connection, ConnectionManager};
use crate::ws::protocol::{
    EndReason, GameMode, PlayerInfo, PlayerInput, RoomStatus, RoomSummary, ServerMsg,
};

use super::combat::CombatSystem;
use super::entity::{EntityId, PlayerEntity, PlayerId, Team};
use super::frame;
use super::physics::{MapBounds, PhysicsSystem};
use super::world::World;

/// Players needed before a ready check can start the game
pub const MIN_PLAYERS_TO_START: usize = 2;
/// Upper bound on a room's seats
pub const MAX_PLAYERS_PER_ROOM: usize = 16;
pub const PLAYER_MAX_HEALTH: i32 = 100;
/// An empty room is swept after this long without activity
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// An ended room is swept after this long
pub const ENDED_GRACE: Duration = Duration::from_secs(2 * 60);

/// Match rules for a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRules {
    /// Seconds of play before the game ends
    pub time_limit_secs: f32,
    /// First player to reach this score ends the game
    pub score_limit: u32,
    pub friendly_fire: bool,
    pub private: bool,
}

impl Default for RoomRules {
    fn default() -> Self {
        Self {
            time_limit_secs: 300.0,
            score_limit: 20,
            friendly_fire: false,
            private: false,
        }
    }
}

/// Parameters for creating a room
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub name: String,
    pub mode: GameMode,
    pub max_players: usize,
    pub map_id: u32,
    pub rules: RoomRules,
}

impl RoomConfig {
    pub fn new(name: impl Into<String>, mode: GameMode) -> Self {
        Self {
            name: name.into(),
            mode,
            max_players: mode.required_players(),
            map_id: 1,
            rules: RoomRules::default(),
        }
    }

    /// Reject settings under which a game could never start or would end at once
    pub fn validate(&self) -> Result<(), RoomError> {
        if !(MIN_PLAYERS_TO_START..=MAX_PLAYERS_PER_ROOM).contains(&self.max_players) {
            return Err(RoomError::InvalidPlayerLimit);
        }
        let time_limit = self.rules.time_limit_secs;
        if !time_limit.is_finite() || time_limit <= 0.0 {
            return Err(RoomError::InvalidTimeLimit);
        }
        if self.rules.score_limit == 0 {
            return Err(RoomError::InvalidScoreLimit);
        }
        Ok(())
    }
}

/// Room errors, reported to the requesting client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,

    #[error("Room is no longer accepting players")]
    RoomClosed,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Room not found")]
    NotFound,

    #[error("Server room capacity reached")]
    CapacityReached,

    #[error("Player limit must be between {} and {}", MIN_PLAYERS_TO_START, MAX_PLAYERS_PER_ROOM)]
    InvalidPlayerLimit,

    #[error("Time limit must be positive")]
    InvalidTimeLimit,

    #[error("Score limit must be positive")]
    InvalidScoreLimit,
}

impl RoomError {
    /// Machine-readable code for `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomFull => "room_full",
            RoomError::RoomClosed => "room_closed",
            RoomError::AlreadyInRoom => "already_in_room",
            RoomError::NotInRoom => "not_in_room",
            RoomError::NotFound => "room_not_found",
            RoomError::CapacityReached => "capacity_reached",
            RoomError::InvalidPlayerLimit => "invalid_player_limit",
            RoomError::InvalidTimeLimit => "invalid_time_limit",
            RoomError::InvalidScoreLimit => "invalid_score_limit",
        }
    }
}

/// A connection's seat in the room
pub struct PlayerSlot {
    pub connection: Arc<Connection>,
    pub entity_id: EntityId,
    pub player_id: PlayerId,
    pub character_id: u32,
    pub team: Team,
    pub ready: bool,
}

impl PlayerSlot {
    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id,
            entity_id: self.entity_id,
            character_id: self.character_id,
            team: self.team,
            ready: self.ready,
        }
    }
}

struct Lifecycle {
    status: RoomStatus,
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    ended_at: Option<Instant>,
    last_activity: Instant,
    last_tick: Instant,
    frame_id: u64,
    /// Simulated play time in seconds
    elapsed: f32,
}

/// Messages produced by one simulation step
#[derive(Debug, Default)]
pub struct TickOutput {
    pub started: Option<ServerMsg>,
    pub frame: Option<ServerMsg>,
    pub ended: Option<(ServerMsg, MatchResult)>,
}

/// One match instance.
///
/// Lock order: `players` -> `world` -> `lifecycle`.
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub mode: GameMode,
    pub max_players: usize,
    pub map_id: u32,
    pub rules: RoomRules,
    pub created_at: DateTime<Utc>,
    players: RwLock<HashMap<Uuid, PlayerSlot>>,
    world: Mutex<World>,
    lifecycle: Mutex<Lifecycle>,
    connections: Arc<ConnectionManager>,
    stats: StatsClient,
    stopped: AtomicBool,
}

impl Room {
    pub fn new(
        config: RoomConfig,
        connections: Arc<ConnectionManager>,
        stats: StatsClient,
        seed: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            name: config.name,
            mode: config.mode,
            max_players: config.max_players.max(1),
            map_id: config.map_id,
            rules: config.rules,
            created_at: Utc::now(),
            players: RwLock::new(HashMap::new()),
            world: Mutex::new(World::new(seed, MapBounds::for_map(config.map_id))),
            lifecycle: Mutex::new(Lifecycle {
                status: RoomStatus::Waiting,
                started_at: None,
                started_wall: None,
                ended_at: None,
                last_activity: now,
                last_tick: now,
                frame_id: 0,
                elapsed: 0.0,
            }),
            connections,
            stats,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> RoomStatus {
        self.lifecycle.lock().status
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            status: self.status(),
            players: self.player_count(),
            max_players: self.max_players,
            map_id: self.map_id,
            private: self.rules.private,
            created_at: self.created_at,
        }
    }

    /// Seat a connection in this room and spawn its player entity
    pub fn add_player(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        character_id: u32,
    ) -> Result<PlayerInfo, RoomError> {
        if connection.current_room().is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        let (info, roster, others) = {
            let mut players = self.players.write();
            if players.contains_key(&connection.id) {
                return Err(RoomError::AlreadyInRoom);
            }
            let mut world = self.world.lock();
            let mut lifecycle = self.lifecycle.lock();

            if self.is_stopped() || lifecycle.status != RoomStatus::Waiting {
                return Err(RoomError::RoomClosed);
            }
            if players.len() >= self.max_players {
                return Err(RoomError::RoomFull);
            }

            let team = self.assign_team(&players);
            let entity_id = world.spawn_player(PlayerEntity::new(
                connection.player_id,
                character_id,
                team,
                PLAYER_MAX_HEALTH,
            ));
            let slot = PlayerSlot {
                connection: connection.clone(),
                entity_id,
                player_id: connection.player_id,
                character_id,
                team,
                ready: false,
            };
            let info = slot.info();
            players.insert(connection.id, slot);
            lifecycle.last_activity = Instant::now();

            let mut roster: Vec<PlayerInfo> = players.values().map(PlayerSlot::info).collect();
            roster.sort_by_key(|p| p.entity_id);
            let others: Vec<Arc<Connection>> = players
                .values()
                .filter(|s| s.connection.id != connection.id)
                .map(|s| s.connection.clone())
                .collect();
            (info, roster, others)
        };

        connection.set_room(Arc::downgrade(self));
        if !connection.is_alive() {
            // closed while joining; its teardown may have missed the back-reference
            self.remove_player(connection.id);
            return Ok(info);
        }

        info!(
            room_id = %self.id,
            player_id = info.player_id,
            entity_id = info.entity_id,
            team = ?info.team,
            "Player joined room"
        );

        self.connections.send(
            connection,
            &ServerMsg::RoomJoined {
                room: self.summary(),
                entity_id: info.entity_id,
                team: info.team,
                players: roster,
            },
        );
        self.connections.broadcast(
            &ServerMsg::PlayerJoined {
                player: info.clone(),
            },
            &others,
        );

        Ok(info)
    }

    /// Smaller team first, ties to the first playable team
    fn assign_team(&self, players: &HashMap<Uuid, PlayerSlot>) -> Team {
        if !self.mode.is_team_based() {
            return Team::None;
        }
        Team::PLAYABLE
            .into_iter()
            .min_by_key(|team| players.values().filter(|s| s.team == *team).count())
            .unwrap_or(Team::None)
    }

    /// Remove a connection's seat and entity. Returns false if it had none.
    pub fn remove_player(&self, connection_id: Uuid) -> bool {
        let (slot, remaining) = {
            let mut players = self.players.write();
            let Some(slot) = players.remove(&connection_id) else {
                return false;
            };
            let mut world = self.world.lock();
            let mut lifecycle = self.lifecycle.lock();
            world.remove_player(slot.entity_id, lifecycle.status != RoomStatus::Waiting);
            lifecycle.last_activity = Instant::now();
            let remaining: Vec<Arc<Connection>> =
                players.values().map(|s| s.connection.clone()).collect();
            (slot, remaining)
        };

        slot.connection.clear_room(self.id);

        info!(
            room_id = %self.id,
            player_id = slot.player_id,
            remaining = remaining.len(),
            "Player left room"
        );

        self.connections
            .send(&slot.connection, &ServerMsg::RoomLeft { room_id: self.id });
        self.connections.broadcast(
            &ServerMsg::PlayerLeft {
                player_id: slot.player_id,
                entity_id: slot.entity_id,
            },
            &remaining,
        );
        true
    }

    pub fn set_ready(&self, connection_id: Uuid, ready: bool) -> Result<(), RoomError> {
        let mut players = self.players.write();
        let slot = players.get_mut(&connection_id).ok_or(RoomError::NotInRoom)?;
        slot.ready = ready;
        debug!(room_id = %self.id, player_id = slot.player_id, ready, "Ready state changed");
        Ok(())
    }

    /// Apply movement intent and skill use. Returns spawned projectile ids.
    pub fn handle_input(
        &self,
        connection_id: Uuid,
        input: &PlayerInput,
    ) -> Result<Vec<EntityId>, RoomError> {
        let entity_id = self
            .players
            .read()
            .get(&connection_id)
            .map(|s| s.entity_id)
            .ok_or(RoomError::NotInRoom)?;

        if self.status() != RoomStatus::Playing {
            return Ok(Vec::new());
        }

        let mut world = self.world.lock();
        let Some(entity) = world.get_mut(entity_id) else {
            return Ok(Vec::new());
        };
        if !entity.as_player().is_some_and(|p| p.alive) {
            return Ok(Vec::new());
        }

        if let Some(rotation) = input.rotation {
            entity.set_rotation(rotation);
        }
        if let Some(movement) = input.movement {
            entity.velocity = PhysicsSystem::movement_velocity(movement);
        }
        let position = entity.position;

        let spawned = match input.skill_id {
            Some(skill_id) => CombatSystem::use_skill(
                &mut world,
                entity_id,
                skill_id,
                input.target.unwrap_or(position),
            ),
            None => Vec::new(),
        };
        drop(world);

        self.lifecycle.lock().last_activity = Instant::now();
        Ok(spawned)
    }

    /// Advance the room by `dt` seconds without sending anything
    pub fn step(&self, dt: f32) -> TickOutput {
        if self.is_stopped() {
            return TickOutput::default();
        }
        match self.status() {
            RoomStatus::Waiting => TickOutput {
                started: self.check_ready(),
                ..TickOutput::default()
            },
            RoomStatus::Playing => self.simulate(dt),
            RoomStatus::Ended => TickOutput::default(),
        }
    }

    /// Advance the room and broadcast what happened
    pub fn tick(&self, dt: f32) {
        let output = self.step(dt);
        if output.started.is_none() && output.frame.is_none() && output.ended.is_none() {
            return;
        }

        let members = self.member_connections();
        if let Some(msg) = output.started {
            self.connections.broadcast(&msg, &members);
        }
        if let Some(msg) = output.frame {
            self.connections.broadcast(&msg, &members);
        }
        if let Some((msg, result)) = output.ended {
            self.connections.broadcast(&msg, &members);
            self.report(result);
        }
    }

    fn check_ready(&self) -> Option<ServerMsg> {
        let players = self.players.read();
        if players.len() < MIN_PLAYERS_TO_START || !players.values().all(|s| s.ready) {
            return None;
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status != RoomStatus::Waiting {
            return None;
        }
        let now = Instant::now();
        lifecycle.status = RoomStatus::Playing;
        lifecycle.started_at = Some(now);
        lifecycle.started_wall = Some(Utc::now());
        lifecycle.last_tick = now;
        lifecycle.last_activity = now;

        let mut roster: Vec<PlayerInfo> = players.values().map(PlayerSlot::info).collect();
        roster.sort_by_key(|p| p.entity_id);

        info!(room_id = %self.id, players = roster.len(), "Game started");

        Some(ServerMsg::GameStart {
            room_id: self.id,
            players: roster,
            rules: self.rules.clone(),
            started_at: unix_millis(),
        })
    }

    fn simulate(&self, dt: f32) -> TickOutput {
        let mut world = self.world.lock();
        world.advance(dt);
        let outcome = CombatSystem::resolve_collisions(&mut world, self.rules.friendly_fire);
        let top_score = world.max_score();

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status != RoomStatus::Playing {
            return TickOutput::default();
        }
        let now = Instant::now();
        lifecycle.frame_id += 1;
        lifecycle.elapsed += dt;
        lifecycle.last_tick = now;

        for kill in &outcome.kills {
            debug!(room_id = %self.id, killer = ?kill.killer, victim = kill.victim, "Player killed");
        }

        let remaining = (self.rules.time_limit_secs - lifecycle.elapsed).max(0.0);
        let frame = frame::build_frame(lifecycle.frame_id, &world, &outcome, remaining);

        let reason = if lifecycle.elapsed >= self.rules.time_limit_secs {
            Some(EndReason::TimeLimit)
        } else if top_score >= self.rules.score_limit {
            Some(EndReason::ScoreLimit)
        } else {
            None
        };

        let ended = reason.map(|reason| {
            lifecycle.status = RoomStatus::Ended;
            lifecycle.ended_at = Some(now);
            info!(room_id = %self.id, ?reason, elapsed = lifecycle.elapsed, "Game ended");
            self.finish(&world, &lifecycle, reason)
        });

        TickOutput {
            started: None,
            frame: Some(frame),
            ended,
        }
    }

    fn finish(&self, world: &World, lifecycle: &Lifecycle, reason: EndReason) -> (ServerMsg, MatchResult) {
        let players = frame::player_tallies(world);
        let msg = ServerMsg::GameEnd {
            room_id: self.id,
            reason,
            scores: world.scores().clone(),
            players: players.clone(),
            duration_secs: lifecycle.elapsed,
        };
        let result = MatchResult {
            room_id: self.id,
            room_name: self.name.clone(),
            mode: self.mode,
            map_id: self.map_id,
            reason,
            started_at: lifecycle.started_wall,
            ended_at: Utc::now(),
            duration_secs: lifecycle.elapsed,
            players,
        };
        (msg, result)
    }

    /// Hand the result to the statistics collaborator without blocking the tick
    fn report(&self, result: MatchResult) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(room_id = %self.id, "No runtime available, match result not recorded");
            return;
        };
        let stats = self.stats.clone();
        runtime.spawn(async move {
            if let Err(e) = stats.record_match(&result).await {
                warn!(room_id = %result.room_id, error = %e, "Failed to record match result");
            }
        });
    }

    fn member_connections(&self) -> Vec<Arc<Connection>> {
        self.players
            .read()
            .values()
            .map(|s| s.connection.clone())
            .collect()
    }

    /// Whether the registry should drop this room
    pub fn should_cleanup(&self, now: Instant) -> bool {
        if self.is_stopped() {
            return true;
        }
        let empty = self.players.read().is_empty();
        let lifecycle = self.lifecycle.lock();
        let idle = empty && now.saturating_duration_since(lifecycle.last_activity) > IDLE_TIMEOUT;
        let expired = lifecycle.status == RoomStatus::Ended
            && lifecycle
                .ended_at
                .is_some_and(|ended| now.saturating_duration_since(ended) > ENDED_GRACE);
        idle || expired
    }

    /// Force the room to end and release every seat. Idempotent.
    pub fn terminate(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let was_playing = {
            let mut lifecycle = self.lifecycle.lock();
            let was_playing = lifecycle.status == RoomStatus::Playing;
            if lifecycle.status != RoomStatus::Ended {
                lifecycle.status = RoomStatus::Ended;
                lifecycle.ended_at = Some(Instant::now());
            }
            was_playing
        };

        let slots: Vec<PlayerSlot> = self.players.write().drain().map(|(_, s)| s).collect();
        let members: Vec<Arc<Connection>> = slots.iter().map(|s| s.connection.clone()).collect();

        if was_playing {
            let (msg, result) = {
                let world = self.world.lock();
                let lifecycle = self.lifecycle.lock();
                self.finish(&world, &lifecycle, EndReason::Terminated)
            };
            self.connections.broadcast(&msg, &members);
            self.report(result);
        }

        for slot in &slots {
            slot.connection.clear_room(self.id);
        }
        self.connections
            .broadcast(&ServerMsg::RoomLeft { room_id: self.id }, &members);

        info!(room_id = %self.id, released = slots.len(), "Room terminated");
    }

    /// Tick until the game ends, the room is stopped, or shutdown is signalled
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(room_id = %self.id, mode = %self.mode, "Room loop started");

        let mut tick_interval = interval(tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if self.is_stopped() {
                break;
            }

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;
            self.tick(dt);

            if self.status() == RoomStatus::Ended {
                break;
            }
        }

        info!(room_id = %self.id, "Room loop stopped");
    }

    /// Run a closure against the entity world
    pub fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.world.lock();
        f(&mut *world)
    }
}

//! WebSocket protocol message definitions
//! Every message travels as `{"type": ..., "payload": {...}}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::game::entity::{
    EffectKind, EntityId, EntityType, PlayerId, SkillId, Team, Vec2,
};
use crate::game::room::RoomRules;

/// Game modes players can queue for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Free-for-all
    DeathMatch,
    TeamDeathMatch,
    CapturePoint,
    FlagCapture,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [
        GameMode::DeathMatch,
        GameMode::TeamDeathMatch,
        GameMode::CapturePoint,
        GameMode::FlagCapture,
    ];

    /// Players needed before matchmaking forms a room
    pub fn required_players(self) -> usize {
        match self {
            GameMode::DeathMatch => 4,
            GameMode::TeamDeathMatch => 6,
            GameMode::CapturePoint => 8,
            GameMode::FlagCapture => 6,
        }
    }

    /// Whether players are split into Red and Blue
    pub fn is_team_based(self) -> bool {
        !matches!(self, GameMode::DeathMatch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::DeathMatch => "death_match",
            GameMode::TeamDeathMatch => "team_death_match",
            GameMode::CapturePoint => "capture_point",
            GameMode::FlagCapture => "flag_capture",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Ended,
}

fn default_character() -> u32 {
    1
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join an existing room
    JoinRoom {
        room_id: Uuid,
        #[serde(default = "default_character")]
        character_id: u32,
    },

    /// Create a room and join it
    CreateRoom {
        name: String,
        mode: GameMode,
        #[serde(default)]
        max_players: Option<usize>,
        #[serde(default)]
        map_id: Option<u32>,
        #[serde(default)]
        time_limit_secs: Option<f32>,
        #[serde(default)]
        score_limit: Option<u32>,
        #[serde(default)]
        friendly_fire: Option<bool>,
        #[serde(default)]
        private: Option<bool>,
        #[serde(default = "default_character")]
        character_id: u32,
    },

    LeaveRoom,
    Ready,
    Unready,

    /// Movement intent and skill use
    PlayerInput(PlayerInput),

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Wire names of every inbound message type
    pub const TYPES: [&'static str; 7] = [
        "join_room",
        "create_room",
        "leave_room",
        "ready",
        "unready",
        "player_input",
        "ping",
    ];
}

/// Player input for the current tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Desired movement direction; zero stops the player
    #[serde(default)]
    pub movement: Option<Vec2>,
    /// Facing in degrees
    #[serde(default)]
    pub rotation: Option<f32>,
    #[serde(default)]
    pub skill_id: Option<SkillId>,
    /// World position the skill is aimed at
    #[serde(default)]
    pub target: Option<Vec2>,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        player_id: PlayerId,
        server_time: u64,
    },

    /// Confirmation of room join
    RoomJoined {
        room: RoomSummary,
        entity_id: EntityId,
        team: Team,
        /// Everyone in the room at join time
        players: Vec<PlayerInfo>,
    },

    RoomLeft {
        room_id: Uuid,
    },

    PlayerJoined {
        player: PlayerInfo,
    },

    PlayerLeft {
        player_id: PlayerId,
        entity_id: EntityId,
    },

    /// Matchmaking placed the player in a room
    MatchFound {
        room_id: Uuid,
        name: String,
        mode: GameMode,
        max_players: usize,
        map_id: u32,
    },

    GameStart {
        room_id: Uuid,
        players: Vec<PlayerInfo>,
        rules: RoomRules,
        started_at: u64,
    },

    /// Per-tick simulation frame
    Frame(FramePayload),

    GameEnd {
        room_id: Uuid,
        reason: EndReason,
        scores: HashMap<PlayerId, u32>,
        players: Vec<PlayerTally>,
        duration_secs: f32,
    },

    Error {
        code: String,
        message: String,
    },

    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Room descriptor for listings and join confirmations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: Uuid,
    pub name: String,
    pub mode: GameMode,
    pub status: RoomStatus,
    pub players: usize,
    pub max_players: usize,
    pub map_id: u32,
    pub private: bool,
    pub created_at: DateTime<Utc>,
}

/// Player info for joins and game start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: PlayerId,
    pub entity_id: EntityId,
    pub character_id: u32,
    pub team: Team,
    pub ready: bool,
}

/// One projectile hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionEvent {
    /// Projectile
    pub entity_a: EntityId,
    /// Player
    pub entity_b: EntityId,
    pub position: Vec2,
    pub normal: Vec2,
    pub damage: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillEvent {
    pub killer: Option<PlayerId>,
    pub victim: PlayerId,
    pub assists: Vec<PlayerId>,
    pub position: Vec2,
}

/// Entity state carried in a frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    /// Firing player for projectiles, triggering entity for effects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<EffectKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame_id: u64,
    /// Server time in Unix milliseconds
    pub timestamp: u64,
    pub collisions: Vec<CollisionEvent>,
    pub kills: Vec<KillEvent>,
    pub scores: HashMap<PlayerId, u32>,
    /// Seconds of play left before the time limit
    pub remaining_time: f32,
    pub entities: Vec<EntitySnapshot>,
}

/// Why a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeLimit,
    ScoreLimit,
    Terminated,
}

/// Final per-player tallies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerTally {
    pub player_id: PlayerId,
    pub character_id: u32,
    pub team: Team,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed message: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Parse an inbound text frame
pub fn decode_client_msg(text: &str) -> Result<ClientMsg, ProtocolError> {
    match serde_json::from_str::<ClientMsg>(text) {
        Ok(msg) => Ok(msg),
        Err(err) => {
            let envelope: Envelope = serde_json::from_str(text)?;
            if ClientMsg::TYPES.contains(&envelope.kind.as_str()) {
                Err(ProtocolError::Serialization(err))
            } else {
                Err(ProtocolError::UnknownMessageType(envelope.kind))
            }
        }
    }
}

/// Serialize an outbound message
pub fn encode_server_msg(msg: &ServerMsg) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_player_input_envelope() {
        let text = json!({
            "type": "player_input",
            "payload": { "movement": { "x": 1.0, "y": 0.0 }, "skill_id": 2, "target": { "x": 5.0, "y": 6.0 } }
        })
        .to_string();

        match decode_client_msg(&text).unwrap() {
            ClientMsg::PlayerInput(input) => {
                assert_eq!(input.movement, Some(Vec2::new(1.0, 0.0)));
                assert_eq!(input.skill_id, Some(2));
                assert_eq!(input.target, Some(Vec2::new(5.0, 6.0)));
                assert!(input.rotation.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unit_messages_need_no_payload() {
        assert!(matches!(
            decode_client_msg(r#"{"type":"ready"}"#).unwrap(),
            ClientMsg::Ready
        ));
        assert!(matches!(
            decode_client_msg(r#"{"type":"leave_room"}"#).unwrap(),
            ClientMsg::LeaveRoom
        ));
    }

    #[test]
    fn join_room_defaults_character() {
        let id = Uuid::new_v4();
        let text = json!({ "type": "join_room", "payload": { "room_id": id } }).to_string();
        match decode_client_msg(&text).unwrap() {
            ClientMsg::JoinRoom { room_id, character_id } => {
                assert_eq!(room_id, id);
                assert_eq!(character_id, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_distinguished_from_bad_payload() {
        assert!(matches!(
            decode_client_msg(r#"{"type":"teleport","payload":{}}"#),
            Err(ProtocolError::UnknownMessageType(kind)) if kind == "teleport"
        ));
        assert!(matches!(
            decode_client_msg(r#"{"type":"join_room","payload":{"room_id":"nope"}}"#),
            Err(ProtocolError::Serialization(_))
        ));
        assert!(matches!(
            decode_client_msg("not json"),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn frame_uses_envelope_and_string_score_keys() {
        let mut scores = HashMap::new();
        scores.insert(42, 3);
        let msg = ServerMsg::Frame(FramePayload {
            frame_id: 7,
            timestamp: 1,
            collisions: vec![CollisionEvent {
                entity_a: 5,
                entity_b: 2,
                position: Vec2::new(1.0, 2.0),
                normal: Vec2::new(0.0, 1.0),
                damage: 10,
            }],
            kills: Vec::new(),
            scores,
            remaining_time: 12.5,
            entities: Vec::new(),
        });

        let value: serde_json::Value = serde_json::from_str(&encode_server_msg(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "frame");
        assert_eq!(value["payload"]["frame_id"], 7);
        assert_eq!(value["payload"]["scores"]["42"], 3);
        assert_eq!(value["payload"]["collisions"][0]["entity_a"], 5);
    }

    #[test]
    fn mode_requirements() {
        assert_eq!(GameMode::DeathMatch.required_players(), 4);
        assert_eq!(GameMode::TeamDeathMatch.required_players(), 6);
        assert_eq!(GameMode::CapturePoint.required_players(), 8);
        assert_eq!(GameMode::FlagCapture.required_players(), 6);
        assert!(!GameMode::DeathMatch.is_team_based());
        assert!(GameMode::CapturePoint.is_team_based());
    }
}

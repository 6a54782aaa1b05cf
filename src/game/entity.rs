//! Entity model - everything simulated inside a room

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::{Add, Mul, Sub};

/// Entity identifier, unique within a room
pub type EntityId = u64;

/// Player account identifier
pub type PlayerId = i64;

/// Skill identifier
pub type SkillId = u32;

/// 2D vector used for positions, velocities and directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    /// Unit vector in the same direction, or zero for a zero-length vector
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len > f32::EPSILON {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    /// Rotate counter-clockwise by `radians`
    pub fn rotated(self, radians: f32) -> Vec2 {
        let (sin, cos) = radians.sin_cos();
        Vec2::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    /// Heading of this vector in degrees, normalized to [0, 360)
    pub fn heading_degrees(self) -> f32 {
        normalize_degrees(self.y.atan2(self.x).to_degrees())
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Wrap an angle into [0, 360)
pub fn normalize_degrees(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Team assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    None,
    Red,
    Blue,
}

impl Team {
    /// Teams used by team-based modes, in assignment priority order
    pub const PLAYABLE: [Team; 2] = [Team::Red, Team::Blue];

    /// Whether two teams count as allies for friendly-fire purposes
    pub fn is_ally(self, other: Team) -> bool {
        self != Team::None && self == other
    }
}

/// Discriminant of an entity variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Player,
    Projectile,
    Effect,
}

/// Player-controlled combatant
#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub player_id: PlayerId,
    pub character_id: u32,
    pub team: Team,

    // Combat
    pub health: i32,
    pub max_health: i32,
    pub alive: bool,
    /// Seconds until respawn while dead
    pub respawn_countdown: f32,
    /// Remaining cooldown per skill, in seconds
    pub skill_cooldowns: HashMap<SkillId, f32>,
    /// Entities that damaged this player since its last respawn
    pub damaged_by: HashSet<EntityId>,

    // Stats
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl PlayerEntity {
    pub fn new(player_id: PlayerId, character_id: u32, team: Team, max_health: i32) -> Self {
        Self {
            player_id,
            character_id,
            team,
            health: max_health,
            max_health,
            alive: true,
            respawn_countdown: 0.0,
            skill_cooldowns: HashMap::new(),
            damaged_by: HashSet::new(),
            kills: 0,
            deaths: 0,
            assists: 0,
        }
    }

    pub fn is_on_cooldown(&self, skill_id: SkillId) -> bool {
        self.skill_cooldowns
            .get(&skill_id)
            .is_some_and(|remaining| *remaining > 0.0)
    }
}

/// Projectile spawned by a skill
#[derive(Debug, Clone)]
pub struct ProjectileEntity {
    /// Entity id of the player that fired it
    pub owner_id: EntityId,
    pub skill_id: SkillId,
    pub damage: i32,
    /// Remaining lifetime in seconds
    pub lifetime: f32,
    /// Whether the projectile survives hitting a target
    pub piercing: bool,
    /// Players already damaged by this projectile
    pub hit_entities: HashSet<EntityId>,
}

/// Visual effect kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Explosion,
    Respawn,
}

/// Short-lived cosmetic entity
#[derive(Debug, Clone)]
pub struct EffectEntity {
    pub effect: EffectKind,
    /// Remaining duration in seconds
    pub duration: f32,
    pub owner_id: Option<EntityId>,
}

/// Variant-specific entity data
#[derive(Debug, Clone)]
pub enum EntityKind {
    Player(PlayerEntity),
    Projectile(ProjectileEntity),
    Effect(EffectEntity),
}

/// A simulated object in a room
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub position: Vec2,
    /// Rotation in degrees (0-360)
    pub rotation: f32,
    pub velocity: Vec2,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: EntityId, position: Vec2, kind: EntityKind) -> Self {
        Self {
            id,
            position,
            rotation: 0.0,
            velocity: Vec2::ZERO,
            kind,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self.kind {
            EntityKind::Player(_) => EntityType::Player,
            EntityKind::Projectile(_) => EntityType::Projectile,
            EntityKind::Effect(_) => EntityType::Effect,
        }
    }

    pub fn as_player(&self) -> Option<&PlayerEntity> {
        match &self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut PlayerEntity> {
        match &mut self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_projectile(&self) -> Option<&ProjectileEntity> {
        match &self.kind {
            EntityKind::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_projectile_mut(&mut self) -> Option<&mut ProjectileEntity> {
        match &mut self.kind {
            EntityKind::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation = normalize_degrees(degrees);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wraps_into_range() {
        assert_eq!(normalize_degrees(370.0), 10.0);
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
    }

    #[test]
    fn heading_follows_direction() {
        assert!((Vec2::new(0.0, 1.0).heading_degrees() - 90.0).abs() < 1e-4);
        assert!((Vec2::new(-1.0, 0.0).heading_degrees() - 180.0).abs() < 1e-4);
    }

    #[test]
    fn normalized_zero_stays_zero() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
        let unit = Vec2::new(3.0, 4.0).normalized();
        assert!((unit.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn team_none_is_never_an_ally() {
        assert!(!Team::None.is_ally(Team::None));
        assert!(Team::Red.is_ally(Team::Red));
        assert!(!Team::Red.is_ally(Team::Blue));
    }

    #[test]
    fn variant_accessors_match_kind() {
        let player = Entity::new(
            1,
            Vec2::ZERO,
            EntityKind::Player(PlayerEntity::new(7, 1, Team::None, 100)),
        );
        assert_eq!(player.entity_type(), EntityType::Player);
        assert!(player.as_player().is_some());
        assert!(player.as_projectile().is_none());
    }

    #[test]
    fn cooldown_check_ignores_expired_entries() {
        let mut player = PlayerEntity::new(1, 1, Team::None, 100);
        player.skill_cooldowns.insert(1, 0.0);
        player.skill_cooldowns.insert(2, 0.3);
        assert!(!player.is_on_cooldown(1));
        assert!(player.is_on_cooldown(2));
        assert!(!player.is_on_cooldown(3));
    }
}

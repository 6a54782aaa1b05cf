//! Movement integration and circle overlap tests

use rand::Rng;

use super::entity::Vec2;

/// Player hitbox radius
pub const PLAYER_RADIUS: f32 = 20.0;
/// Projectile hitbox radius
pub const PROJECTILE_RADIUS: f32 = 10.0;
/// Player movement speed (units per second)
pub const PLAYER_SPEED: f32 = 200.0;

/// Playable area for a map
#[derive(Debug, Clone, Copy)]
pub struct MapBounds {
    pub width: f32,
    pub height: f32,
}

impl MapBounds {
    /// Bounds for a map id. All maps currently share one arena size.
    pub fn for_map(_map_id: u32) -> Self {
        Self {
            width: 1000.0,
            height: 1000.0,
        }
    }
}

/// Physics system for positions and overlap checks
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance a position by velocity over `dt` seconds
    pub fn integrate(position: Vec2, velocity: Vec2, dt: f32) -> Vec2 {
        position + velocity * dt
    }

    /// Velocity for a movement intent; the intent is treated as a direction
    pub fn movement_velocity(intent: Vec2) -> Vec2 {
        intent.normalized() * PLAYER_SPEED
    }

    /// Strict circle overlap: touching edges do not count
    pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
        a.distance(b) < radius_a + radius_b
    }

    /// Contact point and surface normal (pointing from `b` towards `a`)
    pub fn contact(a: Vec2, b: Vec2) -> (Vec2, Vec2) {
        let midpoint = Vec2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
        let normal = (a - b).normalized();
        (midpoint, normal)
    }

    /// Random spawn point inside the map, keeping a player radius from the edges
    pub fn random_spawn<R: Rng>(rng: &mut R, bounds: MapBounds) -> Vec2 {
        let margin = PLAYER_RADIUS;
        Vec2::new(
            rng.gen_range(margin..bounds.width - margin),
            rng.gen_range(margin..bounds.height - margin),
        )
    }
}

//! Entity storage and per-tick integration for one room

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use super::entity::{
    EffectEntity, EffectKind, Entity, EntityId, EntityKind, PlayerEntity, PlayerId, Vec2,
};
use super::physics::{MapBounds, PhysicsSystem};

/// Duration of the effect spawned when a player respawns
const RESPAWN_EFFECT_SECS: f32 = 0.5;

/// What happened during [`World::advance`]
#[derive(Debug, Default)]
pub struct AdvanceReport {
    pub respawned: Vec<EntityId>,
    pub expired: Vec<EntityId>,
}

/// Entities and scores of a single room (guarded by the room's entity lock)
pub struct World {
    entities: HashMap<EntityId, Entity>,
    scores: HashMap<PlayerId, u32>,
    /// Players who left mid-match, frozen at the moment they left
    departed: HashMap<PlayerId, PlayerEntity>,
    next_entity_id: EntityId,
    rng: ChaCha8Rng,
    bounds: MapBounds,
}

impl World {
    pub fn new(seed: u64, bounds: MapBounds) -> Self {
        Self {
            entities: HashMap::new(),
            scores: HashMap::new(),
            departed: HashMap::new(),
            next_entity_id: 1,
            rng: ChaCha8Rng::seed_from_u64(seed),
            bounds,
        }
    }

    /// Insert a new entity and return its freshly allocated id
    pub fn spawn(&mut self, position: Vec2, kind: EntityKind) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities.insert(id, Entity::new(id, position, kind));
        id
    }

    /// Spawn a player at a random spawn point
    pub fn spawn_player(&mut self, player: PlayerEntity) -> EntityId {
        let position = self.spawn_point();
        let player_id = player.player_id;
        let id = self.spawn(position, EntityKind::Player(player));
        self.scores.entry(player_id).or_insert(0);
        id
    }

    pub fn spawn_effect(
        &mut self,
        position: Vec2,
        effect: EffectKind,
        duration: f32,
        owner_id: Option<EntityId>,
    ) -> EntityId {
        self.spawn(
            position,
            EntityKind::Effect(EffectEntity {
                effect,
                duration,
                owner_id,
            }),
        )
    }

    pub fn spawn_point(&mut self) -> Vec2 {
        PhysicsSystem::random_spawn(&mut self.rng, self.bounds)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Remove a player's entity. With `keep_record` its score and tallies stay
    /// in the match results, otherwise its score entry goes too.
    pub fn remove_player(&mut self, id: EntityId, keep_record: bool) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        if let Some(player) = entity.as_player() {
            if keep_record {
                self.departed.insert(player.player_id, player.clone());
            } else {
                self.scores.remove(&player.player_id);
            }
        }
        Some(entity)
    }

    pub fn departed(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.departed.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Entity ids in ascending order, so pair iteration is deterministic
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn players(&self) -> impl Iterator<Item = (&Entity, &PlayerEntity)> {
        self.entities
            .values()
            .filter_map(|e| e.as_player().map(|p| (e, p)))
    }

    pub fn scores(&self) -> &HashMap<PlayerId, u32> {
        &self.scores
    }

    pub fn add_score(&mut self, player_id: PlayerId, points: u32) -> u32 {
        let score = self.scores.entry(player_id).or_insert(0);
        *score += points;
        *score
    }

    pub fn max_score(&self) -> u32 {
        self.scores.values().copied().max().unwrap_or(0)
    }

    /// Integrate positions, tick cooldowns, run respawns and expire timed entities
    pub fn advance(&mut self, dt: f32) -> AdvanceReport {
        let mut report = AdvanceReport::default();
        let Self {
            entities,
            rng,
            bounds,
            ..
        } = self;

        for entity in entities.values_mut() {
            entity.position = PhysicsSystem::integrate(entity.position, entity.velocity, dt);

            match &mut entity.kind {
                EntityKind::Player(player) => {
                    player.skill_cooldowns.retain(|_, remaining| {
                        *remaining -= dt;
                        *remaining > 0.0
                    });

                    if !player.alive {
                        player.respawn_countdown -= dt;
                        if player.respawn_countdown <= 0.0 {
                            player.alive = true;
                            player.health = player.max_health;
                            player.respawn_countdown = 0.0;
                            player.damaged_by.clear();
                            entity.position = PhysicsSystem::random_spawn(rng, *bounds);
                            entity.velocity = Vec2::ZERO;
                            report.respawned.push(entity.id);
                        }
                    }
                }
                EntityKind::Projectile(projectile) => {
                    projectile.lifetime -= dt;
                    if projectile.lifetime <= 0.0 {
                        report.expired.push(entity.id);
                    }
                }
                EntityKind::Effect(effect) => {
                    effect.duration -= dt;
                    if effect.duration <= 0.0 {
                        report.expired.push(entity.id);
                    }
                }
            }
        }

        for id in &report.expired {
            entities.remove(id);
        }

        for id in report.respawned.clone() {
            if let Some(position) = self.entities.get(&id).map(|e| e.position) {
                self.spawn_effect(position, EffectKind::Respawn, RESPAWN_EFFECT_SECS, Some(id));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{ProjectileEntity, Team};
    use std::collections::HashSet;

    fn world() -> World {
        World::new(7, MapBounds::for_map(1))
    }

    fn projectile(owner_id: EntityId, lifetime: f32) -> EntityKind {
        EntityKind::Projectile(ProjectileEntity {
            owner_id,
            skill_id: 1,
            damage: 10,
            lifetime,
            piercing: false,
            hit_entities: HashSet::new(),
        })
    }

    #[test]
    fn entity_ids_are_unique_and_increasing() {
        let mut world = world();
        let a = world.spawn(Vec2::ZERO, projectile(0, 1.0));
        let b = world.spawn(Vec2::ZERO, projectile(0, 1.0));
        assert_ne!(a, b);
        assert_eq!(world.sorted_ids(), vec![a, b]);
    }

    #[test]
    fn positions_advance_by_velocity() {
        let mut world = world();
        let id = world.spawn_player(PlayerEntity::new(1, 1, Team::None, 100));
        let start = world.get(id).unwrap().position;
        world.get_mut(id).unwrap().velocity = Vec2::new(120.0, -60.0);

        world.advance(0.25);

        let pos = world.get(id).unwrap().position;
        assert!((pos.x - (start.x + 30.0)).abs() < 1e-3);
        assert!((pos.y - (start.y - 15.0)).abs() < 1e-3);
    }

    #[test]
    fn cooldowns_decrement_and_clear() {
        let mut world = world();
        let id = world.spawn_player(PlayerEntity::new(1, 1, Team::None, 100));
        {
            let player = world.get_mut(id).unwrap().as_player_mut().unwrap();
            player.skill_cooldowns.insert(1, 0.5);
            player.skill_cooldowns.insert(2, 3.0);
        }

        world.advance(0.6);

        let player = world.get(id).unwrap().as_player().unwrap();
        assert!(!player.skill_cooldowns.contains_key(&1));
        assert!((player.skill_cooldowns[&2] - 2.4).abs() < 1e-4);
    }

    #[test]
    fn projectiles_expire_after_lifetime() {
        let mut world = world();
        let id = world.spawn(Vec2::ZERO, projectile(0, 0.1));
        let report = world.advance(0.05);
        assert!(report.expired.is_empty());
        assert!(world.get(id).is_some());

        let report = world.advance(0.05);
        assert_eq!(report.expired, vec![id]);
        assert!(world.get(id).is_none());
    }

    #[test]
    fn dead_player_respawns_only_after_countdown() {
        let mut world = world();
        let id = world.spawn_player(PlayerEntity::new(1, 1, Team::None, 100));
        {
            let entity = world.get_mut(id).unwrap();
            entity.velocity = Vec2::new(50.0, 50.0);
            let player = entity.as_player_mut().unwrap();
            player.alive = false;
            player.health = 0;
            player.respawn_countdown = 1.0;
        }

        world.advance(0.5);
        assert!(!world.get(id).unwrap().as_player().unwrap().alive);

        let report = world.advance(0.5);
        assert_eq!(report.respawned, vec![id]);
        let entity = world.get(id).unwrap();
        let player = entity.as_player().unwrap();
        assert!(player.alive);
        assert_eq!(player.health, player.max_health);
        assert_eq!(entity.velocity, Vec2::ZERO);
        // a respawn effect is spawned alongside the player
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn removing_player_before_match_drops_its_score() {
        let mut world = world();
        let id = world.spawn_player(PlayerEntity::new(42, 1, Team::None, 100));
        world.add_score(42, 3);
        assert_eq!(world.max_score(), 3);
        world.remove_player(id, false);
        assert!(world.scores().is_empty());
        assert_eq!(world.departed().count(), 0);
    }

    #[test]
    fn removing_player_mid_match_keeps_its_record() {
        let mut world = world();
        let id = world.spawn_player(PlayerEntity::new(42, 1, Team::None, 100));
        world.get_mut(id).unwrap().as_player_mut().unwrap().kills = 2;
        world.add_score(42, 7);

        assert!(world.remove_player(id, true).is_some());

        assert!(world.get(id).is_none());
        assert_eq!(world.scores()[&42], 7);
        assert_eq!(world.max_score(), 7);
        let departed: Vec<_> = world.departed().collect();
        assert_eq!(departed.len(), 1);
        assert_eq!(departed[0].kills, 2);
    }
}

//! Combat system - skills, damage, hit detection

use std::collections::HashSet;

use super::entity::{
    EffectKind, EntityId, EntityKind, EntityType, PlayerId, ProjectileEntity, SkillId, Team, Vec2,
};
use super::physics::{PhysicsSystem, PLAYER_RADIUS, PROJECTILE_RADIUS};
use super::world::World;

/// Seconds a dead player waits before respawning
pub const RESPAWN_SECS: f32 = 5.0;
/// Duration of the explosion effect spawned on a kill
pub const EXPLOSION_SECS: f32 = 0.6;

pub const SKILL_BASIC_SHOT: SkillId = 1;
pub const SKILL_SPREAD_SHOT: SkillId = 2;
pub const SKILL_PIERCING_SHOT: SkillId = 3;

/// Projectile parameters of a skill
#[derive(Debug, Clone, Copy)]
pub struct SkillStats {
    /// Number of projectiles fired per use
    pub projectile_count: u32,
    /// Angle between adjacent projectiles, in degrees
    pub spread_degrees: f32,
    pub projectile_speed: f32,
    pub damage: i32,
    /// Projectile lifetime (seconds)
    pub lifetime: f32,
    /// Cooldown between uses (seconds)
    pub cooldown: f32,
    pub piercing: bool,
}

impl SkillStats {
    pub fn for_skill(skill_id: SkillId) -> Option<Self> {
        match skill_id {
            SKILL_BASIC_SHOT => Some(Self {
                projectile_count: 1,
                spread_degrees: 0.0,
                projectile_speed: 500.0,
                damage: 10,
                lifetime: 2.0,
                cooldown: 0.5,
                piercing: false,
            }),
            SKILL_SPREAD_SHOT => Some(Self {
                projectile_count: 3,
                spread_degrees: 15.0,
                projectile_speed: 450.0,
                damage: 8,
                lifetime: 1.5,
                cooldown: 3.0,
                piercing: false,
            }),
            SKILL_PIERCING_SHOT => Some(Self {
                projectile_count: 1,
                spread_degrees: 0.0,
                projectile_speed: 400.0,
                damage: 15,
                lifetime: 3.0,
                cooldown: 5.0,
                piercing: true,
            }),
            _ => None,
        }
    }

    /// Angular offsets (radians) of each projectile, centred on the aim direction
    fn offsets(&self) -> impl Iterator<Item = f32> + '_ {
        let centre = (self.projectile_count as f32 - 1.0) / 2.0;
        (0..self.projectile_count)
            .map(move |i| ((i as f32 - centre) * self.spread_degrees).to_radians())
    }
}

/// A projectile striking a player
#[derive(Debug, Clone)]
pub struct HitResult {
    pub projectile_id: EntityId,
    pub target_id: EntityId,
    pub position: Vec2,
    pub normal: Vec2,
    pub damage: i32,
}

/// A player eliminated this tick
#[derive(Debug, Clone)]
pub struct KillRecord {
    /// Player credited with the kill, when the projectile owner is still present
    pub killer: Option<PlayerId>,
    pub victim: PlayerId,
    pub assists: Vec<PlayerId>,
    pub position: Vec2,
}

/// Everything the resolver did in one pass
#[derive(Debug, Default)]
pub struct CombatOutcome {
    pub hits: Vec<HitResult>,
    pub kills: Vec<KillRecord>,
}

/// Combat system for damage and projectile resolution
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
        let new_health = (current_health - damage).max(0);
        (new_health, new_health <= 0)
    }

    /// Fire a skill from `caster` towards `target`.
    ///
    /// Returns the spawned projectile ids. Unknown skills, skills on cooldown
    /// and dead or missing casters yield no projectiles.
    pub fn use_skill(
        world: &mut World,
        caster: EntityId,
        skill_id: SkillId,
        target: Vec2,
    ) -> Vec<EntityId> {
        let Some(stats) = SkillStats::for_skill(skill_id) else {
            return Vec::new();
        };

        let (origin, facing) = match world.get(caster) {
            Some(entity) => match entity.as_player() {
                Some(player) if player.alive && !player.is_on_cooldown(skill_id) => {
                    (entity.position, entity.rotation)
                }
                _ => return Vec::new(),
            },
            None => return Vec::new(),
        };

        // Aiming at our own position falls back to the current facing
        let mut direction = (target - origin).normalized();
        if direction == Vec2::ZERO {
            let radians = facing.to_radians();
            direction = Vec2::new(radians.cos(), radians.sin());
        }

        let mut spawned = Vec::with_capacity(stats.projectile_count as usize);
        for offset in stats.offsets() {
            let heading = direction.rotated(offset);
            let id = world.spawn(
                origin,
                EntityKind::Projectile(ProjectileEntity {
                    owner_id: caster,
                    skill_id,
                    damage: stats.damage,
                    lifetime: stats.lifetime,
                    piercing: stats.piercing,
                    hit_entities: HashSet::new(),
                }),
            );
            if let Some(projectile) = world.get_mut(id) {
                projectile.velocity = heading * stats.projectile_speed;
                projectile.set_rotation(heading.heading_degrees());
            }
            spawned.push(id);
        }

        if let Some(player) = world.get_mut(caster).and_then(|e| e.as_player_mut()) {
            player.skill_cooldowns.insert(skill_id, stats.cooldown);
        }

        spawned
    }

    /// Pairwise projectile-vs-player resolution for one tick
    pub fn resolve_collisions(world: &mut World, friendly_fire: bool) -> CombatOutcome {
        let mut outcome = CombatOutcome::default();
        let mut spent: HashSet<EntityId> = HashSet::new();
        let ids = world.sorted_ids();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                let pair = match (entity_type(world, a), entity_type(world, b)) {
                    (Some(EntityType::Projectile), Some(EntityType::Player)) => (a, b),
                    (Some(EntityType::Player), Some(EntityType::Projectile)) => (b, a),
                    _ => continue,
                };
                let (projectile_id, player_id) = pair;
                if spent.contains(&projectile_id) {
                    continue;
                }

                if let Some(hit) = Self::try_hit(world, projectile_id, player_id, friendly_fire) {
                    if !hit.piercing {
                        spent.insert(projectile_id);
                    }
                    if let Some(kill) = hit.kill {
                        outcome.kills.push(kill);
                    }
                    outcome.hits.push(hit.result);
                }
            }
        }

        for id in spent {
            world.remove(id);
        }

        outcome
    }

    fn try_hit(
        world: &mut World,
        projectile_id: EntityId,
        player_id: EntityId,
        friendly_fire: bool,
    ) -> Option<AppliedHit> {
        let projectile_entity = world.get(projectile_id)?;
        let projectile = projectile_entity.as_projectile()?;
        let projectile_pos = projectile_entity.position;
        let owner_id = projectile.owner_id;
        let damage = projectile.damage;
        let piercing = projectile.piercing;

        let target_entity = world.get(player_id)?;
        let target = target_entity.as_player()?;
        let target_pos = target_entity.position;

        if !target.alive || projectile.hit_entities.contains(&player_id) || owner_id == player_id {
            return None;
        }

        // A vanished owner skips the friendly-fire check and kill credit
        let owner = world
            .get(owner_id)
            .and_then(|e| e.as_player())
            .map(|p| (p.player_id, p.team));
        if let Some((_, owner_team)) = owner {
            if !friendly_fire && owner_team.is_ally(target.team) {
                return None;
            }
        }

        if !PhysicsSystem::circles_overlap(projectile_pos, PROJECTILE_RADIUS, target_pos, PLAYER_RADIUS) {
            return None;
        }

        if let Some(p) = world.get_mut(projectile_id).and_then(|e| e.as_projectile_mut()) {
            p.hit_entities.insert(player_id);
        }

        let entity = world.get_mut(player_id)?;
        let (killed, victim_player, contributors) = {
            let player = entity.as_player_mut()?;
            let (health, killed) = Self::apply_damage(player.health, damage);
            player.health = health;
            if owner.is_some() {
                player.damaged_by.insert(owner_id);
            }

            let mut contributors = Vec::new();
            if killed {
                player.alive = false;
                player.respawn_countdown = RESPAWN_SECS;
                player.deaths += 1;
                contributors = player.damaged_by.drain().filter(|id| *id != owner_id).collect();
            }
            (killed, player.player_id, contributors)
        };
        if killed {
            entity.velocity = Vec2::ZERO;
        }

        let (position, normal) = PhysicsSystem::contact(projectile_pos, target_pos);
        let result = HitResult {
            projectile_id,
            target_id: player_id,
            position,
            normal,
            damage,
        };

        let kill = killed.then(|| Self::credit_kill(world, owner, owner_id, victim_player, contributors, target_pos));

        Some(AppliedHit {
            result,
            kill,
            piercing,
        })
    }

    fn credit_kill(
        world: &mut World,
        owner: Option<(PlayerId, Team)>,
        owner_id: EntityId,
        victim: PlayerId,
        contributors: Vec<EntityId>,
        position: Vec2,
    ) -> KillRecord {
        let killer = owner.map(|(killer_player, _)| {
            if let Some(p) = world.get_mut(owner_id).and_then(|e| e.as_player_mut()) {
                p.kills += 1;
            }
            world.add_score(killer_player, 1);
            killer_player
        });

        let mut assists = Vec::new();
        for id in contributors {
            if let Some(p) = world.get_mut(id).and_then(|e| e.as_player_mut()) {
                p.assists += 1;
                assists.push(p.player_id);
            }
        }

        world.spawn_effect(position, EffectKind::Explosion, EXPLOSION_SECS, owner.map(|_| owner_id));

        KillRecord {
            killer,
            victim,
            assists,
            position,
        }
    }
}

struct AppliedHit {
    result: HitResult,
    kill: Option<KillRecord>,
    piercing: bool,
}

fn entity_type(world: &World, id: EntityId) -> Option<EntityType> {
    world.get(id).map(|e| e.entity_type())
}

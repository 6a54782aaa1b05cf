//! Frame building for network transmission

use crate::util::time::unix_millis;
use crate::ws::protocol::{
    CollisionEvent, EntitySnapshot, FramePayload, KillEvent, PlayerTally, ServerMsg,
};

use super::combat::CombatOutcome;
use super::entity::{EntityKind, PlayerEntity};
use super::world::World;

/// Build the per-tick frame broadcast
pub fn build_frame(
    frame_id: u64,
    world: &World,
    outcome: &CombatOutcome,
    remaining_time: f32,
) -> ServerMsg {
    let collisions = outcome
        .hits
        .iter()
        .map(|hit| CollisionEvent {
            entity_a: hit.projectile_id,
            entity_b: hit.target_id,
            position: hit.position,
            normal: hit.normal,
            damage: hit.damage,
        })
        .collect();

    let kills = outcome
        .kills
        .iter()
        .map(|kill| KillEvent {
            killer: kill.killer,
            victim: kill.victim,
            assists: kill.assists.clone(),
            position: kill.position,
        })
        .collect();

    ServerMsg::Frame(FramePayload {
        frame_id,
        timestamp: unix_millis(),
        collisions,
        kills,
        scores: world.scores().clone(),
        remaining_time,
        entities: snapshot_entities(world),
    })
}

/// Entity states ordered by id
pub fn snapshot_entities(world: &World) -> Vec<EntitySnapshot> {
    let mut entities: Vec<EntitySnapshot> = world
        .entities()
        .map(|e| {
            let player = e.as_player();
            let (owner_id, effect) = match &e.kind {
                EntityKind::Projectile(p) => (Some(p.owner_id), None),
                EntityKind::Effect(fx) => (fx.owner_id, Some(fx.effect)),
                EntityKind::Player(_) => (None, None),
            };
            EntitySnapshot {
                id: e.id,
                entity_type: e.entity_type(),
                position: e.position,
                rotation: e.rotation,
                velocity: e.velocity,
                player_id: player.map(|p| p.player_id),
                health: player.map(|p| p.health),
                alive: player.map(|p| p.alive),
                team: player.map(|p| p.team),
                owner_id,
                effect,
            }
        })
        .collect();
    entities.sort_by_key(|e| e.id);
    entities
}

/// Final tallies of present and departed players, best score first
pub fn player_tallies(world: &World) -> Vec<PlayerTally> {
    let scores = world.scores();
    let tally = |p: &PlayerEntity| PlayerTally {
        player_id: p.player_id,
        character_id: p.character_id,
        team: p.team,
        score: scores.get(&p.player_id).copied().unwrap_or(0),
        kills: p.kills,
        deaths: p.deaths,
        assists: p.assists,
    };
    let mut tallies: Vec<PlayerTally> = world
        .players()
        .map(|(_, p)| tally(p))
        .chain(world.departed().map(&tally))
        .collect();

    tallies.sort_by(|a, b| b.score.cmp(&a.score).then(a.player_id.cmp(&b.player_id)));
    tallies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityType, PlayerEntity, Team, Vec2};
    use crate::game::physics::MapBounds;

    #[test]
    fn tallies_are_ranked_by_score() {
        let mut world = World::new(1, MapBounds::for_map(1));
        world.spawn_player(PlayerEntity::new(10, 1, Team::None, 100));
        world.spawn_player(PlayerEntity::new(20, 2, Team::None, 100));
        world.add_score(20, 4);

        let tallies = player_tallies(&world);
        assert_eq!(tallies[0].player_id, 20);
        assert_eq!(tallies[0].score, 4);
        assert_eq!(tallies[1].player_id, 10);
        assert_eq!(tallies[1].score, 0);
    }

    #[test]
    fn tallies_include_departed_players() {
        let mut world = World::new(1, MapBounds::for_map(1));
        let leaver = world.spawn_player(PlayerEntity::new(10, 1, Team::None, 100));
        world.spawn_player(PlayerEntity::new(20, 2, Team::None, 100));
        world.add_score(10, 7);
        world.remove_player(leaver, true);

        let tallies = player_tallies(&world);
        let ids: Vec<_> = tallies.iter().map(|t| t.player_id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(tallies[0].score, 7);
    }

    #[test]
    fn frame_carries_scores_and_sorted_entities() {
        let mut world = World::new(1, MapBounds::for_map(1));
        let id = world.spawn_player(PlayerEntity::new(10, 1, Team::Blue, 100));
        world.spawn_effect(Vec2::ZERO, crate::game::entity::EffectKind::Explosion, 1.0, None);
        world.add_score(10, 2);

        match build_frame(5, &world, &CombatOutcome::default(), 42.0) {
            ServerMsg::Frame(frame) => {
                assert_eq!(frame.frame_id, 5);
                assert_eq!(frame.remaining_time, 42.0);
                assert_eq!(frame.scores[&10], 2);
                assert_eq!(frame.entities.len(), 2);
                assert_eq!(frame.entities[0].id, id);
                assert_eq!(frame.entities[0].team, Some(Team::Blue));
                assert_eq!(frame.entities[1].entity_type, EntityType::Effect);
                assert!(frame.entities[1].health.is_none());
                assert_eq!(frame.entities[1].effect, Some(crate::game::entity::EffectKind::Explosion));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }
}

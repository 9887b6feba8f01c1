//! Damage authority.

use crate::simulation::ServerSimulation;
use log::{debug, info};
use shared::{DamageOutcome, NetId, Packet};

impl ServerSimulation {
    /// Single server-side entry point for every damage source.
    ///
    /// Health is clamped into `[0, max]`. The first hit that brings it to zero
    /// broadcasts the final value and the death, then removes the entity: pooled
    /// kinds go back to their pool, ships get a final despawn.
    pub fn take_damage(&mut self, target: NetId, amount: f32) -> DamageOutcome {
        let Some(entity) = self.world.by_net_id_mut(target) else {
            debug!("Damage for unknown entity {}", target);
            return DamageOutcome::Ignored;
        };
        let Some(health) = entity.health.as_mut() else {
            debug!("Entity {} has no health record", target);
            return DamageOutcome::Ignored;
        };

        let outcome = match health.apply_damage(amount) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Damage on {} refused: {}", target, e);
                return DamageOutcome::Ignored;
            }
        };

        if outcome == DamageOutcome::Died {
            self.handle_death(target);
        }
        outcome
    }

    fn handle_death(&mut self, target: NetId) {
        self.flush_entity(target);
        self.outbox.broadcast(Packet::EntityDied { id: target });

        let owner = self.world.by_net_id(target).and_then(|e| e.owner);
        if let Some(client) = owner {
            if self.players.get(&client) == Some(&target) {
                info!("Player {} ship {} destroyed", client, target);
                self.players.remove(&client);
            }
        }
        self.despawn(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use shared::{
        CatalogSlot, ObjectConfig, Outbound, PrefabKind, ScalarValue, Transform, WorldConfig,
    };
    use std::sync::Arc;

    fn sim() -> ServerSimulation {
        ServerSimulation::with_defaults(WorldConfig {
            items_per_sector: 0,
            bullet_prewarm: 0,
            object_prewarm: 0,
            ..WorldConfig::default()
        })
    }

    fn spawn_rock(sim: &mut ServerSimulation, max_health: f32) -> NetId {
        let config = Arc::new(ObjectConfig::new("props/test", max_health, 5.0, 10.0));
        sim.spawner()
            .spawn_object(
                Transform::new(Vec2::new(300.0, 0.0), 0.0),
                CatalogSlot::Primary,
                0,
                config,
            )
            .unwrap()
    }

    #[test]
    fn test_two_lethal_hits_kill_once() {
        let mut sim = sim();
        let rock = spawn_rock(&mut sim, 100.0);
        sim.outbox_mut().drain().for_each(drop);

        assert_eq!(sim.take_damage(rock, 60.0), DamageOutcome::Damaged { health: 40.0 });
        assert_eq!(sim.take_damage(rock, 60.0), DamageOutcome::Died);
        assert_eq!(sim.take_damage(rock, 60.0), DamageOutcome::Ignored);

        let sent: Vec<Outbound> = sim.outbox_mut().drain().collect();
        let deaths = sent
            .iter()
            .filter(|o| matches!(o.packet(), Packet::EntityDied { .. }))
            .count();
        assert_eq!(deaths, 1);
        assert!(sent.iter().any(|o| matches!(
            o.packet(),
            Packet::ScalarChanged { value: ScalarValue::Health(h), .. } if *h == 0.0
        )));
        assert_eq!(sim.pool().free_count(PrefabKind::WorldObject), 1);
        assert!(!sim.world().is_spawned(rock));
    }

    #[test]
    fn test_non_positive_damage_is_ignored() {
        let mut sim = sim();
        let rock = spawn_rock(&mut sim, 50.0);
        assert_eq!(sim.take_damage(rock, 0.0), DamageOutcome::Ignored);
        assert_eq!(sim.take_damage(rock, -10.0), DamageOutcome::Ignored);
        assert_eq!(sim.take_damage(rock, f32::INFINITY), DamageOutcome::Ignored);
    }

    #[test]
    fn test_dead_ship_gets_final_despawn() {
        let mut sim = sim();
        let ship = sim.connect_player(4).unwrap();

        assert_eq!(sim.take_damage(ship, 1_000.0), DamageOutcome::Died);
        assert!(!sim.world().is_spawned(ship));
        assert!(sim.player_ship(4).is_none());
        assert_eq!(sim.pool().total_count(PrefabKind::Ship), 0);
    }

    #[test]
    fn test_client_may_only_report_damage_on_own_ship() {
        let mut sim = sim();
        let ship = sim.connect_player(1).unwrap();
        let rock = spawn_rock(&mut sim, 50.0);

        assert!(!sim.handle_request(1, Packet::DamageRequest { target: rock, amount: 10.0 }));
        assert!(sim.handle_request(1, Packet::DamageRequest { target: ship, amount: 10.0 }));
        let health = sim
            .world()
            .by_net_id(ship)
            .and_then(|e| e.health.as_ref())
            .map(|h| h.current())
            .unwrap();
        assert_eq!(health, 90.0);
    }
}

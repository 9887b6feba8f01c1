//! Authoritative ability activation.
//!
//! The server re-checks every activation against its own cooldown copy. A
//! rejected request produces no packet at all; the owner's prediction is
//! overwritten by the next snapshot instead.

use crate::simulation::{ServerSimulation, Spawner, TimerKey};
use glam::Vec2;
use log::{debug, warn};
use shared::ability::{activation_direction, blink_destination, dash_velocity, projectile_launch};
use shared::math::heading;
use shared::{AbilityEffect, AbilityKind, ClientId, NetId, Packet, PrefabKind, Transform};

impl ServerSimulation {
    /// Judges one activation request from `client`. Returns whether it was accepted.
    pub fn activate_ability(&mut self, client: ClientId, ability: AbilityKind, direction: Vec2) -> bool {
        let Some(ship_id) = self.players.get(&client).copied() else {
            return false;
        };
        let Some(ship) = self.world.by_net_id_mut(ship_id) else {
            return false;
        };
        let (Some(config), Some(abilities)) = (ship.config.ship().cloned(), ship.abilities.as_mut())
        else {
            debug!("Ship {} has no ability records", ship_id);
            return false;
        };
        let Some(direction) = activation_direction(direction, *ship.rotation.get()) else {
            debug!("Malformed {:?} direction from client {}", ability, client);
            return false;
        };

        let state = abilities.get_mut(ability);
        if !state.try_activate(direction) {
            debug!(
                "Rejected {:?} from client {} (cooldown {:.2}s, enabled {})",
                ability,
                client,
                state.cooldown.remaining(),
                state.enabled
            );
            return false;
        }

        match ability {
            AbilityKind::Dash => {
                ship.velocity = dash_velocity(direction, &config);
                let _ = ship.dash_active.set(true);
                let effect = AbilityEffect::DashStarted {
                    position: ship.position,
                    velocity: ship.velocity,
                };
                self.timers.schedule(
                    TimerKey::AbilityEnd {
                        entity: ship_id,
                        ability,
                    },
                    config.dash_duration,
                );
                self.outbox.broadcast(Packet::AbilityEffect {
                    id: ship_id,
                    effect,
                });
            }
            AbilityKind::Blink => {
                ship.position = blink_destination(ship.position, direction, &config);
                ship.velocity = Vec2::ZERO;
                let _ = ship.dash_active.set(true);
                let effect = AbilityEffect::BlinkedTo {
                    position: ship.position,
                };
                self.timers.schedule(
                    TimerKey::AbilityEnd {
                        entity: ship_id,
                        ability,
                    },
                    config.blink_duration,
                );
                self.outbox.broadcast(Packet::AbilityEffect {
                    id: ship_id,
                    effect,
                });
            }
            AbilityKind::Shoot => {
                let ship_index = match ship.config {
                    crate::world::ConfigBinding::Ship { index, .. } => index,
                    _ => 0,
                };
                let team = *ship.team.get();
                let (muzzle, velocity) = projectile_launch(ship.position, direction, &config);
                let rotation = heading(direction).unwrap_or_default();

                let mut spawner = Spawner {
                    world: &mut self.world,
                    pool: &mut self.pool,
                    outbox: &mut self.outbox,
                };
                let bullet = match spawner.acquire(PrefabKind::Bullet, Transform::new(muzzle, rotation)) {
                    Ok(bullet) => bullet,
                    Err(e) => {
                        warn!("No bullet available for ship {}: {}", ship_id, e);
                        return true;
                    }
                };
                spawner.world.bind_bullet(
                    bullet,
                    ship_id,
                    Some(client),
                    team,
                    ship_index,
                    config.clone(),
                    velocity,
                );
                // The shooter already shows its own local projectile.
                if let Some(bullet_id) = spawner.spawn(bullet, Some(client)) {
                    self.timers
                        .schedule(TimerKey::BulletExpiry(bullet_id), config.bullet_lifetime);
                }
            }
        }
        true
    }

    /// Authoritative end of a timed ability. Firing twice, or after the entity
    /// was recycled, does nothing.
    pub fn end_ability(&mut self, entity: NetId, ability: AbilityKind) -> bool {
        let Some(ship) = self.world.by_net_id_mut(entity) else {
            return false;
        };
        let Some(abilities) = ship.abilities.as_mut() else {
            return false;
        };
        if !abilities.get_mut(ability).end() {
            return false;
        }
        if !abilities.movement_locked() {
            let _ = ship.dash_active.set(false);
        }

        self.outbox.broadcast(Packet::AbilityEffect {
            id: entity,
            effect: AbilityEffect::Ended { ability },
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Outbound, ShipConfig, WorldConfig};

    fn setup() -> (ServerSimulation, NetId) {
        let config = WorldConfig {
            items_per_sector: 0,
            bullet_prewarm: 0,
            object_prewarm: 0,
            ..WorldConfig::default()
        };
        let mut sim = ServerSimulation::with_defaults(config);
        let ship = sim.connect_player(1).unwrap();
        sim.outbox_mut().drain().for_each(drop);
        (sim, ship)
    }

    fn effects(sim: &mut ServerSimulation) -> Vec<AbilityEffect> {
        sim.outbox_mut()
            .drain()
            .filter_map(|o| match o.packet() {
                Packet::AbilityEffect { effect, .. } => Some(*effect),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_dash_rejected_during_cooldown() {
        let (mut sim, ship) = setup();
        assert!(sim.activate_ability(1, AbilityKind::Dash, Vec2::X));
        assert_eq!(effects(&mut sim).len(), 1);

        sim.tick(0.7);
        let remaining = sim
            .world()
            .by_net_id(ship)
            .and_then(|e| e.abilities.as_ref())
            .map(|a| a.dash.cooldown.remaining())
            .unwrap();
        assert_approx_eq!(remaining, 0.3, 1e-4);
        sim.outbox_mut().drain().for_each(drop);

        assert!(!sim.activate_ability(1, AbilityKind::Dash, Vec2::X));
        assert!(effects(&mut sim).is_empty());
        let after = sim
            .world()
            .by_net_id(ship)
            .and_then(|e| e.abilities.as_ref())
            .map(|a| a.dash.cooldown.remaining())
            .unwrap();
        assert_approx_eq!(after, 0.3, 1e-4);
    }

    #[test]
    fn test_dash_locks_movement_until_server_end() {
        let (mut sim, ship) = setup();
        sim.handle_request(
            1,
            Packet::Input {
                sequence: 1,
                timestamp: 0,
                movement: Vec2::Y,
                aim: 0.0,
            },
        );
        assert!(sim.activate_ability(1, AbilityKind::Dash, Vec2::X));
        let config = ShipConfig::default();

        sim.tick(0.1);
        let entity = sim.world().by_net_id(ship).unwrap();
        assert!(*entity.dash_active.get());
        assert_approx_eq!(entity.velocity.x, config.dash_speed);
        assert_approx_eq!(entity.velocity.y, 0.0);

        sim.tick(0.15);
        let entity = sim.world().by_net_id(ship).unwrap();
        assert!(!*entity.dash_active.get());
        assert_approx_eq!(entity.velocity.y, config.move_speed);

        let ended = sim.outbox_mut().drain().any(|o| {
            matches!(
                o.packet(),
                Packet::AbilityEffect {
                    effect: AbilityEffect::Ended {
                        ability: AbilityKind::Dash
                    },
                    ..
                }
            )
        });
        assert!(ended);
    }

    #[test]
    fn test_end_ability_is_idempotent() {
        let (mut sim, ship) = setup();
        assert!(sim.activate_ability(1, AbilityKind::Blink, Vec2::X));
        assert!(sim.end_ability(ship, AbilityKind::Blink));
        assert!(!sim.end_ability(ship, AbilityKind::Blink));
        assert!(!sim.end_ability(NetId(9_999), AbilityKind::Blink));
    }

    #[test]
    fn test_blink_teleports() {
        let (mut sim, ship) = setup();
        assert!(sim.activate_ability(1, AbilityKind::Blink, Vec2::new(0.0, 3.0)));
        let position = sim.world().by_net_id(ship).unwrap().position;
        assert_approx_eq!(position.y, ShipConfig::default().blink_distance);
        assert!(matches!(
            effects(&mut sim)[0],
            AbilityEffect::BlinkedTo { .. }
        ));
    }

    #[test]
    fn test_shot_spawns_pooled_bullet_for_everyone_but_shooter() {
        let (mut sim, _ship) = setup();
        assert_eq!(sim.pool().total_count(PrefabKind::Bullet), 0);

        assert!(sim.activate_ability(1, AbilityKind::Shoot, Vec2::X));
        assert_eq!(sim.pool().total_count(PrefabKind::Bullet), 1);
        assert_eq!(sim.pool().active_count(PrefabKind::Bullet), 1);

        let spawn = sim
            .outbox_mut()
            .drain()
            .find(|o| matches!(o.packet(), Packet::EntitySpawned(info) if info.prefab == PrefabKind::Bullet))
            .unwrap();
        assert!(matches!(spawn, Outbound::Broadcast { exclude: Some(1), .. }));

        // Second shot inside the cooldown is refused.
        assert!(!sim.activate_ability(1, AbilityKind::Shoot, Vec2::X));
        assert_eq!(sim.pool().active_count(PrefabKind::Bullet), 1);
    }

    #[test]
    fn test_bullet_expires_back_into_pool() {
        let (mut sim, _ship) = setup();
        assert!(sim.activate_ability(1, AbilityKind::Shoot, Vec2::X));
        let lifetime = ShipConfig::default().bullet_lifetime;

        sim.tick(lifetime + 0.01);
        assert_eq!(sim.pool().active_count(PrefabKind::Bullet), 0);
        assert_eq!(sim.pool().free_count(PrefabKind::Bullet), 1);
    }

    #[test]
    fn test_malformed_direction_rejected_without_cooldown() {
        let (mut sim, ship) = setup();
        assert!(!sim.activate_ability(1, AbilityKind::Dash, Vec2::new(f32::NAN, 0.0)));
        let ready = sim
            .world()
            .by_net_id(ship)
            .and_then(|e| e.abilities.as_ref())
            .map(|a| a.dash.cooldown.is_ready())
            .unwrap();
        assert!(ready);
    }
}

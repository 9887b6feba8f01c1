//! Owner-side prediction.
//!
//! Every step the owning client applies its own input to its ship straight
//! away, using the same kinematics the server runs, and sends the matching
//! requests. Nothing here is authoritative: snapshots and scalar updates
//! overwrite whatever was guessed, and there is no input replay afterwards.
//!
//! Rejections are never announced. Every accepted dash or blink is broadcast as
//! an ability effect before the snapshot acknowledging it, so a timed
//! activation whose sequence number is acknowledged without a matching effect
//! counts as rejected.

use crate::input::{timestamp, InputFrame};
use crate::world::ClientWorld;
use glam::Vec2;
use log::debug;
use shared::ability::{
    activation_direction, blink_destination, dash_velocity, movement_velocity, projectile_launch,
};
use shared::math::{clamp_axis, rotate_towards};
use shared::{AbilityKind, Outbox, Packet, TimerWheel};
use std::collections::VecDeque;

/// Cosmetic shot shown only on the shooter's screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjectile {
    pub position: Vec2,
    pub velocity: Vec2,
    pub remaining: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingActivation {
    sequence: u32,
    ability: AbilityKind,
    confirmed: bool,
}

#[derive(Debug)]
pub struct Predictor {
    next_sequence: u32,
    last_acked: u32,
    pending: VecDeque<PendingActivation>,
    /// Local end of dash and blink, run in parallel with the server's timer.
    timers: TimerWheel<AbilityKind>,
    projectiles: Vec<LocalProjectile>,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            last_acked: 0,
            pending: VecDeque::new(),
            timers: TimerWheel::new(),
            projectiles: Vec::new(),
        }
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn projectiles(&self) -> &[LocalProjectile] {
        &self.projectiles
    }

    /// Forgets everything predicted so far, e.g. after the ship was lost.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.timers = TimerWheel::new();
        self.projectiles.clear();
    }

    fn take_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    /// Runs one predicted step for the owned ship and queues the requests it implies.
    pub fn step(&mut self, world: &mut ClientWorld, input: &InputFrame, dt: f32, outbox: &mut Outbox) {
        let dt = dt.max(0.0);
        self.advance_projectiles(dt);

        let Some(ship_id) = world.owned_ship() else {
            return;
        };
        let ended = self.timers.advance(dt);
        let Some(ship) = world.get_mut(ship_id) else {
            return;
        };
        let Some(config) = ship.ship_config().cloned() else {
            return;
        };
        let Some(abilities) = ship.abilities.as_mut() else {
            return;
        };

        for ability in ended {
            abilities.get_mut(ability).end();
        }

        for activation in &input.activations {
            let Some(direction) = activation_direction(activation.direction, ship.display_rotation)
            else {
                debug!("Dropping {:?} with malformed direction", activation.ability);
                continue;
            };
            let state = abilities.get_mut(activation.ability);
            if !state.can_activate() {
                debug!(
                    "{:?} not ready locally ({:.2}s left)",
                    activation.ability,
                    state.cooldown.remaining()
                );
                continue;
            }
            state.try_activate(direction);

            match activation.ability {
                AbilityKind::Dash => {
                    ship.velocity = dash_velocity(direction, &config);
                    let _ = ship.dash_active.predict(true);
                    self.timers.schedule(AbilityKind::Dash, config.dash_duration);
                }
                AbilityKind::Blink => {
                    ship.position = blink_destination(ship.position, direction, &config);
                    ship.velocity = Vec2::ZERO;
                    let _ = ship.dash_active.predict(true);
                    self.timers.schedule(AbilityKind::Blink, config.blink_duration);
                }
                AbilityKind::Shoot => {
                    let (position, velocity) = projectile_launch(ship.position, direction, &config);
                    self.projectiles.push(LocalProjectile {
                        position,
                        velocity,
                        remaining: config.bullet_lifetime,
                    });
                }
            }

            let sequence = self.take_sequence();
            self.pending.push_back(PendingActivation {
                sequence,
                ability: activation.ability,
                confirmed: false,
            });
            outbox.send_to_server(Packet::ActivateAbility {
                sequence,
                ability: activation.ability,
                direction,
            });
        }

        abilities.tick(dt);
        let movement = clamp_axis(input.movement);
        if !abilities.movement_locked() {
            ship.velocity = movement_velocity(movement, config.move_speed);
        }

        let aim = input
            .aim
            .filter(|aim| aim.is_finite())
            .unwrap_or(ship.display_rotation);
        let rotation = rotate_towards(ship.display_rotation, aim, config.rotation_speed * dt);
        ship.display_rotation = rotation;
        let _ = ship.rotation.predict(rotation);

        ship.position += ship.velocity * dt;

        let sequence = self.take_sequence();
        outbox.send_to_server(Packet::Input {
            sequence,
            timestamp: timestamp(),
            movement,
            aim,
        });
    }

    fn advance_projectiles(&mut self, dt: f32) {
        for projectile in &mut self.projectiles {
            projectile.position += projectile.velocity * dt;
            projectile.remaining -= dt;
        }
        self.projectiles.retain(|p| p.remaining > 0.0);
    }

    /// Records the server's effect for the oldest unconfirmed activation of `ability`.
    pub fn confirm(&mut self, ability: AbilityKind) -> bool {
        match self
            .pending
            .iter_mut()
            .find(|p| p.ability == ability && !p.confirmed)
        {
            Some(pending) => {
                pending.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Settles every activation the server has now judged. Returns the ones it rejected.
    pub fn on_ack(&mut self, world: &mut ClientWorld, acked: u32) -> Vec<AbilityKind> {
        if acked < self.last_acked {
            return Vec::new();
        }
        self.last_acked = acked;

        let mut rejected = Vec::new();
        let ship_id = world.owned_ship();
        while let Some(front) = self.pending.front().copied() {
            if front.sequence > acked {
                break;
            }
            self.pending.pop_front();
            if !front.ability.is_timed() || front.confirmed {
                continue;
            }

            let Some(ship) = ship_id.and_then(|id| world.get_mut(id)) else {
                continue;
            };
            debug!(
                "{:?} (request {}) was not confirmed, reverting to server state",
                front.ability, front.sequence
            );
            ship.dash_active.discard_prediction();
            if let Some(abilities) = ship.abilities.as_mut() {
                abilities.get_mut(front.ability).end();
            }
            self.timers.cancel(&front.ability);
            ship.position = ship.server_position;
            ship.velocity = ship.server_velocity;
            rejected.push(front.ability);
        }
        rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{
        ConfigRef, NetId, Outbound, PrefabKind, ScalarValue, ShipConfig, SpawnInfo, Team,
        Transform, WorldConfig,
    };

    const DT: f32 = 1.0 / 60.0;

    fn setup() -> (ClientWorld, Predictor, Outbox) {
        let mut world = ClientWorld::with_defaults(WorldConfig {
            bullet_prewarm: 0,
            object_prewarm: 0,
            ..WorldConfig::default()
        });
        world.set_local_client(Some(1));
        world.apply_spawn(SpawnInfo {
            id: NetId(1),
            prefab: PrefabKind::Ship,
            transform: Transform::default(),
            velocity: Vec2::ZERO,
            owner: Some(1),
            team: Team::Friend,
            config: ConfigRef::Ship { index: 0 },
            health: Some(100.0),
        });
        (world, Predictor::new(), Outbox::new())
    }

    fn sent(outbox: &mut Outbox) -> Vec<Packet> {
        outbox.drain().map(|o| o.packet().clone()).collect()
    }

    #[test]
    fn test_movement_applies_immediately() {
        let (mut world, mut predictor, mut outbox) = setup();
        predictor.step(&mut world, &InputFrame::moving(Vec2::X), DT, &mut outbox);

        let ship = world.get(NetId(1)).unwrap();
        assert_approx_eq!(ship.position.x, ShipConfig::default().move_speed * DT);
        let packets = sent(&mut outbox);
        assert!(matches!(packets.as_slice(), [Packet::Input { sequence: 1, .. }]));
    }

    #[test]
    fn test_dash_predicted_and_requested() {
        let (mut world, mut predictor, mut outbox) = setup();
        let frame = InputFrame::moving(Vec2::Y).with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &frame, DT, &mut outbox);

        let ship = world.get(NetId(1)).unwrap();
        assert!(*ship.dash_active.get());
        assert!(!*ship.dash_active.confirmed());
        assert_eq!(ship.velocity, Vec2::X * ShipConfig::default().dash_speed);

        let packets = sent(&mut outbox);
        assert!(matches!(
            packets[0],
            Packet::ActivateAbility {
                sequence: 1,
                ability: AbilityKind::Dash,
                ..
            }
        ));
        assert!(matches!(packets[1], Packet::Input { sequence: 2, .. }));
        assert_eq!(predictor.pending_len(), 1);
    }

    #[test]
    fn test_no_request_while_locally_cooling_down() {
        let (mut world, mut predictor, mut outbox) = setup();
        let dash = InputFrame::idle().with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &dash, DT, &mut outbox);
        outbox.drain().for_each(drop);

        for _ in 0..30 {
            predictor.step(&mut world, &dash, DT, &mut outbox);
        }
        let activations = sent(&mut outbox)
            .into_iter()
            .filter(|p| matches!(p, Packet::ActivateAbility { .. }))
            .count();
        assert_eq!(activations, 0);
    }

    #[test]
    fn test_unconfirmed_dash_is_reverted_on_ack() {
        let (mut world, mut predictor, mut outbox) = setup();
        let dash = InputFrame::idle().with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &dash, DT, &mut outbox);
        assert!(world.get(NetId(1)).unwrap().position.x > 0.0);

        // The server's answer is silence, then a snapshot acking both requests.
        let rejected = predictor.on_ack(&mut world, 2);
        assert_eq!(rejected, vec![AbilityKind::Dash]);

        let ship = world.get(NetId(1)).unwrap();
        assert!(!*ship.dash_active.get());
        assert_eq!(ship.position, ship.server_position);
        assert!(!ship.abilities.as_ref().unwrap().movement_locked());
        assert_eq!(predictor.pending_len(), 0);
    }

    #[test]
    fn test_confirmed_dash_is_kept() {
        let (mut world, mut predictor, mut outbox) = setup();
        let dash = InputFrame::idle().with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &dash, DT, &mut outbox);

        world.apply_scalar(NetId(1), 1, ScalarValue::DashActive(true));
        assert!(predictor.confirm(AbilityKind::Dash));
        assert!(predictor.on_ack(&mut world, 2).is_empty());
        assert!(*world.get(NetId(1)).unwrap().dash_active.get());
        assert!(world.get(NetId(1)).unwrap().abilities.as_ref().unwrap().dash.active);
    }

    #[test]
    fn test_dash_during_blink_is_kept_without_flag_change() {
        let (mut world, mut predictor, mut outbox) = setup();
        let blink = InputFrame::idle().with_activation(AbilityKind::Blink, Vec2::Y);
        predictor.step(&mut world, &blink, DT, &mut outbox);
        world.apply_scalar(NetId(1), 1, ScalarValue::DashActive(true));
        assert!(predictor.confirm(AbilityKind::Blink));
        assert!(predictor.on_ack(&mut world, 2).is_empty());

        // The flag is already set, so the only sign of acceptance is the effect.
        let dash = InputFrame::idle().with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &dash, DT, &mut outbox);
        assert!(predictor.confirm(AbilityKind::Dash));
        assert!(predictor.on_ack(&mut world, 4).is_empty());
        assert!(world.get(NetId(1)).unwrap().abilities.as_ref().unwrap().dash.active);
    }

    #[test]
    fn test_confirm_without_pending_activation() {
        let (_, mut predictor, _) = setup();
        assert!(!predictor.confirm(AbilityKind::Dash));
    }

    #[test]
    fn test_local_timer_ends_dash() {
        let (mut world, mut predictor, mut outbox) = setup();
        let dash = InputFrame::moving(Vec2::Y).with_activation(AbilityKind::Dash, Vec2::X);
        predictor.step(&mut world, &dash, DT, &mut outbox);

        let steps = (ShipConfig::default().dash_duration / DT).ceil() as usize + 1;
        for _ in 0..steps {
            predictor.step(&mut world, &InputFrame::moving(Vec2::Y), DT, &mut outbox);
        }
        let ship = world.get(NetId(1)).unwrap();
        assert!(!ship.abilities.as_ref().unwrap().movement_locked());
        assert_eq!(ship.velocity, Vec2::Y * ShipConfig::default().move_speed);
    }

    #[test]
    fn test_blink_teleports_locally() {
        let (mut world, mut predictor, mut outbox) = setup();
        let blink = InputFrame::idle().with_activation(AbilityKind::Blink, Vec2::Y);
        predictor.step(&mut world, &blink, DT, &mut outbox);

        let ship = world.get(NetId(1)).unwrap();
        assert_approx_eq!(ship.position.y, ShipConfig::default().blink_distance);
        assert_eq!(ship.velocity, Vec2::ZERO);
    }

    #[test]
    fn test_local_projectile_expires() {
        let (mut world, mut predictor, mut outbox) = setup();
        let shot = InputFrame::idle().with_activation(AbilityKind::Shoot, Vec2::X);
        predictor.step(&mut world, &shot, DT, &mut outbox);
        assert_eq!(predictor.projectiles().len(), 1);

        let lifetime = ShipConfig::default().bullet_lifetime;
        predictor.step(&mut world, &InputFrame::idle(), lifetime + DT, &mut outbox);
        assert!(predictor.projectiles().is_empty());

        // Shots are never reverted: there is nothing to confirm them by.
        assert!(predictor.on_ack(&mut world, 10).is_empty());
        assert!(outbox
            .iter()
            .all(|o| matches!(o, Outbound::ToServer(_))));
    }

    #[test]
    fn test_rotation_predicted_towards_aim() {
        let (mut world, mut predictor, mut outbox) = setup();
        let frame = InputFrame {
            aim: Some(1.0),
            ..InputFrame::idle()
        };
        predictor.step(&mut world, &frame, DT, &mut outbox);

        let ship = world.get(NetId(1)).unwrap();
        let step = ShipConfig::default().rotation_speed * DT;
        assert_approx_eq!(ship.display_rotation, step);
        assert_approx_eq!(*ship.rotation.get(), step);
    }
}

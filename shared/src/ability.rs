//! Ability state and the kinematics both sides run identically.
//!
//! The server applies these to its authoritative copy; the owning client applies
//! the very same functions to its predicted copy, so a prediction only diverges
//! when the server rejects or reorders something.

use crate::config::ShipConfig;
use crate::math::{clamp_axis, forward};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Event-triggered abilities. Movement and rotation are continuous and ride on
/// the input stream instead.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbilityKind {
    Dash,
    Blink,
    Shoot,
}

impl AbilityKind {
    pub const ALL: [AbilityKind; 3] = [AbilityKind::Dash, AbilityKind::Blink, AbilityKind::Shoot];

    /// Timed abilities stay active for a duration and suppress movement input.
    pub fn is_timed(self) -> bool {
        matches!(self, AbilityKind::Dash | AbilityKind::Blink)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cooldown {
    duration: f32,
    remaining: f32,
}

impl Cooldown {
    pub fn new(duration: f32) -> Self {
        Self {
            duration: duration.max(0.0),
            remaining: 0.0,
        }
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn remaining(&self) -> f32 {
        self.remaining
    }

    pub fn is_ready(&self) -> bool {
        self.remaining <= 0.0
    }

    /// Elapsed time is the only thing that lowers the remaining cooldown.
    pub fn tick(&mut self, dt: f32) {
        if dt > 0.0 {
            self.remaining = (self.remaining - dt).max(0.0);
        }
    }

    fn restart(&mut self) {
        self.remaining = self.duration;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbilityState {
    pub enabled: bool,
    pub cooldown: Cooldown,
    /// Duration of the active phase; zero for instant abilities.
    pub duration: f32,
    pub active: bool,
    pub last_input: Vec2,
}

impl AbilityState {
    pub fn new(enabled: bool, cooldown: f32, duration: f32) -> Self {
        Self {
            enabled,
            cooldown: Cooldown::new(cooldown),
            duration: duration.max(0.0),
            active: false,
            last_input: Vec2::ZERO,
        }
    }

    pub fn can_activate(&self) -> bool {
        self.enabled && self.cooldown.is_ready() && !self.active
    }

    /// Starts the ability if every precondition holds, restarting the cooldown.
    pub fn try_activate(&mut self, input: Vec2) -> bool {
        if !self.can_activate() {
            return false;
        }
        self.cooldown.restart();
        self.last_input = input;
        self.active = self.duration > 0.0;
        true
    }

    /// Ends the active phase. Safe to call any number of times.
    pub fn end(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}

/// Per-entity ability records, resolved once when the entity is spawned.
#[derive(Debug, Clone, PartialEq)]
pub struct AbilitySet {
    pub movement: AbilityState,
    pub dash: AbilityState,
    pub blink: AbilityState,
    pub shoot: AbilityState,
}

impl AbilitySet {
    pub fn from_config(config: &ShipConfig) -> Self {
        Self {
            movement: AbilityState::new(true, 0.0, 0.0),
            dash: AbilityState::new(config.dash_enabled, config.dash_cooldown, config.dash_duration),
            blink: AbilityState::new(
                config.blink_enabled,
                config.blink_cooldown,
                config.blink_duration,
            ),
            shoot: AbilityState::new(config.shoot_enabled, config.shoot_cooldown, 0.0),
        }
    }

    pub fn get(&self, kind: AbilityKind) -> &AbilityState {
        match kind {
            AbilityKind::Dash => &self.dash,
            AbilityKind::Blink => &self.blink,
            AbilityKind::Shoot => &self.shoot,
        }
    }

    pub fn get_mut(&mut self, kind: AbilityKind) -> &mut AbilityState {
        match kind {
            AbilityKind::Dash => &mut self.dash,
            AbilityKind::Blink => &mut self.blink,
            AbilityKind::Shoot => &mut self.shoot,
        }
    }

    pub fn tick(&mut self, dt: f32) {
        for kind in AbilityKind::ALL {
            self.get_mut(kind).cooldown.tick(dt);
        }
    }

    /// While a dash or blink is active, movement input does not set velocity.
    pub fn movement_locked(&self) -> bool {
        self.dash.active || self.blink.active
    }
}

/// Normalized activation direction; falls back to facing when the request has none.
/// Non-finite directions are malformed and yield `None`.
pub fn activation_direction(direction: Vec2, rotation: f32) -> Option<Vec2> {
    if !direction.is_finite() {
        return None;
    }
    Some(direction.try_normalize().unwrap_or_else(|| forward(rotation)))
}

pub fn movement_velocity(axis: Vec2, speed: f32) -> Vec2 {
    clamp_axis(axis) * speed
}

pub fn dash_velocity(direction: Vec2, config: &ShipConfig) -> Vec2 {
    direction * config.dash_speed
}

pub fn blink_destination(position: Vec2, direction: Vec2, config: &ShipConfig) -> Vec2 {
    position + direction * config.blink_distance
}

/// Spawn point and velocity of a projectile fired along `direction`.
pub fn projectile_launch(position: Vec2, direction: Vec2, config: &ShipConfig) -> (Vec2, Vec2) {
    (
        position + direction * config.muzzle_offset,
        direction * config.bullet_speed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_cooldown_only_decreases_with_time() {
        let mut cooldown = Cooldown::new(1.0);
        assert!(cooldown.is_ready());
        cooldown.restart();
        cooldown.tick(-5.0);
        assert_eq!(cooldown.remaining(), 1.0);
        cooldown.tick(0.4);
        assert_approx_eq!(cooldown.remaining(), 0.6, 1e-6);
        cooldown.tick(10.0);
        assert_eq!(cooldown.remaining(), 0.0);
    }

    #[test]
    fn test_activation_respects_cooldown() {
        let mut dash = AbilityState::new(true, 1.0, 0.2);
        assert!(dash.try_activate(Vec2::X));
        assert!(dash.active);
        assert!(!dash.try_activate(Vec2::X));

        dash.end();
        dash.cooldown.tick(0.7);
        assert!(!dash.try_activate(Vec2::X));
        assert_approx_eq!(dash.cooldown.remaining(), 0.3, 1e-6);

        dash.cooldown.tick(0.3);
        assert!(dash.try_activate(Vec2::Y));
        assert_eq!(dash.last_input, Vec2::Y);
    }

    #[test]
    fn test_disabled_ability_never_activates() {
        let mut blink = AbilityState::new(false, 0.0, 0.1);
        assert!(!blink.try_activate(Vec2::X));
        assert!(!blink.active);
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut dash = AbilityState::new(true, 1.0, 0.2);
        dash.try_activate(Vec2::X);
        assert!(dash.end());
        assert!(!dash.end());
    }

    #[test]
    fn test_instant_ability_is_never_active() {
        let mut shoot = AbilityState::new(true, 0.25, 0.0);
        assert!(shoot.try_activate(Vec2::X));
        assert!(!shoot.active);
        assert!(!shoot.can_activate());
    }

    #[test]
    fn test_movement_locked_while_dashing() {
        let mut set = AbilitySet::from_config(&ShipConfig::default());
        assert!(!set.movement_locked());
        set.dash.try_activate(Vec2::X);
        assert!(set.movement_locked());
        set.dash.end();
        set.blink.try_activate(Vec2::X);
        assert!(set.movement_locked());
    }

    #[test]
    fn test_activation_direction() {
        assert_eq!(activation_direction(Vec2::new(3.0, 0.0), 1.0), Some(Vec2::X));
        let fallback = activation_direction(Vec2::ZERO, 0.0).unwrap();
        assert_approx_eq!(fallback.x, 1.0, 1e-6);
        assert!(activation_direction(Vec2::new(f32::INFINITY, 0.0), 0.0).is_none());
    }

    #[test]
    fn test_kinematics() {
        let config = ShipConfig::default();
        let velocity = movement_velocity(Vec2::new(2.0, 0.0), config.move_speed);
        assert_approx_eq!(velocity.x, config.move_speed, 1e-3);

        let target = blink_destination(Vec2::ZERO, Vec2::Y, &config);
        assert_approx_eq!(target.y, config.blink_distance, 1e-3);

        let (muzzle, bullet_velocity) = projectile_launch(Vec2::ZERO, Vec2::X, &config);
        assert_approx_eq!(muzzle.x, config.muzzle_offset, 1e-3);
        assert_approx_eq!(bullet_velocity.x, config.bullet_speed, 1e-3);
    }
}

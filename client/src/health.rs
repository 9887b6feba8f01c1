//! Predicted health display.
//!
//! The replicated health value only ever changes when the server says so. What
//! the player sees is a shadow copy: local hits are subtracted from it at once
//! and held there until the server reports, then eased into rather than snapped.

use shared::math::{approach, circles_overlap};
use shared::NetId;
use std::collections::HashSet;

const SETTLE_EPSILON: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthDisplay {
    shown: f32,
    authoritative: f32,
    max: f32,
    /// Set by an authoritative report, cleared once the shown value catches up.
    easing: bool,
}

impl HealthDisplay {
    pub fn new(max: f32, current: f32) -> Self {
        let max = max.max(0.0);
        let current = current.clamp(0.0, max);
        Self {
            shown: current,
            authoritative: current,
            max,
            easing: false,
        }
    }

    pub fn shown(&self) -> f32 {
        self.shown
    }

    pub fn authoritative(&self) -> f32 {
        self.authoritative
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.shown / self.max
        }
    }

    /// Immediate local feedback for a hit the server has not judged yet.
    pub fn predict_damage(&mut self, amount: f32) {
        if amount.is_finite() && amount > 0.0 {
            self.shown = (self.shown - amount).clamp(0.0, self.max);
            self.easing = false;
        }
    }

    pub fn set_authoritative(&mut self, value: f32) {
        self.authoritative = value.clamp(0.0, self.max);
        self.easing = true;
    }

    /// Eases towards the last authoritative value. A prediction made since the
    /// last report is held until the server answers.
    pub fn update(&mut self, dt: f32, rate: f32) {
        if !self.easing {
            return;
        }
        self.shown = approach(self.shown, self.authoritative, rate, dt, SETTLE_EPSILON);
        if self.shown == self.authoritative {
            self.easing = false;
        }
    }

    pub fn is_settled(&self) -> bool {
        self.shown == self.authoritative
    }
}

/// Something the local ship can bump into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hazard {
    pub id: NetId,
    pub position: glam::Vec2,
    pub radius: f32,
    pub damage: f32,
}

/// Edge-triggered collision detection for the owned ship.
///
/// A hazard deals damage once when contact begins; staying in contact does not
/// repeat the hit.
#[derive(Debug, Default)]
pub struct ContactTracker {
    touching: HashSet<NetId>,
}

impl ContactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hazards that started touching the ship this step.
    pub fn detect<'a>(
        &mut self,
        position: glam::Vec2,
        radius: f32,
        hazards: impl IntoIterator<Item = &'a Hazard>,
    ) -> Vec<Hazard> {
        let mut touching = HashSet::new();
        let mut started = Vec::new();
        for hazard in hazards {
            if !circles_overlap(position, radius, hazard.position, hazard.radius) {
                continue;
            }
            touching.insert(hazard.id);
            if !self.touching.contains(&hazard.id) {
                started.push(*hazard);
            }
        }
        self.touching = touching;
        started
    }

    pub fn clear(&mut self) {
        self.touching.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec2;

    #[test]
    fn test_predicted_damage_shows_immediately() {
        let mut display = HealthDisplay::new(100.0, 100.0);
        display.predict_damage(30.0);
        assert_eq!(display.shown(), 70.0);
        assert_eq!(display.authoritative(), 100.0);

        display.predict_damage(500.0);
        assert_eq!(display.shown(), 0.0);
        display.predict_damage(f32::NAN);
        assert_eq!(display.shown(), 0.0);
    }

    #[test]
    fn test_prediction_holds_until_server_reports() {
        let mut display = HealthDisplay::new(100.0, 100.0);
        display.predict_damage(40.0);
        for _ in 0..6 {
            display.update(1.0 / 60.0, 10.0);
        }
        assert_eq!(display.shown(), 60.0);

        display.set_authoritative(60.0);
        display.update(1.0 / 60.0, 10.0);
        assert!(display.is_settled());
        assert_eq!(display.shown(), 60.0);
    }

    #[test]
    fn test_hit_during_easing_is_held() {
        let mut display = HealthDisplay::new(100.0, 100.0);
        display.set_authoritative(90.0);
        display.update(0.05, 10.0);
        display.predict_damage(20.0);
        let held = display.shown();
        for _ in 0..10 {
            display.update(0.05, 10.0);
        }
        assert_eq!(display.shown(), held);
    }

    #[test]
    fn test_eases_toward_authoritative_value() {
        let mut display = HealthDisplay::new(100.0, 100.0);
        display.predict_damage(30.0);
        display.set_authoritative(80.0);

        display.update(0.05, 10.0);
        assert_approx_eq!(display.shown(), 75.0);
        assert!(!display.is_settled());

        for _ in 0..100 {
            display.update(0.05, 10.0);
        }
        assert!(display.is_settled());
        assert_eq!(display.shown(), 80.0);
    }

    #[test]
    fn test_contact_hits_once_per_touch() {
        let mut contacts = ContactTracker::new();
        let rock = Hazard {
            id: NetId(3),
            position: Vec2::new(10.0, 0.0),
            radius: 5.0,
            damage: 7.0,
        };

        assert_eq!(contacts.detect(Vec2::ZERO, 8.0, [&rock]).len(), 1);
        assert!(contacts.detect(Vec2::ZERO, 8.0, [&rock]).is_empty());
        assert!(contacts.detect(Vec2::new(-50.0, 0.0), 8.0, [&rock]).is_empty());
        assert_eq!(contacts.detect(Vec2::ZERO, 8.0, [&rock]).len(), 1);
    }
}

//! Health record shared by the damage authority and the client display.

use crate::replication::{ReplicatedScalar, ReplicationError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    /// Non-positive, non-finite, or aimed at an entity that is already dead.
    Ignored,
    Damaged { health: f32 },
    /// Health reached zero for the first time.
    Died,
}

#[derive(Debug, Clone)]
pub struct Health {
    current: ReplicatedScalar<f32>,
    max: f32,
    dead: bool,
}

impl Health {
    /// Server copy, the single writer of the replicated value.
    pub fn authoritative(max: f32) -> Self {
        let max = max.max(0.0);
        Self {
            current: ReplicatedScalar::authoritative(max),
            max,
            dead: false,
        }
    }

    pub fn mirror(max: f32) -> Self {
        let max = max.max(0.0);
        Self {
            current: ReplicatedScalar::mirror(max),
            max,
            dead: false,
        }
    }

    pub fn current(&self) -> f32 {
        *self.current.get()
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.current() / self.max
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn scalar(&self) -> &ReplicatedScalar<f32> {
        &self.current
    }

    pub fn scalar_mut(&mut self) -> &mut ReplicatedScalar<f32> {
        &mut self.current
    }

    /// Subtracts `amount`, clamping into `[0, max]`. Only the server copy accepts this.
    pub fn apply_damage(&mut self, amount: f32) -> Result<DamageOutcome, ReplicationError> {
        if !self.current.is_authority() {
            return Err(ReplicationError::NotAuthority);
        }
        if self.dead || !amount.is_finite() || amount <= 0.0 {
            return Ok(DamageOutcome::Ignored);
        }

        let health = (self.current() - amount).clamp(0.0, self.max);
        self.current.set(health)?;
        if health <= 0.0 {
            self.dead = true;
            Ok(DamageOutcome::Died)
        } else {
            Ok(DamageOutcome::Damaged { health })
        }
    }

    /// Restores full health for a recycled instance.
    pub fn reset(&mut self, max: f32) {
        self.max = max.max(0.0);
        self.dead = false;
        if self.current.is_authority() {
            let _ = self.current.set(self.max);
            self.current.touch();
        } else {
            self.current = ReplicatedScalar::mirror(self.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_clamps_to_zero_and_dies_once() {
        let mut health = Health::authoritative(100.0);
        assert_eq!(
            health.apply_damage(60.0),
            Ok(DamageOutcome::Damaged { health: 40.0 })
        );
        assert_eq!(health.apply_damage(60.0), Ok(DamageOutcome::Died));
        assert_eq!(health.current(), 0.0);
        assert_eq!(health.apply_damage(60.0), Ok(DamageOutcome::Ignored));
        assert!(health.is_dead());
    }

    #[test]
    fn test_negative_and_nan_damage_ignored() {
        let mut health = Health::authoritative(50.0);
        assert_eq!(health.apply_damage(-10.0), Ok(DamageOutcome::Ignored));
        assert_eq!(health.apply_damage(f32::NAN), Ok(DamageOutcome::Ignored));
        assert_eq!(health.current(), 50.0);
    }

    #[test]
    fn test_mirror_cannot_apply_damage() {
        let mut health = Health::mirror(50.0);
        assert_eq!(
            health.apply_damage(10.0),
            Err(ReplicationError::NotAuthority)
        );
    }

    #[test]
    fn test_reset_revives_and_queues_notification() {
        let mut health = Health::authoritative(20.0);
        health.apply_damage(25.0).unwrap();
        health.scalar_mut().take_change();

        health.reset(30.0);
        assert!(!health.is_dead());
        assert_eq!(health.current(), 30.0);
        assert_eq!(health.scalar_mut().take_change().map(|(_, v)| v), Some(30.0));
    }
}

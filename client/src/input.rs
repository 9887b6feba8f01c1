//! Input sampling for the headless client
//!
//! Device polling is outside this crate; anything that can produce an
//! [`InputFrame`] per step plugs in through [`InputSource`]. The binary ships
//! a scripted pilot so prediction can be exercised without a window.

use glam::Vec2;
use shared::AbilityKind;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A requested ability activation and the direction it should use.
/// A zero direction means "along the ship's facing".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activation {
    pub ability: AbilityKind,
    pub direction: Vec2,
}

/// Everything the player wants during one simulation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    /// Movement axis, clamped to the unit disc before use.
    pub movement: Vec2,
    /// Desired heading in radians. `None` keeps the current one.
    pub aim: Option<f32>,
    pub activations: Vec<Activation>,
}

impl InputFrame {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn moving(movement: Vec2) -> Self {
        Self {
            movement,
            ..Self::default()
        }
    }

    pub fn with_activation(mut self, ability: AbilityKind, direction: Vec2) -> Self {
        self.activations.push(Activation { ability, direction });
        self
    }
}

pub trait InputSource: Send {
    /// Samples intent for a step that starts `elapsed` seconds into the session.
    fn sample(&mut self, elapsed: f32) -> InputFrame;
}

/// Never asks for anything.
#[derive(Debug, Default)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn sample(&mut self, _elapsed: f32) -> InputFrame {
        InputFrame::idle()
    }
}

/// Flies a slow circle, shooting and dashing on fixed periods.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    turn_rate: f32,
    shoot_every: f32,
    dash_every: f32,
    blink_every: f32,
    next_shot: f32,
    next_dash: f32,
    next_blink: f32,
}

impl ScriptedInput {
    pub fn new(turn_rate: f32, shoot_every: f32, dash_every: f32, blink_every: f32) -> Self {
        Self {
            turn_rate,
            shoot_every,
            dash_every,
            blink_every,
            next_shot: shoot_every,
            next_dash: dash_every,
            next_blink: blink_every,
        }
    }

    /// The pattern the headless binary uses.
    pub fn patrol() -> Self {
        Self::new(0.5, 0.4, 2.5, 7.0)
    }

    fn due(next: &mut f32, period: f32, elapsed: f32) -> bool {
        if period <= 0.0 || elapsed < *next {
            return false;
        }
        while *next <= elapsed {
            *next += period;
        }
        true
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, elapsed: f32) -> InputFrame {
        let heading = elapsed * self.turn_rate;
        let facing = Vec2::from_angle(heading);
        let mut frame = InputFrame {
            movement: facing,
            aim: Some(heading),
            activations: Vec::new(),
        };

        if Self::due(&mut self.next_shot, self.shoot_every, elapsed) {
            frame = frame.with_activation(AbilityKind::Shoot, facing);
        }
        if Self::due(&mut self.next_dash, self.dash_every, elapsed) {
            frame = frame.with_activation(AbilityKind::Dash, facing);
        }
        if Self::due(&mut self.next_blink, self.blink_every, elapsed) {
            frame = frame.with_activation(AbilityKind::Blink, facing.perp());
        }
        frame
    }
}

/// Milliseconds since the Unix epoch, stamped on outgoing input.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_input_is_empty() {
        let mut input = IdleInput;
        assert_eq!(input.sample(3.0), InputFrame::idle());
    }

    #[test]
    fn test_scripted_fires_on_period() {
        let mut input = ScriptedInput::new(0.0, 1.0, 0.0, 0.0);
        assert!(input.sample(0.5).activations.is_empty());

        let frame = input.sample(1.0);
        assert_eq!(frame.activations.len(), 1);
        assert_eq!(frame.activations[0].ability, AbilityKind::Shoot);

        // A long stall fires once, not once per missed period.
        assert_eq!(input.sample(5.5).activations.len(), 1);
        assert!(input.sample(5.6).activations.is_empty());
    }

    #[test]
    fn test_scripted_aims_where_it_flies() {
        let mut input = ScriptedInput::patrol();
        let frame = input.sample(2.0);
        let aim = frame.aim.unwrap();
        assert!((Vec2::from_angle(aim) - frame.movement).length() < 1e-5);
    }

    #[test]
    fn test_timestamp_moves_forward() {
        let first = timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timestamp() > first);
    }
}

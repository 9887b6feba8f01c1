//! Small geometry helpers shared by the server simulation and client prediction.

use glam::Vec2;
use std::f32::consts::{PI, TAU};

/// Wraps an angle in radians into `(-PI, PI]`.
pub fn normalize_angle(angle: f32) -> f32 {
    let mut normalized = angle % TAU;
    if normalized > PI {
        normalized -= TAU;
    } else if normalized <= -PI {
        normalized += TAU;
    }
    normalized
}

/// Signed shortest difference `to - from`.
pub fn angle_delta(from: f32, to: f32) -> f32 {
    normalize_angle(to - from)
}

/// Interpolates along the shortest arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    normalize_angle(from + angle_delta(from, to) * t.clamp(0.0, 1.0))
}

/// Rotates `from` towards `to` by at most `max_step` radians.
pub fn rotate_towards(from: f32, to: f32, max_step: f32) -> f32 {
    let delta = angle_delta(from, to);
    if delta.abs() <= max_step {
        normalize_angle(to)
    } else {
        normalize_angle(from + max_step * delta.signum())
    }
}

/// Heading of a direction vector. Zero vectors map to `None`.
pub fn heading(direction: Vec2) -> Option<f32> {
    if direction.length_squared() < 1e-6 {
        None
    } else {
        Some(direction.y.atan2(direction.x))
    }
}

/// Unit vector for a heading.
pub fn forward(rotation: f32) -> Vec2 {
    Vec2::from_angle(rotation)
}

/// Clamps an input axis to the unit disc so diagonal input is not faster.
pub fn clamp_axis(axis: Vec2) -> Vec2 {
    if !axis.is_finite() {
        return Vec2::ZERO;
    }
    axis.clamp_length_max(1.0)
}

/// Moves `current` towards `target` exponentially, snapping once close.
pub fn approach(current: f32, target: f32, rate: f32, dt: f32, epsilon: f32) -> f32 {
    let blend = (rate * dt).clamp(0.0, 1.0);
    let next = current + (target - current) * blend;
    if (target - next).abs() <= epsilon {
        target
    } else {
        next
    }
}

pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
    a.distance_squared(b) < (radius_a + radius_b).powi(2)
}

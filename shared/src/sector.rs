//! Sector grid and deterministic content placement.
//!
//! The world is a uniform grid of square sectors. Sector `(x, y)` is centered on
//! `(x * size, y * size)`; that center is the sector's local origin. Placement is
//! a pure function of the world seed and the sector coordinates, so any process
//! can recompute a sector's layout from its coordinates alone.

use crate::config::WorldConfig;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for SectorCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl SectorCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn containing(position: Vec2, sector_size: f32) -> Self {
        let half = sector_size / 2.0;
        Self {
            x: ((position.x + half) / sector_size).floor() as i32,
            y: ((position.y + half) / sector_size).floor() as i32,
        }
    }

    pub fn origin(self, sector_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * sector_size, self.y as f32 * sector_size)
    }

    /// The 3x3 block centered on this sector, row by row.
    pub fn neighborhood(self) -> Vec<SectorCoord> {
        let mut sectors = Vec::with_capacity(9);
        for dy in -1..=1 {
            for dx in -1..=1 {
                sectors.push(SectorCoord::new(self.x + dx, self.y + dy));
            }
        }
        sectors
    }

    pub fn chebyshev_distance(self, other: SectorCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

const SALT_NOISE_Y: u64 = 0xC2B2_AE3D_27D4_EB4F;
const SALT_JITTER: u64 = 0x1656_67B1_9E37_79F9;

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Keyed hash of a seed and three integer keys. Argument order matters.
pub fn keyed_hash(seed: u64, a: i64, b: i64, c: u64) -> u64 {
    let mut state = splitmix64(seed);
    state = splitmix64(state ^ (a as u64).wrapping_mul(0x9E37_79B9));
    state = splitmix64(state ^ (b as u64).wrapping_mul(0xC2B2_AE35));
    splitmix64(state ^ c.wrapping_mul(0x1656_67B1))
}

fn lattice(seed: u64, x: i64, y: i64) -> f32 {
    (keyed_hash(seed, x, y, 0) >> 40) as f32 / (1u64 << 24) as f32
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// 2D value noise in `[0, 1)`: smooth interpolation between hashed lattice values.
pub fn value_noise(seed: u64, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (ix, iy) = (x0 as i64, y0 as i64);
    let tx = smoothstep(x - x0);
    let ty = smoothstep(y - y0);

    let top = lattice(seed, ix, iy) + (lattice(seed, ix + 1, iy) - lattice(seed, ix, iy)) * tx;
    let bottom = lattice(seed, ix, iy + 1)
        + (lattice(seed, ix + 1, iy + 1) - lattice(seed, ix, iy + 1)) * tx;
    top + (bottom - top) * ty
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementParams {
    pub sector_size: f32,
    pub count: usize,
    pub min_origin_distance: f32,
    pub jitter: f32,
}

impl From<&WorldConfig> for PlacementParams {
    fn from(config: &WorldConfig) -> Self {
        Self {
            sector_size: config.sector_size,
            count: config.items_per_sector,
            min_origin_distance: config.min_origin_distance,
            jitter: config.placement_jitter,
        }
    }
}

/// One accepted content slot of a sector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Candidate index the slot was derived from.
    pub index: u32,
    pub position: Vec2,
    pub rotation: f32,
}

/// Computes the accepted content positions of `coord`.
///
/// Each of the `count` candidates is derived from the noise field sampled at
/// the sector coordinates and the candidate index, then nudged by a bounded
/// jitter drawn from an RNG keyed the same way. Candidates closer than
/// `min_origin_distance` to the sector origin are rejected.
pub fn candidate_positions(seed: u64, coord: SectorCoord, params: &PlacementParams) -> Vec<Placement> {
    let half = params.sector_size / 2.0;
    let origin = coord.origin(params.sector_size);
    let mut placements = Vec::with_capacity(params.count);

    for index in 0..params.count {
        let i = index as f32;
        let nx = coord.x as f32 * 7.31 + i * 1.618 + 0.5;
        let ny = coord.y as f32 * 7.31 + i * 2.414 + 0.5;
        let u = value_noise(seed, nx, ny);
        let v = value_noise(seed ^ SALT_NOISE_Y, nx, ny);
        let mut local = Vec2::new(u * 2.0 - 1.0, v * 2.0 - 1.0) * half;

        let mut rng = StdRng::seed_from_u64(keyed_hash(
            seed ^ SALT_JITTER,
            coord.x as i64,
            coord.y as i64,
            index as u64,
        ));
        if params.jitter > 0.0 {
            local += Vec2::new(
                rng.gen_range(-params.jitter..=params.jitter),
                rng.gen_range(-params.jitter..=params.jitter),
            );
        }
        let rotation = rng.gen_range(0.0..TAU);
        let edge = half * 0.999;
        let local = local.clamp(Vec2::splat(-edge), Vec2::splat(edge));

        if local.length() < params.min_origin_distance {
            continue;
        }
        placements.push(Placement {
            index: index as u32,
            position: origin + local,
            rotation,
        });
    }

    placements
}

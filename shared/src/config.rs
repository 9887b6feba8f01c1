//! Configuration assets consumed read-only by the simulation.
//!
//! An external loader produces these before the engine binds them to entities;
//! the core only ever reads them, shared behind `Arc`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameter bag for a player ship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipConfig {
    pub visual_asset: String,
    pub move_speed: f32,
    /// Radians per second.
    pub rotation_speed: f32,
    pub radius: f32,
    pub max_health: f32,

    pub dash_enabled: bool,
    pub dash_speed: f32,
    pub dash_duration: f32,
    pub dash_cooldown: f32,

    pub blink_enabled: bool,
    pub blink_distance: f32,
    pub blink_duration: f32,
    pub blink_cooldown: f32,

    pub shoot_enabled: bool,
    pub shoot_cooldown: f32,
    pub bullet_speed: f32,
    pub bullet_damage: f32,
    pub bullet_lifetime: f32,
    pub bullet_radius: f32,
    pub muzzle_offset: f32,
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            visual_asset: "ships/interceptor".to_string(),
            move_speed: 300.0,
            rotation_speed: 12.0,
            radius: 16.0,
            max_health: 100.0,

            dash_enabled: true,
            dash_speed: 900.0,
            dash_duration: 0.2,
            dash_cooldown: 1.0,

            blink_enabled: true,
            blink_distance: 200.0,
            blink_duration: 0.1,
            blink_cooldown: 3.0,

            shoot_enabled: true,
            shoot_cooldown: 0.25,
            bullet_speed: 1200.0,
            bullet_damage: 10.0,
            bullet_lifetime: 1.5,
            bullet_radius: 4.0,
            muzzle_offset: 20.0,
        }
    }
}

/// Parameter bag for a procedurally placed world object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    pub visual_asset: String,
    pub max_health: f32,
    /// Damage dealt to a ship that touches this object.
    pub collision_damage: f32,
    pub radius: f32,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            visual_asset: "props/asteroid_small".to_string(),
            max_health: 30.0,
            collision_damage: 5.0,
            radius: 24.0,
        }
    }
}

impl ObjectConfig {
    pub fn new(visual_asset: &str, max_health: f32, collision_damage: f32, radius: f32) -> Self {
        Self {
            visual_asset: visual_asset.to_string(),
            max_health,
            collision_damage,
            radius,
        }
    }
}

/// Which of the two object catalogs populates new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CatalogSlot {
    #[default]
    Primary,
    Secondary,
}

/// The two independent object catalogs the sector generator draws from.
#[derive(Debug, Clone, Default)]
pub struct ObjectCatalogs {
    pub primary: Vec<Arc<ObjectConfig>>,
    pub secondary: Vec<Arc<ObjectConfig>>,
}

impl ObjectCatalogs {
    pub fn new(primary: Vec<ObjectConfig>, secondary: Vec<ObjectConfig>) -> Self {
        Self {
            primary: primary.into_iter().map(Arc::new).collect(),
            secondary: secondary.into_iter().map(Arc::new).collect(),
        }
    }

    /// Built-in catalogs used by the binaries when nothing else is loaded.
    pub fn builtin() -> Self {
        Self::new(
            vec![
                ObjectConfig::new("props/asteroid_small", 30.0, 5.0, 24.0),
                ObjectConfig::new("props/asteroid_large", 80.0, 15.0, 48.0),
                ObjectConfig::new("props/debris", 10.0, 2.0, 12.0),
            ],
            vec![
                ObjectConfig::new("props/mine", 5.0, 40.0, 14.0),
                ObjectConfig::new("props/wreck", 120.0, 10.0, 56.0),
            ],
        )
    }

    pub fn get(&self, slot: CatalogSlot) -> &[Arc<ObjectConfig>] {
        match slot {
            CatalogSlot::Primary => &self.primary,
            CatalogSlot::Secondary => &self.secondary,
        }
    }

    pub fn config(&self, slot: CatalogSlot, index: usize) -> Option<&Arc<ObjectConfig>> {
        self.get(slot).get(index)
    }
}

/// World generation and pooling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub seed: u64,
    pub sector_size: f32,
    pub items_per_sector: usize,
    /// Candidates closer than this to a sector's origin are discarded.
    pub min_origin_distance: f32,
    /// Maximum random offset applied on top of the noise-derived position.
    pub placement_jitter: f32,
    /// Seconds between sector refresh passes.
    pub refresh_interval: f32,
    pub bullet_prewarm: usize,
    pub object_prewarm: usize,
    /// Hard cap of instances per pool kind. `None` always grows.
    pub pool_cap: Option<usize>,
    /// Drift the owner may keep before taking the server's transform. At the
    /// default of zero every snapshot is adopted as is.
    pub reconcile_snap_distance: f32,
    /// Rate used by observers to smooth rotation and health towards authoritative values.
    pub smoothing_rate: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EC7_0125,
            sector_size: 1024.0,
            items_per_sector: 12,
            min_origin_distance: 96.0,
            placement_jitter: 32.0,
            refresh_interval: 30.0,
            bullet_prewarm: 64,
            object_prewarm: 128,
            pool_cap: None,
            reconcile_snap_distance: 0.0,
            smoothing_rate: 10.0,
        }
    }
}

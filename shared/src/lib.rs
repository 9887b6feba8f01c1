//! Simulation code that the server and every client run identically: wire
//! protocol, replication primitives, ability rules, the object pool and the
//! deterministic sector layout.

pub mod ability;
pub mod config;
pub mod entity;
pub mod health;
pub mod math;
pub mod pool;
pub mod protocol;
pub mod replication;
pub mod sector;
pub mod timer;

pub use ability::{AbilityKind, AbilitySet, AbilityState, Cooldown};
pub use config::{CatalogSlot, ObjectCatalogs, ObjectConfig, ShipConfig, WorldConfig};
pub use entity::{ClientId, InstanceId, NetId, PrefabKind, Role, Team, Transform};
pub use health::{DamageOutcome, Health};
pub use pool::{ObjectPool, PoolError, PoolHost};
pub use protocol::{
    AbilityEffect, ConfigRef, EntityState, Packet, ProtocolError, ScalarValue, SpawnInfo,
};
pub use replication::{Outbound, Outbox, ReplicatedScalar, ReplicationError, ScalarChange};
pub use sector::{candidate_positions, Placement, PlacementParams, SectorCoord};
pub use timer::TimerWheel;

pub const TICK_RATE: u32 = 60;
pub const TICK_DT: f32 = 1.0 / TICK_RATE as f32;
pub const CLIENT_VERSION: u32 = protocol::PROTOCOL_VERSION;

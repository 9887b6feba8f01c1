//! Wire protocol between clients and the authoritative server.

use crate::ability::AbilityKind;
use crate::config::CatalogSlot;
use crate::entity::{ClientId, NetId, PrefabKind, Team, Transform};
use crate::sector::SectorCoord;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;
/// Receive buffer size. Snapshots are chunked well below this.
pub const MAX_PACKET_SIZE: usize = 65_507;
pub const SNAPSHOT_CHUNK: usize = 512;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Owner -> server
    Connect {
        client_version: u32,
    },
    /// Continuous movement and aim intent, sent every client step.
    Input {
        sequence: u32,
        timestamp: u64,
        movement: Vec2,
        aim: f32,
    },
    ActivateAbility {
        sequence: u32,
        ability: AbilityKind,
        direction: Vec2,
    },
    DamageRequest {
        target: NetId,
        amount: f32,
    },
    /// Hint that the sender wants content around a sector; the server may ignore it.
    RequestRegeneration {
        sector: SectorCoord,
    },
    SelectCatalog {
        slot: CatalogSlot,
    },
    Disconnect,

    // Server -> observers
    Connected {
        client_id: ClientId,
    },
    EntitySpawned(SpawnInfo),
    EntityDespawned {
        id: NetId,
    },
    /// Cosmetic death notification; the despawn follows separately.
    EntityDied {
        id: NetId,
    },
    ScalarChanged {
        id: NetId,
        revision: u32,
        value: ScalarValue,
    },
    AbilityEffect {
        id: NetId,
        effect: AbilityEffect,
    },
    GameState {
        tick: u32,
        timestamp: u64,
        last_processed_input: HashMap<ClientId, u32>,
        entities: Vec<EntityState>,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(ProtocolError::Decode)
    }

    /// Whether a client is allowed to send this packet.
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            Packet::Connect { .. }
                | Packet::Input { .. }
                | Packet::ActivateAbility { .. }
                | Packet::DamageRequest { .. }
                | Packet::RequestRegeneration { .. }
                | Packet::SelectCatalog { .. }
                | Packet::Disconnect
        )
    }
}

/// Everything an observer needs to materialize or reuse a local instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpawnInfo {
    pub id: NetId,
    pub prefab: PrefabKind,
    pub transform: Transform,
    pub velocity: Vec2,
    pub owner: Option<ClientId>,
    pub team: Team,
    pub config: ConfigRef,
    /// Current health for entities that have one, so late joiners start in sync.
    pub health: Option<f32>,
}

/// Index into the configuration assets every process loads identically.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRef {
    Ship { index: u16 },
    /// Bullets inherit damage and size from the shooter's ship configuration.
    Bullet { ship_index: u16 },
    Object { slot: CatalogSlot, index: u16 },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Health(f32),
    Team(Team),
    DashActive(bool),
    Rotation(f32),
}

/// Authoritative outcome of an accepted activation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum AbilityEffect {
    DashStarted { position: Vec2, velocity: Vec2 },
    BlinkedTo { position: Vec2 },
    Ended { ability: AbilityKind },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub id: NetId,
    pub position: Vec2,
    pub velocity: Vec2,
}

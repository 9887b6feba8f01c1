//! Identity and classification types for simulated entities.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the server assigns to each connected client.
pub type ClientId = u32;

/// Network identity of a spawned entity. A fresh id is issued on every spawn,
/// so a recycled pool instance is indistinguishable from a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetId(pub u32);

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot of a local instance inside a process' entity arena. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Team {
    Friend,
    #[default]
    Neutral,
    Enemy,
}

impl Team {
    /// Whether damage from `self` may land on `other`.
    pub fn is_hostile_to(self, other: Team) -> bool {
        self != other || self == Team::Neutral
    }
}

/// Authority a process holds over a given entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The server process: writes every replicated value.
    Server,
    /// The client that owns the entity: predicts, never writes authoritative state.
    Owner,
    /// Any other client: mirrors and interpolates.
    Observer,
}

impl Role {
    pub fn resolve(is_server: bool, owner: Option<ClientId>, local: Option<ClientId>) -> Self {
        if is_server {
            Role::Server
        } else if owner.is_some() && owner == local {
            Role::Owner
        } else {
            Role::Observer
        }
    }

    pub fn is_authority(self) -> bool {
        self == Role::Server
    }
}

/// Prefab an instance was built from; pools keep one free list per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefabKind {
    Ship,
    Bullet,
    WorldObject,
}

impl PrefabKind {
    pub fn is_poolable(self) -> bool {
        !matches!(self, PrefabKind::Ship)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f32,
}

impl Transform {
    pub fn new(position: Vec2, rotation: f32) -> Self {
        Self { position, rotation }
    }
}

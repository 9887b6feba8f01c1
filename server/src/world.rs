//! Authoritative entity arena.
//!
//! Every instance lives in one slot for the lifetime of the process. The
//! capability records an entity needs (abilities, health, damage) are resolved
//! once when it is bound at spawn time, so the tick never looks anything up
//! dynamically. Pooled instances are stripped back to a blank slot on release.

use glam::Vec2;
use shared::{
    AbilitySet, CatalogSlot, ClientId, ConfigRef, EntityState, Health, InstanceId, NetId,
    ObjectConfig, PoolHost, PrefabKind, ReplicatedScalar, ShipConfig, SpawnInfo, Team,
    Transform,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration asset an entity was bound to.
#[derive(Debug, Clone)]
pub enum ConfigBinding {
    Unbound,
    Ship { index: u16, config: Arc<ShipConfig> },
    Bullet { ship_index: u16, config: Arc<ShipConfig> },
    Object {
        slot: CatalogSlot,
        index: u16,
        config: Arc<ObjectConfig>,
    },
}

impl ConfigBinding {
    pub fn config_ref(&self) -> Option<ConfigRef> {
        match self {
            ConfigBinding::Unbound => None,
            ConfigBinding::Ship { index, .. } => Some(ConfigRef::Ship { index: *index }),
            ConfigBinding::Bullet { ship_index, .. } => Some(ConfigRef::Bullet {
                ship_index: *ship_index,
            }),
            ConfigBinding::Object { slot, index, .. } => Some(ConfigRef::Object {
                slot: *slot,
                index: *index,
            }),
        }
    }

    pub fn ship(&self) -> Option<&Arc<ShipConfig>> {
        match self {
            ConfigBinding::Ship { config, .. } | ConfigBinding::Bullet { config, .. } => {
                Some(config)
            }
            _ => None,
        }
    }
}

/// Anything that hurts what it touches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageSource {
    pub amount: f32,
    pub shooter: Option<NetId>,
}

/// Latest movement intent received from the owning client.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Intent {
    pub movement: Vec2,
    pub aim: f32,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub instance: InstanceId,
    pub prefab: PrefabKind,
    pub net_id: Option<NetId>,
    pub active: bool,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub owner: Option<ClientId>,
    pub rotation: ReplicatedScalar<f32>,
    pub team: ReplicatedScalar<Team>,
    pub dash_active: ReplicatedScalar<bool>,
    pub config: ConfigBinding,
    pub intent: Intent,
    pub abilities: Option<AbilitySet>,
    pub health: Option<Health>,
    pub damage: Option<DamageSource>,
}

impl Entity {
    fn blank(instance: InstanceId, prefab: PrefabKind) -> Self {
        Self {
            instance,
            prefab,
            net_id: None,
            active: false,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            radius: 0.0,
            owner: None,
            rotation: ReplicatedScalar::authoritative(0.0),
            team: ReplicatedScalar::authoritative(Team::Neutral),
            dash_active: ReplicatedScalar::authoritative(false),
            config: ConfigBinding::Unbound,
            intent: Intent::default(),
            abilities: None,
            health: None,
            damage: None,
        }
    }

    pub fn is_spawned(&self) -> bool {
        self.active && self.net_id.is_some()
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, *self.rotation.get())
    }

    pub fn spawn_info(&self) -> Option<SpawnInfo> {
        Some(SpawnInfo {
            id: self.net_id?,
            prefab: self.prefab,
            transform: self.transform(),
            velocity: self.velocity,
            owner: self.owner,
            team: *self.team.get(),
            config: self.config.config_ref()?,
            health: self.health.as_ref().map(Health::current),
        })
    }

    pub fn state(&self) -> Option<EntityState> {
        Some(EntityState {
            id: self.net_id?,
            position: self.position,
            velocity: self.velocity,
        })
    }
}

#[derive(Debug, Default)]
pub struct World {
    entities: Vec<Entity>,
    by_net_id: HashMap<NetId, InstanceId>,
    /// Slots of destroyed, non-pooled entities available for reuse.
    retired: Vec<InstanceId>,
    next_net_id: u32,
}

impl World {
    pub fn new() -> Self {
        Self {
            next_net_id: 1,
            ..Self::default()
        }
    }

    pub fn get(&self, id: InstanceId) -> Option<&Entity> {
        self.entities.get(id.index())
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Entity> {
        self.entities.get_mut(id.index())
    }

    pub fn instance_of(&self, net_id: NetId) -> Option<InstanceId> {
        self.by_net_id.get(&net_id).copied()
    }

    pub fn by_net_id(&self, net_id: NetId) -> Option<&Entity> {
        self.instance_of(net_id).and_then(|id| self.get(id))
    }

    pub fn by_net_id_mut(&mut self, net_id: NetId) -> Option<&mut Entity> {
        let id = self.instance_of(net_id)?;
        self.get_mut(id)
    }

    pub fn is_spawned(&self, net_id: NetId) -> bool {
        self.by_net_id.contains_key(&net_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn spawned(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|entity| entity.is_spawned())
    }

    pub fn spawned_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut().filter(|entity| entity.is_spawned())
    }

    pub fn spawned_count(&self) -> usize {
        self.by_net_id.len()
    }

    /// Issues a fresh network identity for an active instance.
    pub fn assign_net_id(&mut self, id: InstanceId) -> Option<NetId> {
        let net_id = NetId(self.next_net_id);
        let entity = self.entities.get_mut(id.index())?;
        if !entity.active || entity.net_id.is_some() {
            return None;
        }
        self.next_net_id = self.next_net_id.wrapping_add(1).max(1);
        entity.net_id = Some(net_id);
        self.by_net_id.insert(net_id, id);
        Some(net_id)
    }

    /// Forgets the network identity once observers have dropped the entity.
    pub fn clear_net_id(&mut self, net_id: NetId) -> Option<InstanceId> {
        let id = self.by_net_id.remove(&net_id)?;
        if let Some(entity) = self.entities.get_mut(id.index()) {
            entity.net_id = None;
        }
        Some(id)
    }

    /// Creates a ship that lives outside the pool.
    pub fn create_ship(&mut self, transform: Transform) -> InstanceId {
        let id = match self.retired.pop() {
            Some(id) => {
                self.entities[id.index()] = Entity::blank(id, PrefabKind::Ship);
                id
            }
            None => self.instantiate(PrefabKind::Ship),
        };
        self.activate(id, transform);
        id
    }

    /// Final removal of a non-pooled entity.
    pub fn destroy(&mut self, id: InstanceId) {
        if let Some(entity) = self.entities.get(id.index()) {
            if let Some(net_id) = entity.net_id {
                self.by_net_id.remove(&net_id);
            }
            self.deactivate(id);
            self.retired.push(id);
        }
    }

    pub fn bind_ship(
        &mut self,
        id: InstanceId,
        owner: ClientId,
        index: u16,
        config: Arc<ShipConfig>,
        team: Team,
    ) {
        if let Some(entity) = self.get_mut(id) {
            entity.owner = Some(owner);
            entity.radius = config.radius;
            entity.abilities = Some(AbilitySet::from_config(&config));
            entity.health = Some(Health::authoritative(config.max_health));
            entity.team = ReplicatedScalar::authoritative(team);
            entity.config = ConfigBinding::Ship { index, config };
        }
    }

    pub fn bind_bullet(
        &mut self,
        id: InstanceId,
        shooter: NetId,
        owner: Option<ClientId>,
        team: Team,
        ship_index: u16,
        config: Arc<ShipConfig>,
        velocity: Vec2,
    ) {
        if let Some(entity) = self.get_mut(id) {
            entity.owner = owner;
            entity.velocity = velocity;
            entity.radius = config.bullet_radius;
            entity.team = ReplicatedScalar::authoritative(team);
            entity.damage = Some(DamageSource {
                amount: config.bullet_damage,
                shooter: Some(shooter),
            });
            entity.config = ConfigBinding::Bullet { ship_index, config };
        }
    }

    pub fn bind_object(
        &mut self,
        id: InstanceId,
        slot: CatalogSlot,
        index: u16,
        config: Arc<ObjectConfig>,
    ) {
        if let Some(entity) = self.get_mut(id) {
            entity.radius = config.radius;
            entity.health = Some(Health::authoritative(config.max_health));
            entity.damage = Some(DamageSource {
                amount: config.collision_damage,
                shooter: None,
            });
            entity.team = ReplicatedScalar::authoritative(Team::Neutral);
            entity.config = ConfigBinding::Object {
                slot,
                index,
                config,
            };
        }
    }
}

impl PoolHost for World {
    fn instantiate(&mut self, kind: PrefabKind) -> InstanceId {
        let id = InstanceId(self.entities.len() as u32);
        self.entities.push(Entity::blank(id, kind));
        id
    }

    fn activate(&mut self, id: InstanceId, transform: Transform) {
        if let Some(entity) = self.entities.get_mut(id.index()) {
            entity.active = true;
            entity.position = transform.position;
            entity.velocity = Vec2::ZERO;
            entity.rotation = ReplicatedScalar::authoritative(transform.rotation);
            entity.intent = Intent {
                movement: Vec2::ZERO,
                aim: transform.rotation,
            };
        }
    }

    fn deactivate(&mut self, id: InstanceId) {
        if let Some(entity) = self.entities.get_mut(id.index()) {
            *entity = Entity::blank(id, entity.prefab);
        }
    }
}

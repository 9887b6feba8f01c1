//! Client-side mirror of the authoritative world.
//!
//! Every spawn and despawn broadcast is replayed through a local
//! [`ObjectPool`] with the same acquire/release contract the server uses, so
//! pooled instances are recycled identically on both ends. Replicated values
//! are held as mirrors: they only change when the server says so, apart from
//! the owner's short-lived predictions.

use crate::health::{Hazard, HealthDisplay};
use glam::Vec2;
use log::{debug, warn};
use shared::math::lerp_angle;
use shared::{
    AbilityEffect, AbilitySet, ClientId, ConfigRef, EntityState, Health, InstanceId, NetId,
    ObjectCatalogs, ObjectConfig, ObjectPool, PoolHost, PrefabKind, ReplicatedScalar, Role,
    ScalarValue, ShipConfig, SpawnInfo, Team, Transform, WorldConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Things the presentation layer may want to react to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldEvent {
    Died(NetId),
    Corrected { id: NetId, error: f32 },
}

#[derive(Debug, Clone)]
pub enum ClientBinding {
    Unbound,
    Ship(Arc<ShipConfig>),
    Object(Arc<ObjectConfig>),
}

#[derive(Debug, Clone)]
pub struct ClientEntity {
    pub instance: InstanceId,
    pub prefab: PrefabKind,
    pub net_id: Option<NetId>,
    pub active: bool,
    pub role: Role,
    pub owner: Option<ClientId>,
    /// Position shown locally: predicted for the owner, extrapolated for observers.
    pub position: Vec2,
    pub velocity: Vec2,
    /// Last position and velocity received from the server.
    pub server_position: Vec2,
    pub server_velocity: Vec2,
    pub radius: f32,
    pub rotation: ReplicatedScalar<f32>,
    /// Smoothed rotation for observers; equals the predicted rotation for the owner.
    pub display_rotation: f32,
    pub team: ReplicatedScalar<Team>,
    pub dash_active: ReplicatedScalar<bool>,
    pub config: ClientBinding,
    pub config_ref: Option<ConfigRef>,
    pub health: Option<Health>,
    pub health_display: Option<HealthDisplay>,
    pub collision_damage: Option<f32>,
    /// Local ability records, only present on the owned ship.
    pub abilities: Option<AbilitySet>,
    pub dead: bool,
}

impl ClientEntity {
    fn blank(instance: InstanceId, prefab: PrefabKind) -> Self {
        Self {
            instance,
            prefab,
            net_id: None,
            active: false,
            role: Role::Observer,
            owner: None,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            server_position: Vec2::ZERO,
            server_velocity: Vec2::ZERO,
            radius: 0.0,
            rotation: ReplicatedScalar::mirror(0.0),
            display_rotation: 0.0,
            team: ReplicatedScalar::mirror(Team::Neutral),
            dash_active: ReplicatedScalar::mirror(false),
            config: ClientBinding::Unbound,
            config_ref: None,
            health: None,
            health_display: None,
            collision_damage: None,
            abilities: None,
            dead: false,
        }
    }

    pub fn ship_config(&self) -> Option<&Arc<ShipConfig>> {
        match &self.config {
            ClientBinding::Ship(config) => Some(config),
            _ => None,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.role == Role::Owner
    }
}

/// Entity storage the local pool allocates from.
#[derive(Debug, Default)]
pub struct Arena {
    entities: Vec<ClientEntity>,
    retired: Vec<InstanceId>,
}

impl Arena {
    pub fn get(&self, id: InstanceId) -> Option<&ClientEntity> {
        self.entities.get(id.index())
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut ClientEntity> {
        self.entities.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn create_ship(&mut self, transform: Transform) -> InstanceId {
        let id = match self.retired.pop() {
            Some(id) => {
                self.entities[id.index()] = ClientEntity::blank(id, PrefabKind::Ship);
                id
            }
            None => self.instantiate(PrefabKind::Ship),
        };
        self.activate(id, transform);
        id
    }

    fn destroy(&mut self, id: InstanceId) {
        self.deactivate(id);
        self.retired.push(id);
    }
}

impl PoolHost for Arena {
    fn instantiate(&mut self, kind: PrefabKind) -> InstanceId {
        let id = InstanceId(self.entities.len() as u32);
        self.entities.push(ClientEntity::blank(id, kind));
        id
    }

    fn activate(&mut self, id: InstanceId, transform: Transform) {
        if let Some(entity) = self.entities.get_mut(id.index()) {
            entity.active = true;
            entity.position = transform.position;
            entity.server_position = transform.position;
            entity.rotation = ReplicatedScalar::mirror(transform.rotation);
            entity.display_rotation = transform.rotation;
        }
    }

    fn deactivate(&mut self, id: InstanceId) {
        if let Some(entity) = self.entities.get_mut(id.index()) {
            *entity = ClientEntity::blank(id, entity.prefab);
        }
    }
}

pub struct ClientWorld {
    local: Option<ClientId>,
    arena: Arena,
    pool: ObjectPool,
    by_net_id: HashMap<NetId, InstanceId>,
    ships: Vec<Arc<ShipConfig>>,
    catalogs: ObjectCatalogs,
    config: Arc<WorldConfig>,
    events: Vec<WorldEvent>,
    last_tick: u32,
}

impl ClientWorld {
    pub fn new(config: WorldConfig, ships: Vec<ShipConfig>, catalogs: ObjectCatalogs) -> Self {
        let mut arena = Arena::default();
        let mut pool = ObjectPool::new();
        for (kind, prewarm) in [
            (PrefabKind::Bullet, config.bullet_prewarm),
            (PrefabKind::WorldObject, config.object_prewarm),
        ] {
            if let Err(e) = pool.register(&mut arena, kind, prewarm) {
                warn!("Failed to register {:?} pool: {}", kind, e);
            }
        }

        let mut ships: Vec<Arc<ShipConfig>> = ships.into_iter().map(Arc::new).collect();
        if ships.is_empty() {
            ships.push(Arc::new(ShipConfig::default()));
        }

        Self {
            local: None,
            arena,
            pool,
            by_net_id: HashMap::new(),
            ships,
            catalogs,
            config: Arc::new(config),
            events: Vec::new(),
            last_tick: 0,
        }
    }

    pub fn with_defaults(config: WorldConfig) -> Self {
        Self::new(config, vec![ShipConfig::default()], ObjectCatalogs::builtin())
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn local_client(&self) -> Option<ClientId> {
        self.local
    }

    pub fn set_local_client(&mut self, client: Option<ClientId>) {
        self.local = client;
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn last_tick(&self) -> u32 {
        self.last_tick
    }

    pub fn get(&self, net_id: NetId) -> Option<&ClientEntity> {
        self.by_net_id.get(&net_id).and_then(|id| self.arena.get(*id))
    }

    pub fn get_mut(&mut self, net_id: NetId) -> Option<&mut ClientEntity> {
        let id = *self.by_net_id.get(&net_id)?;
        self.arena.get_mut(id)
    }

    pub fn contains(&self, net_id: NetId) -> bool {
        self.by_net_id.contains_key(&net_id)
    }

    pub fn spawned_count(&self) -> usize {
        self.by_net_id.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &ClientEntity> {
        self.by_net_id.values().filter_map(|id| self.arena.get(*id))
    }

    /// The ship owned by this client, if it is currently spawned.
    pub fn owned_ship(&self) -> Option<NetId> {
        self.entities()
            .find(|entity| entity.is_owned() && entity.prefab == PrefabKind::Ship)
            .and_then(|entity| entity.net_id)
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    /// Materializes or reuses a local instance for a spawn broadcast.
    pub fn apply_spawn(&mut self, info: SpawnInfo) -> Option<InstanceId> {
        if self.by_net_id.contains_key(&info.id) {
            debug!("Duplicate spawn for {}", info.id);
            return None;
        }

        let id = if info.prefab.is_poolable() {
            match self.pool.acquire(&mut self.arena, info.prefab, info.transform) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Cannot mirror spawn of {}: {}", info.id, e);
                    return None;
                }
            }
        } else {
            self.arena.create_ship(info.transform)
        };
        if self.pool.contains(id) {
            if let Err(e) = self.pool.mark_spawned(id) {
                warn!("Mirrored {} outside pool bookkeeping: {}", info.id, e);
            }
        }

        let binding = self.resolve(info.config);
        let role = Role::resolve(false, info.owner, self.local);
        let entity = self.arena.get_mut(id)?;
        entity.net_id = Some(info.id);
        entity.role = role;
        entity.owner = info.owner;
        entity.velocity = info.velocity;
        entity.server_velocity = info.velocity;
        entity.team = ReplicatedScalar::mirror(info.team);
        entity.config_ref = Some(info.config);

        match &binding {
            ClientBinding::Ship(config) if info.prefab == PrefabKind::Ship => {
                entity.radius = config.radius;
                let mut health = Health::mirror(config.max_health);
                if let Some(current) = info.health {
                    health.scalar_mut().receive(0, current);
                }
                entity.health_display = Some(HealthDisplay::new(config.max_health, health.current()));
                entity.health = Some(health);
                if role == Role::Owner {
                    entity.abilities = Some(AbilitySet::from_config(config));
                }
            }
            ClientBinding::Ship(config) => {
                entity.radius = config.bullet_radius;
            }
            ClientBinding::Object(config) => {
                entity.radius = config.radius;
                entity.collision_damage = Some(config.collision_damage);
                let mut health = Health::mirror(config.max_health);
                if let Some(current) = info.health {
                    health.scalar_mut().receive(0, current);
                }
                entity.health_display = Some(HealthDisplay::new(config.max_health, health.current()));
                entity.health = Some(health);
            }
            ClientBinding::Unbound => {
                debug!("No local configuration for {:?}", info.config);
            }
        }
        entity.config = binding;

        self.by_net_id.insert(info.id, id);
        Some(id)
    }

    fn resolve(&self, config: ConfigRef) -> ClientBinding {
        match config {
            ConfigRef::Ship { index } | ConfigRef::Bullet { ship_index: index } => self
                .ships
                .get(index as usize)
                .map_or(ClientBinding::Unbound, |c| ClientBinding::Ship(Arc::clone(c))),
            ConfigRef::Object { slot, index } => self
                .catalogs
                .config(slot, index as usize)
                .map_or(ClientBinding::Unbound, |c| ClientBinding::Object(Arc::clone(c))),
        }
    }

    /// Drops the local instance, returning pooled ones to the local pool.
    pub fn apply_despawn(&mut self, net_id: NetId) -> bool {
        let Some(id) = self.by_net_id.remove(&net_id) else {
            return false;
        };
        if self.pool.contains(id) {
            let released = self
                .pool
                .mark_despawned(id)
                .and_then(|_| self.pool.release(&mut self.arena, id));
            if let Err(e) = released {
                warn!("Failed to recycle {}: {}", net_id, e);
            }
        } else {
            self.arena.destroy(id);
        }
        true
    }

    pub fn apply_died(&mut self, net_id: NetId) {
        if let Some(entity) = self.get_mut(net_id) {
            if !entity.dead {
                entity.dead = true;
                self.events.push(WorldEvent::Died(net_id));
            }
        }
    }

    /// Routes an authoritative value change to the matching mirror.
    pub fn apply_scalar(&mut self, net_id: NetId, revision: u32, value: ScalarValue) -> bool {
        let Some(entity) = self.get_mut(net_id) else {
            return false;
        };
        match value {
            ScalarValue::Health(health) => {
                let Some(record) = entity.health.as_mut() else {
                    return false;
                };
                record.scalar_mut().receive(revision, health);
                if let Some(display) = entity.health_display.as_mut() {
                    display.set_authoritative(record.current());
                }
            }
            ScalarValue::Team(team) => {
                entity.team.receive(revision, team);
            }
            ScalarValue::DashActive(active) => {
                entity.dash_active.receive(revision, active);
            }
            ScalarValue::Rotation(rotation) => {
                // The owner keeps displaying its predicted heading.
                entity.rotation.receive(revision, rotation);
            }
        }
        true
    }

    /// Authoritative outcome of an ability: every observer, owner included, takes it as is.
    pub fn apply_effect(&mut self, net_id: NetId, effect: AbilityEffect) -> bool {
        let Some(entity) = self.get_mut(net_id) else {
            return false;
        };
        match effect {
            AbilityEffect::DashStarted { position, velocity } => {
                entity.server_position = position;
                entity.server_velocity = velocity;
                entity.position = position;
                entity.velocity = velocity;
            }
            AbilityEffect::BlinkedTo { position } => {
                entity.server_position = position;
                entity.server_velocity = Vec2::ZERO;
                entity.position = position;
                entity.velocity = Vec2::ZERO;
            }
            AbilityEffect::Ended { ability } => {
                if let Some(abilities) = entity.abilities.as_mut() {
                    abilities.get_mut(ability).end();
                }
            }
        }
        true
    }

    /// Applies one authoritative transform snapshot.
    ///
    /// Observers take the server's state directly. The owner does too, unless
    /// a non-zero snap distance is configured and its drift is within it. There
    /// is no replay: prediction continues from the corrected state.
    pub fn apply_snapshot(&mut self, tick: u32, states: &[EntityState]) {
        self.last_tick = tick;
        let snap = self.config.reconcile_snap_distance;
        for state in states {
            let Some(entity) = self.get_mut(state.id) else {
                continue;
            };
            entity.server_position = state.position;
            entity.server_velocity = state.velocity;

            if entity.is_owned() {
                let error = entity.position.distance(state.position);
                if error > snap {
                    debug!("Correcting {} by {:.1} units", state.id, error);
                    entity.position = state.position;
                    entity.velocity = state.velocity;
                    self.events.push(WorldEvent::Corrected {
                        id: state.id,
                        error,
                    });
                }
            } else {
                entity.position = state.position;
                entity.velocity = state.velocity;
            }
        }
    }

    /// Extrapolates everything between snapshots and eases displayed values.
    pub fn advance(&mut self, dt: f32) {
        let rate = self.config.smoothing_rate;
        let ids: Vec<InstanceId> = self.by_net_id.values().copied().collect();
        for id in ids {
            let Some(entity) = self.arena.get_mut(id) else {
                continue;
            };
            if !entity.is_owned() {
                entity.position += entity.velocity * dt;
                entity.display_rotation =
                    lerp_angle(entity.display_rotation, *entity.rotation.get(), rate * dt);
            }
            if let Some(display) = entity.health_display.as_mut() {
                display.update(dt, rate);
            }
        }
    }

    /// Damaging things the owned ship can run into.
    pub fn hazards(&self) -> Vec<Hazard> {
        self.entities()
            .filter(|e| !e.is_owned() && !e.dead)
            .filter_map(|e| {
                Some(Hazard {
                    id: e.net_id?,
                    position: e.position,
                    radius: e.radius,
                    damage: e.collision_damage?,
                })
            })
            .collect()
    }

    /// Forgets everything, e.g. after the server dropped us.
    pub fn clear(&mut self) {
        let ids: Vec<NetId> = self.by_net_id.keys().copied().collect();
        for id in ids {
            self.apply_despawn(id);
        }
        self.events.clear();
        self.local = None;
    }
}

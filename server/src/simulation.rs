//! Server simulation context.
//!
//! [`ServerSimulation`] owns every authoritative subsystem of one server process:
//! the entity arena, the object pool, the sector generator and the timer wheel.
//! It never touches sockets. Requests come in through
//! [`ServerSimulation::handle_request`], outgoing packets pile up in its
//! [`Outbox`] and the network layer drains them after each call.

use crate::generator::SectorGenerator;
use crate::world::World;
use glam::Vec2;
use log::{debug, info, warn};
use shared::math::{circles_overlap, clamp_axis, normalize_angle, rotate_towards};
use shared::{
    AbilityKind, CatalogSlot, ClientId, EntityState, InstanceId, NetId, ObjectCatalogs,
    ObjectConfig, ObjectPool, Outbox, Packet, PoolError, PrefabKind, ScalarValue,
    SectorCoord, ShipConfig, Team, TimerWheel, Transform, WorldConfig,
};
use shared::protocol::SNAPSHOT_CHUNK;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Deferred work checked once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    AbilityEnd { entity: NetId, ability: AbilityKind },
    BulletExpiry(NetId),
    SectorRefresh,
}

impl TimerKey {
    fn entity(&self) -> Option<NetId> {
        match self {
            TimerKey::AbilityEnd { entity, .. } | TimerKey::BulletExpiry(entity) => Some(*entity),
            TimerKey::SectorRefresh => None,
        }
    }
}

/// Borrowed view used by anything that brings entities in or out of existence.
///
/// Every spawn goes through [`Spawner::spawn`] after an acquire, and every
/// despawn broadcast precedes the matching release.
pub struct Spawner<'a> {
    pub world: &'a mut World,
    pub pool: &'a mut ObjectPool,
    pub outbox: &'a mut Outbox,
}

impl<'a> Spawner<'a> {
    pub fn acquire(&mut self, kind: PrefabKind, transform: Transform) -> Result<InstanceId, PoolError> {
        self.pool.acquire(self.world, kind, transform)
    }

    /// Makes an active instance visible to observers, optionally skipping one client.
    pub fn spawn(&mut self, id: InstanceId, exclude: Option<ClientId>) -> Option<NetId> {
        let net_id = self.world.assign_net_id(id)?;
        if self.pool.contains(id) {
            if let Err(e) = self.pool.mark_spawned(id) {
                warn!("Spawned {} outside pool bookkeeping: {}", net_id, e);
            }
        }

        let info = self.world.get(id).and_then(|entity| entity.spawn_info())?;
        let packet = Packet::EntitySpawned(info);
        match exclude {
            Some(client) => self.outbox.broadcast_except(packet, client),
            None => self.outbox.broadcast(packet),
        }
        Some(net_id)
    }

    /// Acquires, binds and spawns one procedurally placed object.
    pub fn spawn_object(
        &mut self,
        transform: Transform,
        slot: CatalogSlot,
        index: u16,
        config: Arc<ObjectConfig>,
    ) -> Result<NetId, PoolError> {
        let id = self.acquire(PrefabKind::WorldObject, transform)?;
        self.world.bind_object(id, slot, index, config);
        match self.spawn(id, None) {
            Some(net_id) => Ok(net_id),
            None => {
                self.pool.release(self.world, id)?;
                Err(PoolError::NotActive(id))
            }
        }
    }

    /// Removes an entity from every observer, then recycles or destroys it.
    pub fn despawn(&mut self, net_id: NetId) -> bool {
        let Some(id) = self.world.clear_net_id(net_id) else {
            return false;
        };
        self.outbox.broadcast(Packet::EntityDespawned { id: net_id });

        if self.pool.contains(id) {
            let released = self
                .pool
                .mark_despawned(id)
                .and_then(|_| self.pool.release(self.world, id));
            if let Err(e) = released {
                warn!("Failed to return {} to the pool: {}", net_id, e);
            }
        } else {
            self.world.destroy(id);
        }
        true
    }

    pub fn is_spawned(&self, net_id: NetId) -> bool {
        self.world.is_spawned(net_id)
    }
}

pub struct ServerSimulation {
    pub(crate) world: World,
    pub(crate) pool: ObjectPool,
    pub(crate) generator: SectorGenerator,
    pub(crate) timers: TimerWheel<TimerKey>,
    pub(crate) outbox: Outbox,
    pub(crate) config: Arc<WorldConfig>,
    pub(crate) ships: Vec<Arc<ShipConfig>>,
    pub(crate) players: HashMap<ClientId, NetId>,
    last_processed: HashMap<ClientId, u32>,
    player_sectors: HashMap<ClientId, SectorCoord>,
    tick: u32,
}

impl ServerSimulation {
    pub fn new(config: WorldConfig, ships: Vec<ShipConfig>, catalogs: ObjectCatalogs) -> Self {
        let config = Arc::new(config);
        let mut ships: Vec<Arc<ShipConfig>> = ships.into_iter().map(Arc::new).collect();
        if ships.is_empty() {
            ships.push(Arc::new(ShipConfig::default()));
        }

        let mut world = World::new();
        let mut pool = ObjectPool::with_cap(config.pool_cap);
        for (kind, prewarm) in [
            (PrefabKind::Bullet, config.bullet_prewarm),
            (PrefabKind::WorldObject, config.object_prewarm),
        ] {
            if let Err(e) = pool.register(&mut world, kind, prewarm) {
                warn!("Failed to register {:?} pool: {}", kind, e);
            }
        }

        let mut timers = TimerWheel::new();
        if config.refresh_interval > 0.0 {
            timers.schedule(TimerKey::SectorRefresh, config.refresh_interval);
        }

        Self {
            generator: SectorGenerator::new(&config, catalogs),
            world,
            pool,
            timers,
            outbox: Outbox::new(),
            config,
            ships,
            players: HashMap::new(),
            last_processed: HashMap::new(),
            player_sectors: HashMap::new(),
            tick: 0,
        }
    }

    pub fn with_defaults(config: WorldConfig) -> Self {
        Self::new(config, vec![ShipConfig::default()], ObjectCatalogs::builtin())
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    pub fn generator(&self) -> &SectorGenerator {
        &self.generator
    }

    pub fn timers(&self) -> &TimerWheel<TimerKey> {
        &self.timers
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn player_ship(&self, client: ClientId) -> Option<NetId> {
        self.players.get(&client).copied()
    }

    pub fn last_processed(&self, client: ClientId) -> u32 {
        self.last_processed.get(&client).copied().unwrap_or(0)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub(crate) fn spawner(&mut self) -> Spawner<'_> {
        Spawner {
            world: &mut self.world,
            pool: &mut self.pool,
            outbox: &mut self.outbox,
        }
    }

    /// Registers a new player: replays the current world to them, then spawns their ship.
    pub fn connect_player(&mut self, client: ClientId) -> Option<NetId> {
        if self.players.contains_key(&client) {
            self.disconnect_player(client);
        }
        self.outbox.send_to_client(client, Packet::Connected { client_id: client });

        let existing: Vec<_> = self.world.spawned().filter_map(|e| e.spawn_info()).collect();
        for info in existing {
            self.outbox.send_to_client(client, Packet::EntitySpawned(info));
        }

        let ship_index = client as usize % self.ships.len();
        let ship_config = Arc::clone(&self.ships[ship_index]);
        let id = self.world.create_ship(Transform::default());
        self.world
            .bind_ship(id, client, ship_index as u16, ship_config, Team::Friend);
        let net_id = self.spawner().spawn(id, None)?;

        self.players.insert(client, net_id);
        self.last_processed.insert(client, 0);
        info!("Player {} joined with ship {}", client, net_id);

        self.enter_sector(client, SectorCoord::new(0, 0));
        Some(net_id)
    }

    pub fn disconnect_player(&mut self, client: ClientId) {
        self.last_processed.remove(&client);
        self.player_sectors.remove(&client);
        if let Some(net_id) = self.players.remove(&client) {
            self.despawn(net_id);
            info!("Player {} left, ship {} despawned", client, net_id);
        }
    }

    /// Despawns an entity and drops any timers still aimed at it.
    pub fn despawn(&mut self, net_id: NetId) -> bool {
        self.timers.cancel_where(|key| key.entity() == Some(net_id));
        self.spawner().despawn(net_id)
    }

    /// Applies one client request. Returns whether it was accepted.
    ///
    /// Requests are judged in arrival order. Sequenced requests that are not
    /// newer than the last one judged for the client are dropped.
    pub fn handle_request(&mut self, client: ClientId, packet: Packet) -> bool {
        if !self.last_processed.contains_key(&client) {
            debug!("Ignoring request from unknown client {}", client);
            return false;
        }

        match packet {
            Packet::Input {
                sequence,
                movement,
                aim,
                ..
            } => {
                if !self.accept_sequence(client, sequence) {
                    return false;
                }
                self.set_intent(client, movement, aim)
            }
            Packet::ActivateAbility {
                sequence,
                ability,
                direction,
            } => {
                if !self.accept_sequence(client, sequence) {
                    return false;
                }
                self.activate_ability(client, ability, direction)
            }
            Packet::DamageRequest { target, amount } => self.request_damage(client, target, amount),
            Packet::RequestRegeneration { sector } => self.request_regeneration(client, sector),
            Packet::SelectCatalog { slot } => {
                let previous = self.generator.select_catalog(slot);
                info!(
                    "Client {} switched sector catalog {:?} -> {:?}",
                    client, previous, slot
                );
                true
            }
            other => {
                warn!("Unexpected packet from client {}: {:?}", client, other);
                false
            }
        }
    }

    fn accept_sequence(&mut self, client: ClientId, sequence: u32) -> bool {
        let last = self.last_processed.entry(client).or_insert(0);
        if sequence <= *last {
            debug!(
                "Dropping stale request {} from client {} (last {})",
                sequence, client, last
            );
            return false;
        }
        *last = sequence;
        true
    }

    fn set_intent(&mut self, client: ClientId, movement: Vec2, aim: f32) -> bool {
        if !movement.is_finite() || !aim.is_finite() {
            debug!("Malformed input from client {}", client);
            return false;
        }
        let Some(ship) = self
            .players
            .get(&client)
            .and_then(|net_id| self.world.by_net_id_mut(*net_id))
        else {
            return false;
        };
        ship.intent.movement = clamp_axis(movement);
        ship.intent.aim = normalize_angle(aim);
        true
    }

    /// Damage reported by a client is only accepted against its own ship.
    fn request_damage(&mut self, client: ClientId, target: NetId, amount: f32) -> bool {
        if self.players.get(&client) != Some(&target) {
            debug!(
                "Client {} requested damage on {} it does not own",
                client, target
            );
            return false;
        }
        !matches!(self.take_damage(target, amount), shared::DamageOutcome::Ignored)
    }

    /// Regeneration hints are honoured for the requester's sector and its direct neighbours.
    fn request_regeneration(&mut self, client: ClientId, sector: SectorCoord) -> bool {
        let Some(current) = self.player_sectors.get(&client).copied() else {
            return false;
        };
        if current.chebyshev_distance(sector) > 1 {
            debug!(
                "Client {} asked to regenerate distant sector {} from {}",
                client, sector, current
            );
            return false;
        }

        let mut spawner = Spawner {
            world: &mut self.world,
            pool: &mut self.pool,
            outbox: &mut self.outbox,
        };
        match self.generator.regenerate(sector, &mut spawner) {
            Ok(count) => {
                debug!("Regenerated {} items in sector {}", count, sector);
                true
            }
            Err(e) => {
                warn!("Regeneration of sector {} failed: {}", sector, e);
                false
            }
        }
    }

    /// Called whenever a player's ship crosses into another sector.
    pub fn enter_sector(&mut self, client: ClientId, sector: SectorCoord) -> Vec<SectorCoord> {
        self.player_sectors.insert(client, sector);
        let mut spawner = Spawner {
            world: &mut self.world,
            pool: &mut self.pool,
            outbox: &mut self.outbox,
        };
        self.generator.notify_sector_entered(sector, &mut spawner)
    }

    /// Advances the authoritative simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        let dt = dt.max(0.0);
        self.tick = self.tick.wrapping_add(1);

        self.run_timers(dt);
        self.step_ships(dt);
        self.integrate(dt);
        self.resolve_bullet_hits();
        self.track_sectors();
        self.flush_scalar_changes();
        self.broadcast_snapshot();
    }

    fn run_timers(&mut self, dt: f32) {
        for key in self.timers.advance(dt) {
            match key {
                TimerKey::AbilityEnd { entity, ability } => {
                    self.end_ability(entity, ability);
                }
                TimerKey::BulletExpiry(bullet) => {
                    self.despawn(bullet);
                }
                TimerKey::SectorRefresh => {
                    let mut spawner = Spawner {
                        world: &mut self.world,
                        pool: &mut self.pool,
                        outbox: &mut self.outbox,
                    };
                    let count = self.generator.refresh(&mut spawner);
                    if count > 0 {
                        info!("Sector refresh reactivated {} objects", count);
                    }
                    self.timers
                        .schedule(TimerKey::SectorRefresh, self.config.refresh_interval);
                }
            }
        }
    }

    fn step_ships(&mut self, dt: f32) {
        for ship in self.world.spawned_mut() {
            let Some(config) = ship.config.ship().cloned() else {
                continue;
            };
            let Some(abilities) = ship.abilities.as_mut() else {
                continue;
            };
            abilities.tick(dt);

            if !abilities.movement_locked() {
                ship.velocity =
                    shared::ability::movement_velocity(ship.intent.movement, config.move_speed);
            }

            let rotation = rotate_towards(
                *ship.rotation.get(),
                ship.intent.aim,
                config.rotation_speed * dt,
            );
            let _ = ship.rotation.set(rotation);
        }
    }

    fn integrate(&mut self, dt: f32) {
        for entity in self.world.spawned_mut() {
            entity.position += entity.velocity * dt;
        }
    }

    /// Server bullets damage hostile world objects and are consumed on impact.
    fn resolve_bullet_hits(&mut self) {
        let targets: Vec<(NetId, Vec2, f32, Team)> = self
            .world
            .spawned()
            .filter(|e| e.prefab == PrefabKind::WorldObject && e.owner.is_none())
            .filter(|e| e.health.as_ref().is_some_and(|h| !h.is_dead()))
            .filter_map(|e| Some((e.net_id?, e.position, e.radius, *e.team.get())))
            .collect();
        if targets.is_empty() {
            return;
        }

        let mut hits = Vec::new();
        for bullet in self.world.spawned().filter(|e| e.prefab == PrefabKind::Bullet) {
            let (Some(bullet_id), Some(damage)) = (bullet.net_id, bullet.damage) else {
                continue;
            };
            let team = *bullet.team.get();
            let hit = targets.iter().find(|(_, position, radius, target_team)| {
                team.is_hostile_to(*target_team)
                    && circles_overlap(bullet.position, bullet.radius, *position, *radius)
            });
            if let Some((target, ..)) = hit {
                hits.push((bullet_id, *target, damage.amount));
            }
        }

        for (bullet, target, amount) in hits {
            self.despawn(bullet);
            self.take_damage(target, amount);
        }
    }

    fn track_sectors(&mut self) {
        let size = self.config.sector_size;
        let moved: Vec<(ClientId, SectorCoord)> = self
            .players
            .iter()
            .filter_map(|(client, net_id)| {
                let ship = self.world.by_net_id(*net_id)?;
                let sector = SectorCoord::containing(ship.position, size);
                (self.player_sectors.get(client) != Some(&sector)).then_some((*client, sector))
            })
            .collect();

        for (client, sector) in moved {
            debug!("Player {} entered sector {}", client, sector);
            self.enter_sector(client, sector);
        }
    }

    fn flush_scalar_changes(&mut self) {
        let ids: Vec<NetId> = self.world.spawned().filter_map(|e| e.net_id).collect();
        for id in ids {
            self.flush_entity(id);
        }
    }

    /// Broadcasts any pending replicated-value changes of one entity.
    pub(crate) fn flush_entity(&mut self, id: NetId) {
        let Some(entity) = self.world.by_net_id_mut(id) else {
            return;
        };

        let mut changes = Vec::new();
        if let Some(health) = entity.health.as_mut() {
            if let Some((revision, value)) = health.scalar_mut().take_change() {
                changes.push((revision, ScalarValue::Health(value)));
            }
        }
        if let Some((revision, value)) = entity.team.take_change() {
            changes.push((revision, ScalarValue::Team(value)));
        }
        if let Some((revision, value)) = entity.dash_active.take_change() {
            changes.push((revision, ScalarValue::DashActive(value)));
        }
        if let Some((revision, value)) = entity.rotation.take_change() {
            changes.push((revision, ScalarValue::Rotation(value)));
        }

        for (revision, value) in changes {
            self.outbox.broadcast(Packet::ScalarChanged {
                id,
                revision,
                value,
            });
        }
    }

    fn broadcast_snapshot(&mut self) {
        if self.last_processed.is_empty() {
            return;
        }

        let states: Vec<EntityState> = self.world.spawned().filter_map(|e| e.state()).collect();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis()
            .min(u64::MAX as u128) as u64;

        let chunks: Vec<Vec<EntityState>> = if states.is_empty() {
            vec![Vec::new()]
        } else {
            states.chunks(SNAPSHOT_CHUNK).map(<[EntityState]>::to_vec).collect()
        };
        for entities in chunks {
            self.outbox.broadcast(Packet::GameState {
                tick: self.tick,
                timestamp,
                last_processed_input: self.last_processed.clone(),
                entities,
            });
        }
    }
}

//! Procedural sector generator and streamer.
//!
//! Sector content positions come from [`shared::candidate_positions`], a pure
//! function of the world seed and the sector coordinates. The generator adds the
//! catalog choice and the pool acquisitions on top, and remembers what it placed
//! so that refresh passes can bring destroyed items back at the same spot.

use crate::simulation::Spawner;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::sector::keyed_hash;
use shared::{
    candidate_positions, CatalogSlot, NetId, ObjectCatalogs, Placement,
    PlacementParams, SectorCoord, Transform, WorldConfig,
};
use std::collections::BTreeMap;
use thiserror::Error;

const SALT_CATALOG: u64 = 0x2545_F491_4F6C_DD1D;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("catalog {0:?} has no object configurations")]
    EmptyCatalog(CatalogSlot),
}

/// One placed piece of sector content.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorItem {
    pub placement: Placement,
    pub slot: CatalogSlot,
    pub config_index: u16,
    /// Entity currently standing in for this item, if any.
    pub entity: Option<NetId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub coord: SectorCoord,
    pub items: Vec<SectorItem>,
    pub refreshes: u32,
}

pub struct SectorGenerator {
    seed: u64,
    params: PlacementParams,
    catalogs: ObjectCatalogs,
    active: CatalogSlot,
    /// Ordered so refresh passes visit sectors deterministically.
    sectors: BTreeMap<SectorCoord, Sector>,
}

impl SectorGenerator {
    pub fn new(config: &WorldConfig, catalogs: ObjectCatalogs) -> Self {
        Self {
            seed: config.seed,
            params: PlacementParams::from(config),
            catalogs,
            active: CatalogSlot::Primary,
            sectors: BTreeMap::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn active_catalog(&self) -> CatalogSlot {
        self.active
    }

    pub fn is_generated(&self, coord: SectorCoord) -> bool {
        self.sectors.contains_key(&coord)
    }

    pub fn generated_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn sector(&self, coord: SectorCoord) -> Option<&Sector> {
        self.sectors.get(&coord)
    }

    pub fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.sectors.values()
    }

    /// Where content of `coord` goes, recomputed from the seed alone.
    pub fn layout(&self, coord: SectorCoord) -> Vec<Placement> {
        candidate_positions(self.seed, coord, &self.params)
    }

    /// Switches the catalog used for sectors generated from now on. Returns the previous one.
    pub fn select_catalog(&mut self, slot: CatalogSlot) -> CatalogSlot {
        std::mem::replace(&mut self.active, slot)
    }

    /// Generates `coord` on first visit. Returns `Ok(false)` if it already exists.
    pub fn generate_sector(
        &mut self,
        coord: SectorCoord,
        spawner: &mut Spawner<'_>,
    ) -> Result<bool, GeneratorError> {
        if self.sectors.contains_key(&coord) {
            return Ok(false);
        }
        let slot = self.active;
        let catalog_len = self.catalogs.get(slot).len();
        if catalog_len == 0 {
            warn!("Refusing to populate sector {} from empty catalog {:?}", coord, slot);
            return Err(GeneratorError::EmptyCatalog(slot));
        }

        let mut items = Vec::new();
        for placement in self.layout(coord) {
            let config_index = self.pick_config(coord, placement.index, catalog_len);
            let mut item = SectorItem {
                placement,
                slot,
                config_index,
                entity: None,
            };
            item.entity = self.spawn_item(&item, spawner);
            items.push(item);
        }

        let spawned = items.iter().filter(|item| item.entity.is_some()).count();
        info!(
            "Generated sector {} with {}/{} objects from {:?}",
            coord,
            spawned,
            items.len(),
            slot
        );
        self.sectors.insert(
            coord,
            Sector {
                coord,
                items,
                refreshes: 0,
            },
        );
        Ok(true)
    }

    /// Makes sure the 3x3 block around `coord` exists. Returns the sectors created.
    pub fn notify_sector_entered(
        &mut self,
        coord: SectorCoord,
        spawner: &mut Spawner<'_>,
    ) -> Vec<SectorCoord> {
        let mut created = Vec::new();
        for neighbour in coord.neighborhood() {
            match self.generate_sector(neighbour, spawner) {
                Ok(true) => created.push(neighbour),
                Ok(false) => {}
                Err(e) => warn!("Sector {} left empty: {}", neighbour, e),
            }
        }
        created
    }

    /// Re-acquires every generated item that is no longer alive, at its original
    /// placement. Nothing already standing is touched. Returns the number respawned.
    pub fn refresh(&mut self, spawner: &mut Spawner<'_>) -> usize {
        let coords: Vec<SectorCoord> = self.sectors.keys().copied().collect();
        coords
            .into_iter()
            .map(|coord| self.refresh_sector(coord, spawner))
            .sum()
    }

    fn refresh_sector(&mut self, coord: SectorCoord, spawner: &mut Spawner<'_>) -> usize {
        let Some(mut sector) = self.sectors.remove(&coord) else {
            return 0;
        };
        let mut count = 0;
        for item in &mut sector.items {
            if item.entity.is_some_and(|id| spawner.is_spawned(id)) {
                continue;
            }
            item.entity = self.spawn_item(item, spawner);
            if item.entity.is_some() {
                count += 1;
            }
        }
        sector.refreshes += 1;
        self.sectors.insert(coord, sector);
        count
    }

    /// Client hint: generates `coord` if it is new, otherwise refreshes just that sector.
    pub fn regenerate(
        &mut self,
        coord: SectorCoord,
        spawner: &mut Spawner<'_>,
    ) -> Result<usize, GeneratorError> {
        if self.generate_sector(coord, spawner)? {
            return Ok(self
                .sectors
                .get(&coord)
                .map_or(0, |s| s.items.iter().filter(|i| i.entity.is_some()).count()));
        }
        Ok(self.refresh_sector(coord, spawner))
    }

    fn pick_config(&self, coord: SectorCoord, index: u32, catalog_len: usize) -> u16 {
        let mut rng = StdRng::seed_from_u64(keyed_hash(
            self.seed ^ SALT_CATALOG,
            coord.x as i64,
            coord.y as i64,
            index as u64,
        ));
        rng.gen_range(0..catalog_len) as u16
    }

    fn spawn_item(&self, item: &SectorItem, spawner: &mut Spawner<'_>) -> Option<NetId> {
        let config = self
            .catalogs
            .config(item.slot, item.config_index as usize)?
            .clone();
        let transform = Transform::new(item.placement.position, item.placement.rotation);
        match spawner.spawn_object(transform, item.slot, item.config_index, config) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Could not place item {}: {}", item.placement.index, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use shared::{ObjectConfig, ObjectPool, Outbox, Packet, PrefabKind};

    struct Harness {
        world: World,
        pool: ObjectPool,
        outbox: Outbox,
    }

    impl Harness {
        fn new(cap: Option<usize>) -> Self {
            let mut world = World::new();
            let mut pool = ObjectPool::with_cap(cap);
            pool.register(&mut world, PrefabKind::WorldObject, 0).unwrap();
            Self {
                world,
                pool,
                outbox: Outbox::new(),
            }
        }

        fn spawner(&mut self) -> Spawner<'_> {
            Spawner {
                world: &mut self.world,
                pool: &mut self.pool,
                outbox: &mut self.outbox,
            }
        }
    }

    fn config() -> WorldConfig {
        WorldConfig {
            items_per_sector: 10,
            ..WorldConfig::default()
        }
    }

    #[test]
    fn test_generate_is_idempotent() {
        let mut harness = Harness::new(None);
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let coord = SectorCoord::new(2, -1);

        assert_eq!(generator.generate_sector(coord, &mut harness.spawner()), Ok(true));
        let spawned = harness.world.spawned_count();
        assert_eq!(spawned, generator.layout(coord).len());

        assert_eq!(generator.generate_sector(coord, &mut harness.spawner()), Ok(false));
        assert_eq!(harness.world.spawned_count(), spawned);
    }

    #[test]
    fn test_spawn_broadcasts_position_and_config_index() {
        let mut harness = Harness::new(None);
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let coord = SectorCoord::new(0, 1);
        generator
            .generate_sector(coord, &mut harness.spawner())
            .unwrap();

        let sector = generator.sector(coord).unwrap();
        let spawns: Vec<_> = harness
            .outbox
            .iter()
            .filter_map(|o| match o.packet() {
                Packet::EntitySpawned(info) => Some(info.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(spawns.len(), sector.items.len());
        for (info, item) in spawns.iter().zip(&sector.items) {
            assert_eq!(info.transform.position, item.placement.position);
            assert_eq!(
                info.config,
                shared::ConfigRef::Object {
                    slot: item.slot,
                    index: item.config_index
                }
            );
        }
    }

    #[test]
    fn test_same_seed_same_content() {
        let mut first = Harness::new(None);
        let mut second = Harness::new(None);
        let mut a = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let mut b = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let coord = SectorCoord::new(-4, 7);

        a.generate_sector(coord, &mut first.spawner()).unwrap();
        b.generate_sector(coord, &mut second.spawner()).unwrap();

        let layout = |g: &SectorGenerator| {
            g.sector(coord)
                .unwrap()
                .items
                .iter()
                .map(|i| (i.placement.clone(), i.config_index))
                .collect::<Vec<_>>()
        };
        assert_eq!(layout(&a), layout(&b));
    }

    #[test]
    fn test_neighbourhood_skips_generated_sectors() {
        let mut harness = Harness::new(None);
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());

        let created = generator.notify_sector_entered(SectorCoord::new(0, 0), &mut harness.spawner());
        assert_eq!(created.len(), 9);
        let created = generator.notify_sector_entered(SectorCoord::new(1, 0), &mut harness.spawner());
        assert_eq!(created.len(), 3);
        assert!(created.iter().all(|c| c.x == 2));
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        let mut harness = Harness::new(None);
        let catalogs = ObjectCatalogs::new(vec![ObjectConfig::default()], Vec::new());
        let mut generator = SectorGenerator::new(&config(), catalogs);

        assert_eq!(generator.select_catalog(CatalogSlot::Secondary), CatalogSlot::Primary);
        assert_eq!(
            generator.generate_sector(SectorCoord::new(0, 0), &mut harness.spawner()),
            Err(GeneratorError::EmptyCatalog(CatalogSlot::Secondary))
        );
        assert!(!generator.is_generated(SectorCoord::new(0, 0)));
        assert_eq!(harness.world.spawned_count(), 0);
    }

    #[test]
    fn test_catalog_switch_keeps_existing_sectors() {
        let mut harness = Harness::new(None);
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let first = SectorCoord::new(0, 0);
        generator.generate_sector(first, &mut harness.spawner()).unwrap();
        let before = generator.sector(first).unwrap().clone();

        generator.select_catalog(CatalogSlot::Secondary);
        let second = SectorCoord::new(1, 0);
        generator.generate_sector(second, &mut harness.spawner()).unwrap();

        assert_eq!(generator.sector(first), Some(&before));
        assert!(generator
            .sector(second)
            .unwrap()
            .items
            .iter()
            .all(|i| i.slot == CatalogSlot::Secondary));
    }

    #[test]
    fn test_refresh_restores_only_missing_items() {
        let mut harness = Harness::new(None);
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let coord = SectorCoord::new(3, 3);
        generator.generate_sector(coord, &mut harness.spawner()).unwrap();
        let items = generator.sector(coord).unwrap().items.clone();
        assert!(items.len() >= 2);

        let destroyed = items[0].entity.unwrap();
        let survivor = items[1].entity.unwrap();
        assert!(harness.spawner().despawn(destroyed));

        assert_eq!(generator.refresh(&mut harness.spawner()), 1);
        let sector = generator.sector(coord).unwrap();
        assert_eq!(sector.refreshes, 1);
        assert_eq!(sector.items[1].entity, Some(survivor));
        let replacement = sector.items[0].entity.unwrap();
        assert_ne!(replacement, destroyed);
        let entity = harness.world.by_net_id(replacement).unwrap();
        assert_eq!(entity.position, items[0].placement.position);
        assert_eq!(harness.pool.total_count(PrefabKind::WorldObject), items.len());

        assert_eq!(generator.refresh(&mut harness.spawner()), 0);
    }

    #[test]
    fn test_pool_cap_leaves_items_for_later() {
        let mut harness = Harness::new(Some(2));
        let mut generator = SectorGenerator::new(&config(), ObjectCatalogs::builtin());
        let coord = SectorCoord::new(1, 1);
        generator.generate_sector(coord, &mut harness.spawner()).unwrap();

        let sector = generator.sector(coord).unwrap();
        assert!(sector.items.len() > 2);
        assert_eq!(sector.items.iter().filter(|i| i.entity.is_some()).count(), 2);
        assert_eq!(harness.world.spawned_count(), 2);
        // Instances are never created past the cap.
        assert_eq!(harness.world.len(), 2);
    }
}

//! Networked object pool.
//!
//! Each process keeps its own pool; the server's drives spawns and every client
//! mirrors it through the same acquire/release contract when spawn and despawn
//! broadcasts arrive. The pool only tracks free-list bookkeeping. Building,
//! resetting and stripping instances is delegated to the [`PoolHost`] that owns
//! the entity arena.

use crate::entity::{InstanceId, PrefabKind, Transform};
use log::{debug, error};
use std::collections::HashMap;
use thiserror::Error;

/// Entity arena a pool allocates from.
pub trait PoolHost {
    /// Builds a new, inactive instance of `kind`.
    fn instantiate(&mut self, kind: PrefabKind) -> InstanceId;
    /// Resets the instance to `transform` and makes it active.
    fn activate(&mut self, id: InstanceId, transform: Transform);
    /// Deactivates the instance and strips any per-activation state.
    fn deactivate(&mut self, id: InstanceId);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("prefab kind {0:?} was never registered")]
    Unregistered(PrefabKind),
    #[error("prefab kind {0:?} cannot be pooled")]
    NotPoolable(PrefabKind),
    #[error("instance {0:?} does not belong to this pool")]
    UnknownInstance(InstanceId),
    #[error("instance {0:?} is still spawned for observers")]
    StillSpawned(InstanceId),
    #[error("instance {0:?} is not active")]
    NotActive(InstanceId),
    #[error("pool for {kind:?} reached its cap of {cap} instances")]
    CapReached { kind: PrefabKind, cap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Active { spawned: bool },
}

#[derive(Debug, Default)]
struct PoolEntry {
    free: Vec<InstanceId>,
    total: usize,
}

#[derive(Debug, Default)]
pub struct ObjectPool {
    entries: HashMap<PrefabKind, PoolEntry>,
    slots: HashMap<InstanceId, (PrefabKind, SlotState)>,
    cap: Option<usize>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool that refuses to grow any kind past `cap` instances.
    pub fn with_cap(cap: Option<usize>) -> Self {
        Self {
            cap,
            ..Self::default()
        }
    }

    /// Pre-builds `prewarm` inactive instances of `kind`. Registering a kind twice is a no-op.
    pub fn register<H: PoolHost>(
        &mut self,
        host: &mut H,
        kind: PrefabKind,
        prewarm: usize,
    ) -> Result<(), PoolError> {
        if !kind.is_poolable() {
            error!("Refusing to register non-poolable prefab {:?}", kind);
            return Err(PoolError::NotPoolable(kind));
        }
        if self.entries.contains_key(&kind) {
            return Ok(());
        }

        let prewarm = self.cap.map_or(prewarm, |cap| prewarm.min(cap));
        let mut entry = PoolEntry::default();
        for _ in 0..prewarm {
            let id = host.instantiate(kind);
            host.deactivate(id);
            entry.free.push(id);
            entry.total += 1;
            self.slots.insert(id, (kind, SlotState::Free));
        }

        debug!("Registered pool for {:?} with {} instances", kind, prewarm);
        self.entries.insert(kind, entry);
        Ok(())
    }

    pub fn is_registered(&self, kind: PrefabKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Hands out a recycled instance, or a new one when the free list is empty.
    /// Never blocks; without a cap it always grows.
    pub fn acquire<H: PoolHost>(
        &mut self,
        host: &mut H,
        kind: PrefabKind,
        transform: Transform,
    ) -> Result<InstanceId, PoolError> {
        let cap = self.cap;
        let Some(entry) = self.entries.get_mut(&kind) else {
            error!("Acquire for unregistered prefab {:?}", kind);
            return Err(PoolError::Unregistered(kind));
        };

        let id = match entry.free.pop() {
            Some(id) => id,
            None => {
                if let Some(cap) = cap {
                    if entry.total >= cap {
                        return Err(PoolError::CapReached { kind, cap });
                    }
                }
                entry.total += 1;
                host.instantiate(kind)
            }
        };

        host.activate(id, transform);
        self.slots
            .insert(id, (kind, SlotState::Active { spawned: false }));
        Ok(id)
    }

    /// Records that observers can now see the instance.
    pub fn mark_spawned(&mut self, id: InstanceId) -> Result<(), PoolError> {
        self.set_spawned(id, true)
    }

    /// Records that the instance has been removed from every observer's view.
    pub fn mark_despawned(&mut self, id: InstanceId) -> Result<(), PoolError> {
        self.set_spawned(id, false)
    }

    fn set_spawned(&mut self, id: InstanceId, value: bool) -> Result<(), PoolError> {
        match self.slots.get_mut(&id) {
            Some((_, SlotState::Active { spawned })) => {
                *spawned = value;
                Ok(())
            }
            Some((_, SlotState::Free)) => Err(PoolError::NotActive(id)),
            None => Err(PoolError::UnknownInstance(id)),
        }
    }

    /// Returns a despawned instance to its free list.
    pub fn release<H: PoolHost>(&mut self, host: &mut H, id: InstanceId) -> Result<(), PoolError> {
        let (kind, state) = *self
            .slots
            .get(&id)
            .ok_or(PoolError::UnknownInstance(id))?;

        match state {
            SlotState::Free => return Err(PoolError::NotActive(id)),
            SlotState::Active { spawned: true } => return Err(PoolError::StillSpawned(id)),
            SlotState::Active { spawned: false } => {}
        }

        host.deactivate(id);
        self.slots.insert(id, (kind, SlotState::Free));
        if let Some(entry) = self.entries.get_mut(&kind) {
            entry.free.push(id);
        }
        Ok(())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn kind_of(&self, id: InstanceId) -> Option<PrefabKind> {
        self.slots.get(&id).map(|(kind, _)| *kind)
    }

    pub fn is_free(&self, id: InstanceId) -> bool {
        matches!(self.slots.get(&id), Some((_, SlotState::Free)))
    }

    pub fn is_active(&self, id: InstanceId) -> bool {
        matches!(self.slots.get(&id), Some((_, SlotState::Active { .. })))
    }

    pub fn is_spawned(&self, id: InstanceId) -> bool {
        matches!(
            self.slots.get(&id),
            Some((_, SlotState::Active { spawned: true }))
        )
    }

    pub fn free_count(&self, kind: PrefabKind) -> usize {
        self.entries.get(&kind).map_or(0, |entry| entry.free.len())
    }

    pub fn total_count(&self, kind: PrefabKind) -> usize {
        self.entries.get(&kind).map_or(0, |entry| entry.total)
    }

    pub fn active_count(&self, kind: PrefabKind) -> usize {
        self.total_count(kind) - self.free_count(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    /// Arena that records every call the pool makes.
    #[derive(Default)]
    struct TestHost {
        instances: Vec<(PrefabKind, bool, Transform)>,
    }

    impl PoolHost for TestHost {
        fn instantiate(&mut self, kind: PrefabKind) -> InstanceId {
            self.instances.push((kind, false, Transform::default()));
            InstanceId(self.instances.len() as u32 - 1)
        }

        fn activate(&mut self, id: InstanceId, transform: Transform) {
            let instance = &mut self.instances[id.index()];
            instance.1 = true;
            instance.2 = transform;
        }

        fn deactivate(&mut self, id: InstanceId) {
            self.instances[id.index()].1 = false;
        }
    }

    fn at(x: f32, y: f32) -> Transform {
        Transform::new(Vec2::new(x, y), 0.0)
    }

    #[test]
    fn test_register_prewarms_inactive_instances() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::Bullet, 4).unwrap();

        assert_eq!(host.instances.len(), 4);
        assert!(host.instances.iter().all(|(_, active, _)| !active));
        assert_eq!(pool.free_count(PrefabKind::Bullet), 4);
        assert_eq!(pool.active_count(PrefabKind::Bullet), 0);
        assert!(pool.is_registered(PrefabKind::Bullet));
        assert!(!pool.is_registered(PrefabKind::WorldObject));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::Bullet, 2).unwrap();
        pool.register(&mut host, PrefabKind::Bullet, 10).unwrap();
        assert_eq!(host.instances.len(), 2);
        assert_eq!(pool.total_count(PrefabKind::Bullet), 2);
    }

    #[test]
    fn test_ships_cannot_be_registered() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        assert_eq!(
            pool.register(&mut host, PrefabKind::Ship, 1),
            Err(PoolError::NotPoolable(PrefabKind::Ship))
        );
    }

    #[test]
    fn test_acquire_unregistered_kind_is_refused() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        assert_eq!(
            pool.acquire(&mut host, PrefabKind::WorldObject, at(0.0, 0.0)),
            Err(PoolError::Unregistered(PrefabKind::WorldObject))
        );
        assert!(host.instances.is_empty());
    }

    #[test]
    fn test_acquire_grows_by_one_and_release_frees_it() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::Bullet, 0).unwrap();

        let id = pool
            .acquire(&mut host, PrefabKind::Bullet, at(5.0, 6.0))
            .unwrap();
        assert_eq!(pool.total_count(PrefabKind::Bullet), 1);
        assert_eq!(pool.kind_of(id), Some(PrefabKind::Bullet));
        assert_eq!(host.instances[id.index()].2.position, Vec2::new(5.0, 6.0));
        assert!(host.instances[id.index()].1);

        pool.release(&mut host, id).unwrap();
        assert_eq!(pool.free_count(PrefabKind::Bullet), 1);
        assert_eq!(pool.total_count(PrefabKind::Bullet), 1);
        assert!(!host.instances[id.index()].1);
    }

    #[test]
    fn test_recycled_instance_is_reset() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::Bullet, 1).unwrap();

        let first = pool
            .acquire(&mut host, PrefabKind::Bullet, at(1.0, 1.0))
            .unwrap();
        pool.release(&mut host, first).unwrap();
        let second = pool
            .acquire(&mut host, PrefabKind::Bullet, at(9.0, 9.0))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(host.instances.len(), 1);
        assert_eq!(host.instances[second.index()].2.position, Vec2::new(9.0, 9.0));
    }

    #[test]
    fn test_release_while_spawned_is_a_protocol_violation() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::Bullet, 1).unwrap();

        let id = pool
            .acquire(&mut host, PrefabKind::Bullet, at(0.0, 0.0))
            .unwrap();
        pool.mark_spawned(id).unwrap();
        assert_eq!(pool.release(&mut host, id), Err(PoolError::StillSpawned(id)));
        assert!(pool.is_active(id));

        pool.mark_despawned(id).unwrap();
        pool.release(&mut host, id).unwrap();
        assert_eq!(pool.release(&mut host, id), Err(PoolError::NotActive(id)));
    }

    #[test]
    fn test_cap_refuses_growth() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::with_cap(Some(1));
        pool.register(&mut host, PrefabKind::Bullet, 5).unwrap();
        assert_eq!(pool.total_count(PrefabKind::Bullet), 1);

        pool.acquire(&mut host, PrefabKind::Bullet, at(0.0, 0.0))
            .unwrap();
        assert_eq!(
            pool.acquire(&mut host, PrefabKind::Bullet, at(0.0, 0.0)),
            Err(PoolError::CapReached {
                kind: PrefabKind::Bullet,
                cap: 1
            })
        );
    }

    #[test]
    fn test_conservation_over_mixed_sequence() {
        let mut host = TestHost::default();
        let mut pool = ObjectPool::new();
        pool.register(&mut host, PrefabKind::WorldObject, 3).unwrap();

        let mut active = Vec::new();
        let mut previous_total = pool.total_count(PrefabKind::WorldObject);
        for step in 0..40u32 {
            if step % 3 == 2 && !active.is_empty() {
                let id = active.remove(0);
                pool.release(&mut host, id).unwrap();
            } else {
                active.push(
                    pool.acquire(&mut host, PrefabKind::WorldObject, at(step as f32, 0.0))
                        .unwrap(),
                );
            }

            let total = pool.total_count(PrefabKind::WorldObject);
            assert!(total >= previous_total);
            previous_total = total;
            assert_eq!(
                pool.free_count(PrefabKind::WorldObject) + active.len(),
                total
            );
            for id in &active {
                assert!(pool.is_active(*id) && !pool.is_free(*id));
            }
        }
    }
}

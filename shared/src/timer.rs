//! Fire-once deferred expiries keyed by entity and purpose.
//!
//! Replaces suspended routines: a scheduled key is checked once per tick and
//! handed back when its deadline passes. Handlers must treat a fired key as a
//! hint, since the state it refers to may already have been reset.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct TimerWheel<K> {
    now: f64,
    deadlines: HashMap<K, f64>,
}

impl<K: Eq + Hash + Clone> Default for TimerWheel<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> TimerWheel<K> {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            deadlines: HashMap::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Schedules `key` to fire after `delay` seconds, replacing any earlier schedule.
    pub fn schedule(&mut self, key: K, delay: f32) {
        self.deadlines.insert(key, self.now + delay.max(0.0) as f64);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Seconds left until `key` fires.
    pub fn remaining(&self, key: &K) -> Option<f32> {
        self.deadlines
            .get(key)
            .map(|deadline| (deadline - self.now).max(0.0) as f32)
    }

    /// Advances the clock and returns every expired key, earliest deadline first.
    pub fn advance(&mut self, dt: f32) -> Vec<K> {
        self.now += dt.max(0.0) as f64;
        let now = self.now;

        let mut expired: Vec<(K, f64)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (key.clone(), *deadline))
            .collect();
        expired.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (key, _) in &expired {
            self.deadlines.remove(key);
        }
        expired.into_iter().map(|(key, _)| key).collect()
    }

    /// Drops every timer whose key matches `predicate`, e.g. when an entity despawns.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.deadlines.retain(|key, _| !predicate(key));
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

//! Active region cache.
//!
//! Cells a user has recently been near are "active": the scheduler only runs
//! creature AI for them. Each entry holds a snapshot of the cell's creatures and
//! the per-creature timers AI needs. An entry nobody touches for longer than the
//! TTL is swept; creatures that died while it was active are deleted from the
//! store at that point.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use log::debug;
use uuid::Uuid;

use crate::world::storage::WorldStore;
use crate::world::types::{unix_now, CellRecord, CreatureRecord, Point};

/// Seconds an untouched cell stays active.
pub const DEFAULT_ACTIVE_TTL_SECS: i64 = 10;

#[derive(Debug, Clone)]
pub struct ActiveCellEntry {
    pub point: Point,
    pub last_visit: i64,
    pub cell: Option<CellRecord>,
    pub creatures: Vec<CreatureRecord>,
    /// Unix seconds of each creature's last attack (or first sighting).
    pub last_action: HashMap<Uuid, i64>,
    /// Charge each creature waits for before considering an attack.
    pub desired_charge: HashMap<Uuid, u64>,
}

impl ActiveCellEntry {
    fn load(store: &WorldStore, point: Point, now: i64) -> Self {
        Self {
            point,
            last_visit: now,
            cell: store.get_cell(point),
            creatures: store.list_creatures(point),
            last_action: HashMap::new(),
            desired_charge: HashMap::new(),
        }
    }

    fn touch(&mut self, now: i64) {
        self.last_visit = self.last_visit.max(now);
    }

    fn is_expired(&self, now: i64, ttl: i64) -> bool {
        now - self.last_visit > ttl
    }
}

pub struct ActiveRegionCache {
    store: Arc<WorldStore>,
    entries: DashMap<Point, ActiveCellEntry>,
    ttl_secs: i64,
}

impl ActiveRegionCache {
    pub fn new(store: Arc<WorldStore>) -> Self {
        Self::with_ttl(store, DEFAULT_ACTIVE_TTL_SECS)
    }

    pub fn with_ttl(store: Arc<WorldStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            ttl_secs,
        }
    }

    pub fn activate(&self, pt: Point) -> bool {
        self.activate_at(pt, unix_now())
    }

    /// Mark `pt` as visited at `now`, loading it from the store if it was not
    /// already active. Returns true when a new entry was created.
    pub fn activate_at(&self, pt: Point, now: i64) -> bool {
        let mut created = false;
        self.entries
            .entry(pt)
            .and_modify(|entry| entry.touch(now))
            .or_insert_with(|| {
                created = true;
                debug!("activating cell {}", pt);
                ActiveCellEntry::load(&self.store, pt, now)
            });
        created
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(unix_now())
    }

    /// Drop every entry older than the TTL and delete its dead creatures.
    /// Returns the number of entries removed.
    pub fn sweep_expired_at(&self, now: i64) -> usize {
        let ttl = self.ttl_secs;
        let expired: Vec<Point> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now, ttl))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for pt in expired {
            // A visit between the scan and here keeps the entry.
            let Some((_, entry)) = self
                .entries
                .remove_if(&pt, |_, entry| entry.is_expired(now, ttl))
            else {
                continue;
            };
            removed += 1;
            for creature in &entry.creatures {
                let dead = creature.is_dead()
                    || self
                        .store
                        .get_creature(creature.id)
                        .map(|stored| stored.is_dead())
                        .unwrap_or(false);
                if dead && self.store.delete_creature(creature.id) {
                    debug!("reaped {} at {}", creature.id, pt);
                }
            }
        }
        removed
    }

    /// Reload the creature snapshot for `pt`, if it is active.
    pub fn refresh_snapshot(&self, pt: Point) {
        if let Some(mut entry) = self.entries.get_mut(&pt) {
            entry.creatures = self.store.list_creatures(pt);
            let alive: Vec<Uuid> = entry.creatures.iter().map(|c| c.id).collect();
            entry.last_action.retain(|id, _| alive.contains(id));
            entry.desired_charge.retain(|id, _| alive.contains(id));
        }
    }

    pub fn is_active(&self, pt: Point) -> bool {
        self.entries.contains_key(&pt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_points(&self) -> Vec<Point> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Cloned snapshot of an active entry.
    pub fn snapshot(&self, pt: Point) -> Option<ActiveCellEntry> {
        self.entries.get(&pt).map(|entry| entry.value().clone())
    }

    /// Exclusive access to one entry. Holding it blocks other access to the same shard.
    pub(crate) fn entry_mut(&self, pt: Point) -> Option<RefMut<'_, Point, ActiveCellEntry>> {
        self.entries.get_mut(&pt)
    }
}

//! Entry points for the session layer.
//!
//! A session never touches the scheduler. It reads and writes through the store
//! and keeps the cells around its user active.

use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::world::active::ActiveRegionCache;
use crate::world::catalog::Catalog;
use crate::world::combat::{CombatOutcome, CombatResolver, Combatant, ResolvedAttack};
use crate::world::errors::WorldError;
use crate::world::storage::WorldStore;
use crate::world::types::{unix_nanos_now, unix_now, CellRecord, Direction, Point, UserRecord};

/// Why a user action was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRefused {
    Dead,
    Blocked(Direction),
    EdgeOfWorld,
    UnknownAttack(String),
    NoSuchCreature,
    NotCharged { charge: u64, needed: u64 },
}

impl std::fmt::Display for ActionRefused {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionRefused::Dead => write!(f, "you are dead"),
            ActionRefused::Blocked(dir) => write!(f, "the way {:?} is blocked", dir),
            ActionRefused::EdgeOfWorld => write!(f, "you cannot go further"),
            ActionRefused::UnknownAttack(name) => write!(f, "you don't know {}", name),
            ActionRefused::NoSuchCreature => write!(f, "there is nothing like that here"),
            ActionRefused::NotCharged { charge, needed } => {
                write!(f, "not ready yet ({}/{})", charge, needed)
            }
        }
    }
}

pub struct World {
    store: Arc<WorldStore>,
    cache: Arc<ActiveRegionCache>,
    resolver: Arc<CombatResolver>,
}

impl World {
    pub fn new(
        store: Arc<WorldStore>,
        cache: Arc<ActiveRegionCache>,
        resolver: Arc<CombatResolver>,
    ) -> Self {
        Self {
            store,
            cache,
            resolver,
        }
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.store.catalog()
    }

    pub fn cache(&self) -> &Arc<ActiveRegionCache> {
        &self.cache
    }

    /// Mark `username` online and wake the cell they stand in.
    pub fn enter(&self, username: &str) -> UserRecord {
        let now = unix_now();
        let user = self.store.get_user(username);
        self.store.heartbeat_at(username, now);
        self.cache.activate_at(user.position(), now);
        user
    }

    /// Step one cell in `direction`, honouring the exit blocks of the current cell.
    pub fn move_user(
        &self,
        username: &str,
        direction: Direction,
    ) -> Result<UserRecord, ActionRefused> {
        let now = unix_now();
        let mut user = self.store.get_user(username);
        if user.is_dead() {
            return Err(ActionRefused::Dead);
        }
        let here = user.position();
        if let Some(cell) = self.store.get_cell(here) {
            if cell.exit_blocks.is_blocked(direction) {
                return Err(ActionRefused::Blocked(direction));
            }
        }
        let next = here.step(direction).ok_or(ActionRefused::EdgeOfWorld)?;
        user.x = next.x;
        user.y = next.y;
        self.store.put_user(&user);
        self.store.heartbeat_at(username, now);
        self.cache.activate_at(next, now);
        debug!("{} moved {:?} to {}", username, direction, next);
        Ok(user)
    }

    /// Attack a creature in the user's cell with one of the user's attacks.
    pub fn user_attack(
        &self,
        username: &str,
        creature_id: Uuid,
        attack_name: &str,
    ) -> Result<CombatOutcome, ActionRefused> {
        let now = unix_now();
        let user = self.store.get_user(username);
        if user.is_dead() {
            return Err(ActionRefused::Dead);
        }
        if !user.attacks.iter().any(|a| a == attack_name) {
            return Err(ActionRefused::UnknownAttack(attack_name.to_string()));
        }
        let def = self
            .catalog()
            .attack(attack_name)
            .ok_or_else(|| ActionRefused::UnknownAttack(attack_name.to_string()))?;

        let here = user.position();
        let creature = self
            .store
            .get_creature(creature_id)
            .filter(|c| c.position == here)
            .ok_or(ActionRefused::NoSuchCreature)?;

        let charge = self.store.user_charge_at(&user, unix_nanos_now());
        let mut source = Combatant::User(user);
        let attack = ResolvedAttack::from_def(def, &source.stat_block());
        if charge < attack.charge {
            return Err(ActionRefused::NotCharged {
                charge,
                needed: attack.charge,
            });
        }

        self.store.touch_user_action(username);
        self.store.heartbeat_at(username, now);
        self.cache.activate_at(here, now);

        let mut target = Combatant::Creature(creature);
        let outcome = self.resolver.resolve_at(&mut source, &mut target, &attack, now);
        self.cache.refresh_snapshot(here);
        Ok(outcome)
    }

    /// Seed a cell if it has never been written.
    pub fn ensure_cell(&self, pt: Point, terrain_id: u16) -> Result<(), WorldError> {
        if self.store.get_cell(pt).is_some() {
            return Ok(());
        }
        if self.catalog().terrain_type(terrain_id).is_none() {
            return Err(WorldError::UnknownCatalogEntry {
                kind: "terrain",
                id: terrain_id.to_string(),
            });
        }
        let (region_id, _) = self
            .store
            .new_region_id()
            .ok_or_else(|| WorldError::NotFound(format!("region id for {}", pt)))?;
        self.store.set_cell(pt, &CellRecord::new(terrain_id, region_id));
        Ok(())
    }
}

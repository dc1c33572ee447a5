use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};
use sled::transaction::{ConflictableTransactionError, TransactionResult, TransactionalTree};
use sled::{IVec, Transactional};
use uuid::Uuid;

use crate::world::catalog::Catalog;
use crate::world::errors::WorldError;
use crate::world::generator::{PlaceNameGenerator, PopulateOnFirstWrite, SyllableNames, TerrainGenerator};
use crate::world::types::{
    charge_since, unix_nanos_now, CellRecord, CreatureList, CreatureRecord, InventoryItem,
    InventoryOwner, LogItem, Point, UserRecord, USER_SCHEMA_VERSION,
};

const TREE_USERS: &str = "users";
const TREE_CREATURES: &str = "creatures";
const TREE_CREATURE_LIST: &str = "creaturelist";
const TREE_TERRAIN: &str = "terrain";
const TREE_PLACE_NAMES: &str = "placenames";
const TREE_PLACE_ITEMS: &str = "placeitems";
const TREE_USER_INVENTORY: &str = "userinventory";
const TREE_ONLINE_USERS: &str = "onlineusers";
const TREE_LAST_USER_ACTION: &str = "lastuseraction";
const TREE_USER_LOG: &str = "userlog";
const TREE_META: &str = "meta";

const REGION_COUNTER_KEY: &[u8] = b"region_counter";

/// Separates an owner key from the record suffix in composite keys.
const KEY_SEPARATOR: u8 = 0x00;

pub const DEFAULT_PRESENCE_TIMEOUT_SECS: i64 = 15;
pub const DEFAULT_USER_LOG_LIMIT: usize = 80;

/// Helper builder so tests can easily create throwaway stores with custom collaborators.
pub struct WorldStoreBuilder {
    path: PathBuf,
    catalog: Option<Arc<Catalog>>,
    generator: Option<Box<dyn TerrainGenerator>>,
    names: Option<Box<dyn PlaceNameGenerator>>,
    presence_timeout_secs: i64,
    user_log_limit: usize,
}

impl WorldStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            catalog: None,
            generator: None,
            names: None,
            presence_timeout_secs: DEFAULT_PRESENCE_TIMEOUT_SECS,
            user_log_limit: DEFAULT_USER_LOG_LIMIT,
        }
    }

    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn terrain_generator(mut self, generator: impl TerrainGenerator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn place_names(mut self, names: impl PlaceNameGenerator + 'static) -> Self {
        self.names = Some(Box::new(names));
        self
    }

    pub fn presence_timeout_secs(mut self, secs: i64) -> Self {
        self.presence_timeout_secs = secs;
        self
    }

    pub fn user_log_limit(mut self, limit: usize) -> Self {
        self.user_log_limit = limit;
        self
    }

    pub fn open(self) -> Result<WorldStore, WorldError> {
        let path_ref = self.path.as_path();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        Ok(WorldStore {
            users: db.open_tree(TREE_USERS)?,
            creatures: db.open_tree(TREE_CREATURES)?,
            creature_lists: db.open_tree(TREE_CREATURE_LIST)?,
            terrain: db.open_tree(TREE_TERRAIN)?,
            place_names: db.open_tree(TREE_PLACE_NAMES)?,
            place_items: db.open_tree(TREE_PLACE_ITEMS)?,
            user_inventory: db.open_tree(TREE_USER_INVENTORY)?,
            online_users: db.open_tree(TREE_ONLINE_USERS)?,
            last_user_action: db.open_tree(TREE_LAST_USER_ACTION)?,
            user_log: db.open_tree(TREE_USER_LOG)?,
            meta: db.open_tree(TREE_META)?,
            db,
            catalog: self.catalog.unwrap_or_else(|| Arc::new(Catalog::builtin())),
            generator: self.generator.unwrap_or_else(|| Box::new(PopulateOnFirstWrite)),
            names: self.names.unwrap_or_else(|| Box::new(SyllableNames)),
            presence_timeout_secs: self.presence_timeout_secs,
            user_log_limit: self.user_log_limit,
        })
    }
}

/// Sled-backed persistence for terrain, creatures, users and their inventories.
///
/// Every public operation is a single atomic unit against the store. Failures are
/// logged and degrade to a no-op or an empty value; callers never see a half-applied
/// multi-record mutation.
pub struct WorldStore {
    db: sled::Db,
    users: sled::Tree,
    creatures: sled::Tree,
    creature_lists: sled::Tree,
    terrain: sled::Tree,
    place_names: sled::Tree,
    place_items: sled::Tree,
    user_inventory: sled::Tree,
    pub(crate) online_users: sled::Tree,
    last_user_action: sled::Tree,
    user_log: sled::Tree,
    meta: sled::Tree,
    catalog: Arc<Catalog>,
    generator: Box<dyn TerrainGenerator>,
    names: Box<dyn PlaceNameGenerator>,
    pub(crate) presence_timeout_secs: i64,
    user_log_limit: usize,
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, WorldError> {
    Ok(bincode::serialize(value)?)
}

fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, WorldError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

fn abort<E: Into<WorldError>>(err: E) -> ConflictableTransactionError<WorldError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Log a failed store operation and collapse it to `None`.
pub(crate) fn logged<T>(op: &str, result: Result<T, WorldError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("world store {} failed: {}", op, e);
            None
        }
    }
}

fn composite_key(owner: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1 + suffix.len());
    key.extend_from_slice(owner);
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(suffix);
    key
}

/// `[owner, 0x00] .. [owner, 0x01]`
fn owner_range(owner: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut start = owner.to_vec();
    start.push(KEY_SEPARATOR);
    let mut end = owner.to_vec();
    end.push(KEY_SEPARATOR + 1);
    (start, end)
}

fn decode_i64(bytes: &[u8]) -> Result<i64, WorldError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| WorldError::Corrupt {
        entity: "timestamp",
        expected: 8,
        found: bytes.len(),
    })?;
    Ok(i64::from_be_bytes(arr))
}

fn increment_counter(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let current = old
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0);
    Some((current + 1).to_be_bytes().to_vec())
}

impl WorldStore {
    /// Open (or create) a store at `path` with the built-in catalog and default collaborators.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        WorldStoreBuilder::new(path.as_ref()).open()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn flush(&self) -> Result<usize, WorldError> {
        Ok(self.db.flush()?)
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    pub fn get_cell(&self, pt: Point) -> Option<CellRecord> {
        let bytes = logged("get_cell", self.terrain.get(pt.to_bytes()).map_err(WorldError::from))??;
        let mut cell = logged("decode cell", CellRecord::from_bytes(&bytes))?;
        cell.region_name = self.region_name(cell.region_name_id).unwrap_or_default();
        Some(cell)
    }

    /// Write a cell. If this replaces an empty cell and the terrain generator agrees,
    /// the terrain's spawn and item tables are rolled into it.
    pub fn set_cell(&self, pt: Point, cell: &CellRecord) {
        let previous = match self.terrain.insert(pt.to_bytes(), &cell.to_bytes()[..]) {
            Ok(prev) => prev,
            Err(e) => {
                error!("world store set_cell {} failed: {}", pt, e);
                return;
            }
        };
        let old = previous.and_then(|bytes| logged("decode cell", CellRecord::from_bytes(&bytes)));
        if self.generator.populate(old.as_ref(), cell) {
            self.populate_cell(pt, cell);
        }
    }

    fn populate_cell(&self, pt: Point, cell: &CellRecord) {
        let Some(terrain) = self.catalog.terrain_type(cell.terrain_id) else {
            debug!("no terrain type {} for populating {}", cell.terrain_id, pt);
            return;
        };
        let mut rng = rand::thread_rng();
        for spawn in &terrain.spawns {
            for _ in 0..spawn.roll(&mut rng) {
                self.spawn_creature(pt, &spawn.id);
            }
        }
        for entry in &terrain.items {
            let Some(item_type) = self.catalog.item_type(&entry.id) else {
                warn!("terrain {} rolls unknown item {}", terrain.id, entry.id);
                continue;
            };
            for _ in 0..entry.roll(&mut rng) {
                self.add_inventory_item(&InventoryOwner::Cell(pt), &item_type.instantiate());
            }
        }
    }

    // ------------------------------------------------------------------
    // Creatures
    // ------------------------------------------------------------------

    fn hydrate(&self, creature: &mut CreatureRecord) {
        match self.catalog.creature_type(&creature.creature_type_id) {
            Some(kind) => {
                creature.max_charge = self.catalog.creature_max_charge(kind);
                creature.display_name = kind.name.clone();
            }
            None => {
                warn!(
                    "creature {} has unknown type {}",
                    creature.id, creature.creature_type_id
                );
                creature.max_charge = 1;
                creature.display_name = creature.creature_type_id.clone();
            }
        }
    }

    pub fn get_creature(&self, id: Uuid) -> Option<CreatureRecord> {
        let bytes = logged(
            "get_creature",
            self.creatures.get(id.as_bytes()).map_err(WorldError::from),
        )??;
        let mut creature: CreatureRecord = logged("decode creature", deserialize(&bytes))?;
        self.hydrate(&mut creature);
        Some(creature)
    }

    /// Overwrite an existing creature. A record that was deleted meanwhile stays
    /// deleted and false is returned.
    pub fn put_creature(&self, creature: &CreatureRecord) -> bool {
        let result = serialize(creature).and_then(|bytes| {
            let written = self
                .creatures
                .update_and_fetch(creature.id.as_bytes(), |old| old.map(|_| bytes.clone()))?;
            Ok(written.is_some())
        });
        match logged("put_creature", result) {
            Some(true) => true,
            Some(false) => {
                debug!("creature {} is gone; not rewritten", creature.id);
                false
            }
            None => false,
        }
    }

    /// Create a creature of `type_id` at full stats and append it to the cell's list.
    pub fn spawn_creature(&self, pt: Point, type_id: &str) -> Option<CreatureRecord> {
        let Some(kind) = self.catalog.creature_type(type_id) else {
            warn!("cannot spawn unknown creature type {}", type_id);
            return None;
        };
        let mut creature = CreatureRecord {
            id: Uuid::new_v4(),
            creature_type_id: kind.id.clone(),
            position: pt,
            hp: kind.max_hp,
            ap: kind.max_ap,
            rp: kind.max_rp,
            mp: kind.max_mp,
            ..CreatureRecord::default()
        };
        let value = logged("encode creature", serialize(&creature))?;
        let list_key = pt.to_bytes();
        let id = creature.id;

        let result: TransactionResult<(), WorldError> = (&self.creatures, &self.creature_lists)
            .transaction(|(creatures, lists)| {
                creatures.insert(&id.as_bytes()[..], value.as_slice())?;
                let mut list = match lists.get(list_key)? {
                    Some(bytes) => deserialize::<CreatureList>(&bytes).map_err(abort)?,
                    None => CreatureList::default(),
                };
                list.creature_ids.push(id);
                lists.insert(&list_key[..], serialize(&list).map_err(abort)?)?;
                Ok(())
            });
        logged("spawn_creature", result.map_err(WorldError::from))?;

        debug!("spawned {} ({}) at {}", kind.id, id, pt);
        self.hydrate(&mut creature);
        Some(creature)
    }

    /// Remove a creature and filter its cell's list down to creatures that still
    /// exist, in one transaction. Deleting an absent creature is a no-op.
    pub fn delete_creature(&self, id: Uuid) -> bool {
        let result: TransactionResult<bool, WorldError> = (&self.creatures, &self.creature_lists)
            .transaction(|(creatures, lists)| {
                let Some(bytes) = creatures.remove(&id.as_bytes()[..])? else {
                    return Ok(false);
                };
                let creature: CreatureRecord = deserialize(&bytes).map_err(abort)?;
                prune_creature_list(creatures, lists, creature.position, id)?;
                Ok(true)
            });
        logged("delete_creature", result.map_err(WorldError::from)).unwrap_or(false)
    }

    /// Creatures in a cell with catalog data attached and duplicate names numbered.
    pub fn list_creatures(&self, pt: Point) -> Vec<CreatureRecord> {
        let Some(list) = self.creature_list(pt) else {
            return Vec::new();
        };
        let mut creatures: Vec<CreatureRecord> = list
            .creature_ids
            .iter()
            .filter_map(|id| self.get_creature(*id))
            .collect();

        let mut totals: HashMap<String, usize> = HashMap::new();
        for creature in &creatures {
            *totals.entry(creature.display_name.clone()).or_default() += 1;
        }
        let mut seen: HashMap<String, usize> = HashMap::new();
        for creature in creatures.iter_mut() {
            if totals.get(&creature.display_name).copied().unwrap_or(0) > 1 {
                let index = seen.entry(creature.display_name.clone()).or_default();
                *index += 1;
                creature.display_name = format!("{} {}", creature.display_name, index);
            }
        }
        creatures
    }

    fn creature_list(&self, pt: Point) -> Option<CreatureList> {
        let bytes = logged(
            "get creature list",
            self.creature_lists.get(pt.to_bytes()).map_err(WorldError::from),
        )??;
        logged("decode creature list", deserialize(&bytes))
    }

    pub fn creature_count(&self) -> usize {
        self.creatures.len()
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Fetch a user, synthesizing a fresh record for unknown names.
    pub fn get_user(&self, username: &str) -> UserRecord {
        let stored = logged(
            "get_user",
            self.users.get(username.as_bytes()).map_err(WorldError::from),
        )
        .flatten();
        let Some(bytes) = stored else {
            return UserRecord::new(username);
        };
        match deserialize::<UserRecord>(&bytes) {
            Ok(user) if user.schema_version == USER_SCHEMA_VERSION => user,
            Ok(user) => {
                warn!(
                    "user {} has schema version {} (expected {}); using defaults",
                    username, user.schema_version, USER_SCHEMA_VERSION
                );
                UserRecord::new(username)
            }
            Err(e) => {
                error!("world store decode user {} failed: {}", username, e);
                UserRecord::new(username)
            }
        }
    }

    pub fn put_user(&self, user: &UserRecord) -> bool {
        let mut user = user.clone();
        user.schema_version = USER_SCHEMA_VERSION;
        let result = serialize(&user).and_then(|bytes| {
            self.users.insert(user.username.as_bytes(), bytes)?;
            Ok(())
        });
        logged("put_user", result).is_some()
    }

    pub fn list_usernames(&self) -> Vec<String> {
        self.users
            .iter()
            .keys()
            .filter_map(|key| logged("scan users", key.map_err(WorldError::from)))
            .filter_map(|key| logged("decode username", String::from_utf8(key.to_vec()).map_err(WorldError::from)))
            .collect()
    }

    /// Record that the user just acted, resetting their charge.
    pub fn touch_user_action(&self, username: &str) {
        self.touch_user_action_at(username, unix_nanos_now());
    }

    pub fn touch_user_action_at(&self, username: &str, now_nanos: i64) {
        let result = self
            .last_user_action
            .insert(username.as_bytes(), &now_nanos.to_be_bytes()[..])
            .map_err(WorldError::from);
        logged("touch_user_action", result);
    }

    pub fn last_user_action(&self, username: &str) -> Option<i64> {
        let bytes = logged(
            "get last user action",
            self.last_user_action.get(username.as_bytes()).map_err(WorldError::from),
        )??;
        logged("decode last user action", decode_i64(&bytes))
    }

    /// A user who never acted is fully charged.
    pub fn user_charge_at(&self, user: &UserRecord, now_nanos: i64) -> u64 {
        let max = self.catalog.user_max_charge(user);
        match self.last_user_action(&user.username) {
            Some(last) => charge_since(last / 1_000_000_000, now_nanos / 1_000_000_000, max),
            None => max,
        }
    }

    pub fn user_charge(&self, user: &UserRecord) -> u64 {
        self.user_charge_at(user, unix_nanos_now())
    }

    // ------------------------------------------------------------------
    // User log
    // ------------------------------------------------------------------

    fn user_log_key(username: &str, nanos: i64) -> Vec<u8> {
        let inverted = u64::MAX - nanos.max(0) as u64;
        composite_key(username.as_bytes(), &inverted.to_be_bytes())
    }

    /// Append a log line and drop anything older than the most recent entries.
    pub fn append_user_log(&self, username: &str, item: &LogItem) {
        let nanos = item
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| item.timestamp.timestamp_micros() * 1000);
        let key = Self::user_log_key(username, nanos);
        let result = serialize(item).and_then(|bytes| {
            self.user_log.insert(key, bytes)?;
            Ok(())
        });
        if logged("append_user_log", result).is_none() {
            return;
        }
        let (start, end) = owner_range(username.as_bytes());
        let stale: Vec<IVec> = self
            .user_log
            .range(start..end)
            .keys()
            .skip(self.user_log_limit)
            .filter_map(|key| key.ok())
            .collect();
        for key in stale {
            logged("trim user log", self.user_log.remove(key).map_err(WorldError::from));
        }
    }

    /// Most recent log lines, newest first.
    pub fn user_log(&self, username: &str) -> Vec<LogItem> {
        let (start, end) = owner_range(username.as_bytes());
        self.user_log
            .range(start..end)
            .values()
            .take(self.user_log_limit)
            .filter_map(|value| logged("scan user log", value.map_err(WorldError::from)))
            .filter_map(|bytes| logged("decode log item", deserialize(&bytes)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Inventories
    // ------------------------------------------------------------------

    fn inventory_tree(&self, owner: &InventoryOwner) -> &sled::Tree {
        match owner {
            InventoryOwner::User(_) => &self.user_inventory,
            InventoryOwner::Cell(_) => &self.place_items,
        }
    }

    pub fn add_inventory_item(&self, owner: &InventoryOwner, item: &InventoryItem) -> bool {
        let key = composite_key(&owner.key_bytes(), item.id.as_bytes());
        let result = serialize(item).and_then(|bytes| {
            self.inventory_tree(owner).insert(key, bytes)?;
            Ok(())
        });
        logged("add_inventory_item", result).is_some()
    }

    pub fn get_inventory_item(&self, owner: &InventoryOwner, id: Uuid) -> Option<InventoryItem> {
        let key = composite_key(&owner.key_bytes(), id.as_bytes());
        let bytes = logged(
            "get_inventory_item",
            self.inventory_tree(owner).get(key).map_err(WorldError::from),
        )??;
        logged("decode inventory item", deserialize(&bytes))
    }

    /// Remove and return an item in one step.
    pub fn pull_inventory_item(&self, owner: &InventoryOwner, id: Uuid) -> Option<InventoryItem> {
        let key = composite_key(&owner.key_bytes(), id.as_bytes());
        let bytes = logged(
            "pull_inventory_item",
            self.inventory_tree(owner).remove(key).map_err(WorldError::from),
        )??;
        logged("decode inventory item", deserialize(&bytes))
    }

    pub fn list_inventory(&self, owner: &InventoryOwner) -> Vec<InventoryItem> {
        let (start, end) = owner_range(&owner.key_bytes());
        self.inventory_tree(owner)
            .range(start..end)
            .values()
            .filter_map(|value| logged("scan inventory", value.map_err(WorldError::from)))
            .filter_map(|bytes| logged("decode inventory item", deserialize(&bytes)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    /// Allocate the next region id and persist a freshly generated name for it.
    pub fn new_region_id(&self) -> Option<(u64, String)> {
        let counter = logged(
            "increment region counter",
            self.meta
                .update_and_fetch(REGION_COUNTER_KEY, increment_counter)
                .map_err(WorldError::from),
        )??;
        let id = logged(
            "decode region counter",
            <[u8; 8]>::try_from(&counter[..])
                .map(u64::from_be_bytes)
                .map_err(|_| WorldError::Corrupt {
                    entity: "region counter",
                    expected: 8,
                    found: counter.len(),
                }),
        )?;
        let name = self.names.generate();
        logged(
            "store place name",
            self.place_names
                .insert(id.to_be_bytes(), name.as_bytes())
                .map_err(WorldError::from),
        )?;
        Some((id, name))
    }

    pub fn region_name(&self, id: u64) -> Option<String> {
        let bytes = logged(
            "get place name",
            self.place_names.get(id.to_be_bytes()).map_err(WorldError::from),
        )??;
        logged(
            "decode place name",
            String::from_utf8(bytes.to_vec()).map_err(WorldError::from),
        )
    }
}

/// Drop `removed` and any ids whose records are gone from the list at `pt`.
fn prune_creature_list(
    creatures: &TransactionalTree,
    lists: &TransactionalTree,
    pt: Point,
    removed: Uuid,
) -> Result<(), ConflictableTransactionError<WorldError>> {
    let key = pt.to_bytes();
    let Some(bytes) = lists.get(key)? else {
        return Ok(());
    };
    let list: CreatureList = deserialize(&bytes).map_err(abort)?;
    let mut kept = Vec::with_capacity(list.creature_ids.len());
    for id in list.creature_ids {
        if id != removed && creatures.get(id.as_bytes())?.is_some() {
            kept.push(id);
        }
    }
    if kept.is_empty() {
        lists.remove(&key[..])?;
    } else {
        let encoded = serialize(&CreatureList { creature_ids: kept }).map_err(abort)?;
        lists.insert(&key[..], encoded)?;
    }
    Ok(())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::world::errors::WorldError;

pub const USER_SCHEMA_VERSION: u8 = 1;

/// Width and height of the world grid.
pub const WORLD_SIZE: u32 = 1 << 30;

/// Centre of the grid; new users spawn here.
pub const WORLD_CENTER: u32 = WORLD_SIZE / 2;

/// A single grid coordinate. Encoded as 8 big-endian bytes (`x` then `y`) so that
/// keys sort by row-major order and can be extended with suffixes for range scans.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const ENCODED_LEN: usize = 8;

    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.x.to_be_bytes());
        out[4..].copy_from_slice(&self.y.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorldError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(WorldError::Corrupt {
                entity: "point",
                expected: Self::ENCODED_LEN,
                found: bytes.len(),
            });
        }
        let mut x = [0u8; 4];
        let mut y = [0u8; 4];
        x.copy_from_slice(&bytes[..4]);
        y.copy_from_slice(&bytes[4..8]);
        Ok(Self {
            x: u32::from_be_bytes(x),
            y: u32::from_be_bytes(y),
        })
    }

    /// Neighbouring point in `dir`, or `None` at the edge of the grid.
    pub fn step(self, dir: Direction) -> Option<Point> {
        let (x, y) = match dir {
            Direction::North => (Some(self.x), self.y.checked_sub(1)),
            Direction::South => (Some(self.x), self.y.checked_add(1)),
            Direction::East => (self.x.checked_add(1), Some(self.y)),
            Direction::West => (self.x.checked_sub(1), Some(self.y)),
        };
        match (x, y) {
            (Some(x), Some(y)) if x < WORLD_SIZE && y < WORLD_SIZE => Some(Point { x, y }),
            _ => None,
        }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    fn mask(self) -> u8 {
        match self {
            Direction::North => 0b0001,
            Direction::East => 0b0010,
            Direction::South => 0b0100,
            Direction::West => 0b1000,
        }
    }
}

/// Bitmask of blocked exits (N/E/S/W).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitBlocks(pub u8);

impl ExitBlocks {
    pub fn is_blocked(self, dir: Direction) -> bool {
        self.0 & dir.mask() != 0
    }

    pub fn with_blocked(self, dir: Direction) -> Self {
        Self(self.0 | dir.mask())
    }
}

/// Terrain state for one populated cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellRecord {
    pub terrain_id: u16,
    pub region_name_id: u64,
    pub exit_blocks: ExitBlocks,
    /// Resolved from the place-name table on read; never persisted.
    pub region_name: String,
}

impl CellRecord {
    pub const ENCODED_LEN: usize = 11;

    pub fn new(terrain_id: u16, region_name_id: u64) -> Self {
        Self {
            terrain_id,
            region_name_id,
            ..Self::default()
        }
    }

    pub fn to_bytes(&self) -> [u8; 11] {
        let mut out = [0u8; 11];
        out[..2].copy_from_slice(&self.terrain_id.to_be_bytes());
        out[2..10].copy_from_slice(&self.region_name_id.to_be_bytes());
        out[10] = self.exit_blocks.0;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorldError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(WorldError::Corrupt {
                entity: "cell",
                expected: Self::ENCODED_LEN,
                found: bytes.len(),
            });
        }
        let mut terrain = [0u8; 2];
        let mut region = [0u8; 8];
        terrain.copy_from_slice(&bytes[..2]);
        region.copy_from_slice(&bytes[2..10]);
        Ok(Self {
            terrain_id: u16::from_be_bytes(terrain),
            region_name_id: u64::from_be_bytes(region),
            exit_blocks: ExitBlocks(bytes[10]),
            region_name: String::new(),
        })
    }
}

/// The three combat components shared by attacks, users and creatures.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatPoints {
    pub ap: u64,
    pub rp: u64,
    pub mp: u64,
}

impl StatPoints {
    pub fn new(ap: u64, rp: u64, mp: u64) -> Self {
        Self { ap, rp, mp }
    }

    /// Total of all three components.
    pub fn damage(&self) -> u64 {
        self.ap + self.rp + self.mp
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Ap,
    Rp,
    Mp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    /// Gains +2 max on level up.
    pub primary: Stat,
    /// Gains +1 max on level up.
    pub secondary: Stat,
}

impl Default for ClassInfo {
    fn default() -> Self {
        Self {
            name: "Wanderer".to_string(),
            primary: Stat::Ap,
            secondary: Stat::Rp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreatureRecord {
    pub id: Uuid,
    pub creature_type_id: String,
    pub position: Point,
    pub hp: u64,
    pub ap: u64,
    pub rp: u64,
    pub mp: u64,
    #[serde(skip)]
    pub charge: u64,
    #[serde(skip)]
    pub max_charge: u64,
    #[serde(skip)]
    pub display_name: String,
}

impl CreatureRecord {
    pub fn stat_points(&self) -> StatPoints {
        StatPoints::new(self.ap, self.rp, self.mp)
    }

    pub fn is_dead(&self) -> bool {
        self.hp == 0
    }
}

/// Ordered set of creature ids living in one cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatureList {
    pub creature_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub x: u32,
    pub y: u32,
    pub spawn_x: u32,
    pub spawn_y: u32,
    pub hp: u64,
    pub max_hp: u64,
    pub ap: u64,
    pub max_ap: u64,
    pub rp: u64,
    pub max_rp: u64,
    pub mp: u64,
    pub max_mp: u64,
    pub xp: u64,
    pub class_info: ClassInfo,
    pub initialized: bool,
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default)]
    pub equipped: Vec<Uuid>,
    #[serde(default)]
    pub attacks: Vec<String>,
    pub schema_version: u8,
}

impl UserRecord {
    /// Fresh character at the centre of the world. The HP/stat asymmetry is the
    /// established starting balance.
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            x: WORLD_CENTER,
            y: WORLD_CENTER,
            spawn_x: WORLD_CENTER,
            spawn_y: WORLD_CENTER,
            hp: 10,
            max_hp: 10,
            ap: 2,
            max_ap: 2,
            rp: 2,
            max_rp: 2,
            mp: 2,
            max_mp: 2,
            xp: 0,
            class_info: ClassInfo::default(),
            initialized: false,
            public_keys: Vec::new(),
            equipped: Vec::new(),
            attacks: Vec::new(),
            schema_version: USER_SCHEMA_VERSION,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn spawn_point(&self) -> Point {
        Point::new(self.spawn_x, self.spawn_y)
    }

    pub fn stat_points(&self) -> StatPoints {
        StatPoints::new(self.ap, self.rp, self.mp)
    }

    pub fn is_dead(&self) -> bool {
        self.hp == 0
    }

    pub fn stats_full(&self) -> bool {
        self.ap >= self.max_ap && self.rp >= self.max_rp && self.mp >= self.max_mp
    }

    pub fn xp_to_next_level(&self) -> u64 {
        10 * (self.max_ap + self.max_rp + self.max_mp)
    }

    /// Spend one level's worth of XP if available. Returns true on level up.
    pub fn try_level_up(&mut self) -> bool {
        let threshold = self.xp_to_next_level();
        if self.xp < threshold {
            return false;
        }
        self.xp -= threshold;
        let primary = self.class_info.primary;
        let secondary = self.class_info.secondary;
        *self.max_stat_mut(primary) += 2;
        *self.max_stat_mut(secondary) += 1;
        self.max_hp += 1;
        true
    }

    fn max_stat_mut(&mut self, stat: Stat) -> &mut u64 {
        match stat {
            Stat::Ap => &mut self.max_ap,
            Stat::Rp => &mut self.max_rp,
            Stat::Mp => &mut self.max_mp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub item_type: String,
    pub subtype: String,
    #[serde(default)]
    pub attacks: Vec<String>,
}

/// Whose inventory an item lives in. Users and cells are stored in separate trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryOwner {
    User(String),
    Cell(Point),
}

impl InventoryOwner {
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            InventoryOwner::User(username) => username.as_bytes().to_vec(),
            InventoryOwner::Cell(pt) => pt.to_bytes().to_vec(),
        }
    }
}

/// One line in a user's personal event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogItem {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<Point>,
}

impl LogItem {
    pub fn new(message: impl Into<String>, location: Option<Point>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            location,
        }
    }
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Current wall-clock time in unix nanoseconds.
pub fn unix_nanos_now() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000)
}

/// Readiness accumulated since `last_action`, clamped to `max_charge`.
pub fn charge_since(last_action: i64, now: i64, max_charge: u64) -> u64 {
    let elapsed = now.saturating_sub(last_action).max(0) as u64;
    elapsed.min(max_charge)
}

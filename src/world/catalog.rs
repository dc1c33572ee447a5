//! Static creature, item, terrain and attack tables.
//!
//! The catalog is loaded once at startup (from JSON, or the built-in defaults) and
//! then shared behind an `Arc`. Nothing mutates it after construction.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::world::errors::WorldError;
use crate::world::types::{InventoryItem, StatPoints, UserRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttackDef {
    pub name: String,
    /// Percent chance to hit, 0-100.
    pub accuracy: u8,
    pub stats: StatPoints,
    #[serde(default)]
    pub trample: u64,
    /// Charge required to use this attack.
    #[serde(default)]
    pub charge: u64,
    /// Bonus expression evaluated against the attacker's stats.
    #[serde(default)]
    pub bonuses: String,
}

/// Independent rolls of `probability` repeated `cluster` times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollEntry {
    pub id: String,
    pub probability: f64,
    #[serde(default = "default_cluster")]
    pub cluster: u32,
}

fn default_cluster() -> u32 {
    1
}

impl RollEntry {
    /// Number of successful rolls out of `cluster` attempts.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let p = self.probability.clamp(0.0, 1.0);
        (0..self.cluster).filter(|_| rng.gen_bool(p)).count() as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatureType {
    pub id: String,
    pub name: String,
    pub max_hp: u64,
    pub max_ap: u64,
    pub max_rp: u64,
    pub max_mp: u64,
    #[serde(default)]
    pub attacks: Vec<String>,
    #[serde(default)]
    pub drops: Vec<RollEntry>,
}

impl CreatureType {
    pub fn max_stats(&self) -> StatPoints {
        StatPoints::new(self.max_ap, self.max_rp, self.max_mp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemType {
    pub id: String,
    pub name: String,
    pub item_type: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub attacks: Vec<String>,
}

impl ItemType {
    /// A fresh item instance with its own id.
    pub fn instantiate(&self) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            item_type: self.item_type.clone(),
            subtype: self.subtype.clone(),
            attacks: self.attacks.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerrainType {
    pub id: u16,
    pub name: String,
    /// Creature spawn table, rolled when a cell is first populated.
    #[serde(default)]
    pub spawns: Vec<RollEntry>,
    /// Ground items, rolled when a cell is first populated.
    #[serde(default)]
    pub items: Vec<RollEntry>,
}

/// On-disk JSON layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogSeed {
    #[serde(default)]
    attacks: Vec<AttackDef>,
    #[serde(default)]
    creatures: Vec<CreatureType>,
    #[serde(default)]
    items: Vec<ItemType>,
    #[serde(default)]
    terrain: Vec<TerrainType>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    attacks: HashMap<String, AttackDef>,
    creatures: HashMap<String, CreatureType>,
    items: HashMap<String, ItemType>,
    terrain: HashMap<u16, TerrainType>,
}

impl Catalog {
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, WorldError> {
        let seed: CatalogSeed = serde_json::from_str(contents)?;
        Ok(Self::from_seed(seed))
    }

    pub fn to_json_pretty(&self) -> Result<String, WorldError> {
        let mut seed = CatalogSeed {
            attacks: self.attacks.values().cloned().collect(),
            creatures: self.creatures.values().cloned().collect(),
            items: self.items.values().cloned().collect(),
            terrain: self.terrain.values().cloned().collect(),
        };
        seed.attacks.sort_by(|a, b| a.name.cmp(&b.name));
        seed.creatures.sort_by(|a, b| a.id.cmp(&b.id));
        seed.items.sort_by(|a, b| a.id.cmp(&b.id));
        seed.terrain.sort_by_key(|t| t.id);
        Ok(serde_json::to_string_pretty(&seed)?)
    }

    fn from_seed(seed: CatalogSeed) -> Self {
        let catalog = Self {
            attacks: seed.attacks.into_iter().map(|a| (a.name.clone(), a)).collect(),
            creatures: seed.creatures.into_iter().map(|c| (c.id.clone(), c)).collect(),
            items: seed.items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            terrain: seed.terrain.into_iter().map(|t| (t.id, t)).collect(),
        };
        catalog.warn_dangling_references();
        catalog
    }

    fn warn_dangling_references(&self) {
        for creature in self.creatures.values() {
            for attack in &creature.attacks {
                if !self.attacks.contains_key(attack) {
                    warn!("creature type {} references unknown attack {}", creature.id, attack);
                }
            }
            for drop in &creature.drops {
                if !self.items.contains_key(&drop.id) {
                    warn!("creature type {} drops unknown item {}", creature.id, drop.id);
                }
            }
        }
        for terrain in self.terrain.values() {
            for spawn in &terrain.spawns {
                if !self.creatures.contains_key(&spawn.id) {
                    warn!("terrain {} spawns unknown creature {}", terrain.id, spawn.id);
                }
            }
        }
    }

    pub fn attack(&self, name: &str) -> Option<&AttackDef> {
        self.attacks.get(name)
    }

    pub fn creature_type(&self, id: &str) -> Option<&CreatureType> {
        self.creatures.get(id)
    }

    pub fn item_type(&self, id: &str) -> Option<&ItemType> {
        self.items.get(id)
    }

    pub fn terrain_type(&self, id: u16) -> Option<&TerrainType> {
        self.terrain.get(&id)
    }

    /// Attack definitions a creature type can use, skipping unknown names.
    pub fn creature_attacks(&self, creature: &CreatureType) -> Vec<&AttackDef> {
        creature
            .attacks
            .iter()
            .filter_map(|name| self.attacks.get(name))
            .collect()
    }

    /// `max(avg(max AP/RP/MP), costliest attack)`, never below 1.
    pub fn creature_max_charge(&self, creature: &CreatureType) -> u64 {
        let costliest = self
            .creature_attacks(creature)
            .iter()
            .map(|a| a.charge)
            .max()
            .unwrap_or(0);
        max_charge(creature.max_stats(), costliest)
    }

    pub fn user_max_charge(&self, user: &UserRecord) -> u64 {
        let costliest = user
            .attacks
            .iter()
            .filter_map(|name| self.attacks.get(name))
            .map(|a| a.charge)
            .max()
            .unwrap_or(0);
        max_charge(
            StatPoints::new(user.max_ap, user.max_rp, user.max_mp),
            costliest,
        )
    }

    /// Small default world used when no catalog file is configured.
    pub fn builtin() -> Self {
        let attacks = vec![
            AttackDef {
                name: "bite".into(),
                accuracy: 80,
                stats: StatPoints::new(2, 0, 0),
                trample: 0,
                charge: 2,
                bonuses: String::new(),
            },
            AttackDef {
                name: "claw".into(),
                accuracy: 70,
                stats: StatPoints::new(1, 1, 0),
                trample: 1,
                charge: 3,
                bonuses: "AP+50%AP".into(),
            },
            AttackDef {
                name: "punch".into(),
                accuracy: 90,
                stats: StatPoints::new(1, 0, 0),
                trample: 0,
                charge: 1,
                bonuses: String::new(),
            },
            AttackDef {
                name: "slash".into(),
                accuracy: 85,
                stats: StatPoints::new(3, 0, 0),
                trample: 1,
                charge: 2,
                bonuses: "AP+AP".into(),
            },
            AttackDef {
                name: "spark".into(),
                accuracy: 75,
                stats: StatPoints::new(0, 0, 2),
                trample: 0,
                charge: 3,
                bonuses: "MP+1;RP+25%MP".into(),
            },
        ];
        let creatures = vec![
            CreatureType {
                id: "rat".into(),
                name: "Rat".into(),
                max_hp: 3,
                max_ap: 1,
                max_rp: 0,
                max_mp: 0,
                attacks: vec!["bite".into()],
                drops: vec![RollEntry {
                    id: "rat_tail".into(),
                    probability: 0.5,
                    cluster: 1,
                }],
            },
            CreatureType {
                id: "wolf".into(),
                name: "Wolf".into(),
                max_hp: 8,
                max_ap: 3,
                max_rp: 1,
                max_mp: 0,
                attacks: vec!["bite".into(), "claw".into()],
                drops: vec![RollEntry {
                    id: "pelt".into(),
                    probability: 0.3,
                    cluster: 2,
                }],
            },
            CreatureType {
                id: "will_o_wisp".into(),
                name: "Will-o'-wisp".into(),
                max_hp: 5,
                max_ap: 0,
                max_rp: 2,
                max_mp: 4,
                attacks: vec!["spark".into()],
                drops: Vec::new(),
            },
        ];
        let items = vec![
            ItemType {
                id: "rat_tail".into(),
                name: "Rat Tail".into(),
                item_type: "junk".into(),
                subtype: String::new(),
                attacks: Vec::new(),
            },
            ItemType {
                id: "pelt".into(),
                name: "Wolf Pelt".into(),
                item_type: "material".into(),
                subtype: "hide".into(),
                attacks: Vec::new(),
            },
            ItemType {
                id: "rusty_sword".into(),
                name: "Rusty Sword".into(),
                item_type: "weapon".into(),
                subtype: "sword".into(),
                attacks: vec!["slash".into()],
            },
        ];
        let terrain = vec![
            TerrainType {
                id: 0,
                name: "Water".into(),
                spawns: Vec::new(),
                items: Vec::new(),
            },
            TerrainType {
                id: 1,
                name: "Grassland".into(),
                spawns: vec![RollEntry {
                    id: "rat".into(),
                    probability: 0.3,
                    cluster: 2,
                }],
                items: Vec::new(),
            },
            TerrainType {
                id: 2,
                name: "Forest".into(),
                spawns: vec![
                    RollEntry {
                        id: "wolf".into(),
                        probability: 0.2,
                        cluster: 1,
                    },
                    RollEntry {
                        id: "will_o_wisp".into(),
                        probability: 0.05,
                        cluster: 1,
                    },
                ],
                items: vec![RollEntry {
                    id: "rusty_sword".into(),
                    probability: 0.02,
                    cluster: 1,
                }],
            },
        ];
        Self::from_seed(CatalogSeed {
            attacks,
            creatures,
            items,
            terrain,
        })
    }
}

fn max_charge(max: StatPoints, costliest_attack: u64) -> u64 {
    (max.damage() / 3).max(costliest_attack).max(1)
}

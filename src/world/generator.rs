//! Pluggable world-generation collaborators.
//!
//! Terrain generation proper lives outside the engine; the store only asks a
//! [`TerrainGenerator`] whether a freshly written cell should have its spawn
//! and item tables rolled.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::world::types::CellRecord;

pub trait TerrainGenerator: Send + Sync {
    /// Called when `new` is written over `old`. Returning true rolls the new
    /// terrain's spawn and item tables into the cell.
    fn populate(&self, old: Option<&CellRecord>, new: &CellRecord) -> bool;
}

/// Populate a cell the first time it is written, never again.
#[derive(Debug, Default, Clone, Copy)]
pub struct PopulateOnFirstWrite;

impl TerrainGenerator for PopulateOnFirstWrite {
    fn populate(&self, old: Option<&CellRecord>, _new: &CellRecord) -> bool {
        old.is_none()
    }
}

/// Never populate; used by tools and tests that place creatures explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPopulation;

impl TerrainGenerator for NoPopulation {
    fn populate(&self, _old: Option<&CellRecord>, _new: &CellRecord) -> bool {
        false
    }
}

pub trait PlaceNameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Two or three syllables with an optional landform suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyllableNames;

const SYLLABLES: &[&str] = &[
    "ar", "bel", "cor", "dun", "el", "fen", "gal", "hol", "ith", "kar", "lin", "mor", "nor",
    "oth", "pel", "quen", "ros", "sil", "tor", "ul", "vey", "wen", "yr", "zan",
];

const SUFFIXES: &[&str] = &["", "", " Vale", " Moor", " Reach", " Hollow", " Fields", " Wood"];

impl PlaceNameGenerator for SyllableNames {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(2..=3);
        let mut name = String::new();
        for _ in 0..count {
            if let Some(s) = SYLLABLES.choose(&mut rng) {
                name.push_str(s);
            }
        }
        let mut chars = name.chars();
        let mut out = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::from("Nowhere"),
        };
        if let Some(suffix) = SUFFIXES.choose(&mut rng) {
            out.push_str(suffix);
        }
        out
    }
}

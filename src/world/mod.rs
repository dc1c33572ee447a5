//! The live world: persistent cells, creatures and users, the active-region
//! cache, combat, and the background simulation loop.

pub mod active;
pub mod bonus;
pub mod catalog;
pub mod combat;
pub mod errors;
pub mod events;
pub mod facade;
pub mod generator;
pub mod presence;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use active::{ActiveCellEntry, ActiveRegionCache};
pub use catalog::Catalog;
pub use combat::{CombatOutcome, CombatResolver, Combatant, CounterattackHook, ResolvedAttack};
pub use errors::WorldError;
pub use events::{CellLogSink, EventSink, RecordingSink};
pub use facade::{ActionRefused, World};
pub use generator::{PlaceNameGenerator, TerrainGenerator};
pub use presence::PresenceScan;
pub use scheduler::{SimulationScheduler, TickStats};
pub use storage::{WorldStore, WorldStoreBuilder};
pub use types::{CellRecord, CreatureRecord, Direction, Point, UserRecord};

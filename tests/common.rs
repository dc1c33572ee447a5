//! Shared fixtures for world integration tests.

use std::sync::Arc;

use tempfile::TempDir;
use wildgrid::world::generator::NoPopulation;
use wildgrid::world::{Catalog, RecordingSink, WorldStore, WorldStoreBuilder};

/// Small catalog with predictable numbers.
pub const TEST_CATALOG: &str = r#"{
  "attacks": [
    { "name": "thump", "accuracy": 100, "stats": { "ap": 1, "rp": 0, "mp": 0 }, "charge": 3 }
  ],
  "creatures": [
    {
      "id": "golem", "name": "Golem",
      "max_hp": 10, "max_ap": 0, "max_rp": 2, "max_mp": 0,
      "attacks": ["thump"],
      "drops": [ { "id": "shard", "probability": 1.0 } ]
    },
    {
      "id": "husk", "name": "Husk",
      "max_hp": 3, "max_ap": 0, "max_rp": 0, "max_mp": 0,
      "attacks": ["thump"]
    }
  ],
  "items": [
    { "id": "shard", "name": "Stone Shard", "item_type": "junk" }
  ],
  "terrain": [
    { "id": 1, "name": "Plain" }
  ]
}"#;

#[allow(dead_code)]
pub struct TestWorld {
    pub dir: TempDir,
    pub store: Arc<WorldStore>,
    pub sink: Arc<RecordingSink>,
}

#[allow(dead_code)]
pub fn test_world() -> TestWorld {
    let dir = TempDir::new().expect("tempdir");
    let catalog = Catalog::from_json_str(TEST_CATALOG).expect("catalog");
    let store = WorldStoreBuilder::new(dir.path())
        .catalog(Arc::new(catalog))
        .terrain_generator(NoPopulation)
        .open()
        .expect("store");
    TestWorld {
        dir,
        store: Arc::new(store),
        sink: Arc::new(RecordingSink::new()),
    }
}

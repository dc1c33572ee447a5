/// Integration tests for reopening a world and catalog-driven population
mod common;

use std::sync::Arc;

use tempfile::TempDir;
use wildgrid::world::generator::PopulateOnFirstWrite;
use wildgrid::world::types::{CellRecord, InventoryOwner, Point};
use wildgrid::world::{Catalog, UserRecord, WorldStoreBuilder};

const POPULATED_CATALOG: &str = r#"{
  "attacks": [],
  "creatures": [
    { "id": "golem", "name": "Golem", "max_hp": 10, "max_ap": 0, "max_rp": 2, "max_mp": 0 }
  ],
  "items": [
    { "id": "shard", "name": "Stone Shard", "item_type": "junk" }
  ],
  "terrain": [
    {
      "id": 4, "name": "Quarry",
      "spawns": [ { "id": "golem", "probability": 1.0, "cluster": 2 } ],
      "items": [ { "id": "shard", "probability": 1.0 } ]
    }
  ]
}"#;

#[test]
fn first_write_rolls_spawn_and_item_tables() {
    let dir = TempDir::new().expect("tempdir");
    let catalog_path = dir.path().join("catalog.json");
    std::fs::write(&catalog_path, POPULATED_CATALOG).expect("write catalog");
    let catalog = Catalog::load_from_json(&catalog_path).expect("catalog");
    let store = WorldStoreBuilder::new(dir.path().join("world"))
        .catalog(Arc::new(catalog))
        .terrain_generator(PopulateOnFirstWrite)
        .open()
        .expect("store");

    let pt = Point::new(5, 6);
    let (region, _) = store.new_region_id().expect("region");
    store.set_cell(pt, &CellRecord::new(4, region));

    let names: Vec<String> = store
        .list_creatures(pt)
        .into_iter()
        .map(|c| c.display_name)
        .collect();
    assert_eq!(names, vec!["Golem 1".to_string(), "Golem 2".to_string()]);
    assert_eq!(store.list_inventory(&InventoryOwner::Cell(pt)).len(), 1);

    // Rewriting an existing cell does not populate again.
    store.set_cell(pt, &CellRecord::new(4, region));
    assert_eq!(store.list_creatures(pt).len(), 2);
    assert_eq!(store.creature_count(), 2);
}

#[test]
fn reopened_store_keeps_world_state() {
    let dir = TempDir::new().expect("tempdir");
    let pt = Point::new(1, 1);
    let creature_id;
    {
        let store = WorldStoreBuilder::new(dir.path()).open().expect("store");
        let mut user = UserRecord::new("keeper");
        user.xp = 17;
        store.put_user(&user);
        let (region, name) = store.new_region_id().expect("region");
        store.set_cell(pt, &CellRecord::new(0, region));
        assert_eq!(store.region_name(region), Some(name));
        creature_id = store.spawn_creature(pt, "wolf").expect("spawn").id;
        store.flush().expect("flush");
    }

    let store = WorldStoreBuilder::new(dir.path()).open().expect("reopen");
    assert_eq!(store.get_user("keeper").xp, 17);
    assert_eq!(store.list_usernames(), vec!["keeper".to_string()]);
    let cell = store.get_cell(pt).expect("cell");
    assert!(!cell.region_name.is_empty());
    let wolf = store.get_creature(creature_id).expect("creature");
    assert_eq!(wolf.display_name, "Wolf");
    assert!(wolf.max_charge >= 1);

    // The region counter carries on from where it stopped.
    let (next, _) = store.new_region_id().expect("region");
    assert_eq!(next, cell.region_name_id + 1);
}

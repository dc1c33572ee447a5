//! Heartbeat-based presence.
//!
//! Sessions call [`WorldStore::heartbeat`] while connected. A user whose last
//! heartbeat is older than the presence timeout (15s by default) is offline, and
//! the next scan removes their entry.

use log::{debug, error};
use sled::IVec;

use crate::world::errors::WorldError;
use crate::world::storage::{logged, WorldStore};
use crate::world::types::{unix_now, Point, UserRecord};

/// Result of one presence scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceScan {
    pub online: Vec<String>,
    pub pruned: Vec<String>,
}

fn decode_heartbeat(bytes: &[u8]) -> Option<i64> {
    <[u8; 8]>::try_from(bytes).ok().map(i64::from_be_bytes)
}

impl WorldStore {
    pub fn heartbeat(&self, username: &str) {
        self.heartbeat_at(username, unix_now());
    }

    pub fn heartbeat_at(&self, username: &str, now: i64) {
        let result = self
            .online_users
            .insert(username.as_bytes(), &now.to_be_bytes()[..])
            .map_err(WorldError::from);
        logged("heartbeat", result);
    }

    fn is_fresh(&self, heartbeat: i64, now: i64) -> bool {
        now - heartbeat <= self.presence_timeout_secs
    }

    pub fn scan_and_prune_presence(&self) -> PresenceScan {
        self.scan_and_prune_presence_at(unix_now())
    }

    /// Split presence entries into online users and stale ones, removing the stale
    /// entries as they are found. A heartbeat that lands between the read and the
    /// removal keeps the user online.
    pub fn scan_and_prune_presence_at(&self, now: i64) -> PresenceScan {
        let mut scan = PresenceScan::default();
        let entries: Vec<(IVec, IVec)> = self
            .online_users
            .iter()
            .filter_map(|entry| logged("scan presence", entry.map_err(WorldError::from)))
            .collect();

        for (key, value) in entries {
            let username = String::from_utf8_lossy(&key).into_owned();
            let fresh = decode_heartbeat(&value).map(|ts| self.is_fresh(ts, now));
            if fresh == Some(true) {
                scan.online.push(username);
                continue;
            }
            match self.online_users.compare_and_swap(&key, Some(&value), None::<IVec>) {
                Ok(Ok(())) => {
                    debug!("presence: {} went offline", username);
                    scan.pruned.push(username);
                }
                Ok(Err(_)) => scan.online.push(username),
                Err(e) => error!("world store prune presence {} failed: {}", username, e),
            }
        }
        scan
    }

    /// Read-only presence check; does not prune.
    pub fn is_online_at(&self, username: &str, now: i64) -> bool {
        logged(
            "get presence",
            self.online_users.get(username.as_bytes()).map_err(WorldError::from),
        )
        .flatten()
        .and_then(|bytes| decode_heartbeat(&bytes))
        .map(|ts| self.is_fresh(ts, now))
        .unwrap_or(false)
    }

    /// Online users whose stored position is `pt`.
    pub fn online_users_in_cell_at(&self, pt: Point, now: i64) -> Vec<UserRecord> {
        self.online_users
            .iter()
            .filter_map(|entry| logged("scan presence", entry.map_err(WorldError::from)))
            .filter(|(_, value)| {
                decode_heartbeat(value)
                    .map(|ts| self.is_fresh(ts, now))
                    .unwrap_or(false)
            })
            .map(|(key, _)| self.get_user(&String::from_utf8_lossy(&key)))
            .filter(|user| user.position() == pt)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::world::storage::WorldStoreBuilder;
    use crate::world::types::{Point, UserRecord};
    use tempfile::TempDir;

    #[test]
    fn stale_heartbeat_is_pruned_on_next_scan() {
        let dir = TempDir::new().unwrap();
        let store = WorldStoreBuilder::new(dir.path()).open().unwrap();
        store.heartbeat_at("fresh", 1_000);
        store.heartbeat_at("stale", 1_000 - 16);
        store.heartbeat_at("edge", 1_000 - 15);

        let scan = store.scan_and_prune_presence_at(1_000);
        let mut online = scan.online.clone();
        online.sort();
        assert_eq!(online, vec!["edge".to_string(), "fresh".to_string()]);
        assert_eq!(scan.pruned, vec!["stale".to_string()]);

        assert!(!store.is_online_at("stale", 1_000));
        let again = store.scan_and_prune_presence_at(1_000);
        assert!(again.pruned.is_empty());
    }

    #[test]
    fn online_users_in_cell_filters_by_position() {
        let dir = TempDir::new().unwrap();
        let store = WorldStoreBuilder::new(dir.path()).open().unwrap();
        let here = Point::new(4, 4);
        let mut a = UserRecord::new("a");
        a.x = here.x;
        a.y = here.y;
        store.put_user(&a);
        store.put_user(&UserRecord::new("b"));
        let mut c = UserRecord::new("c");
        c.x = here.x;
        c.y = here.y;
        store.put_user(&c);

        store.heartbeat_at("a", 100);
        store.heartbeat_at("b", 100);
        store.heartbeat_at("c", 50);

        let names: Vec<String> = store
            .online_users_in_cell_at(here, 100)
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }
}

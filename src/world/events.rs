//! Narrative event output.
//!
//! Combat and the scheduler describe what happened through an [`EventSink`]. The
//! transport layer supplies its own sink for live chat; [`CellLogSink`] persists
//! lines into the personal log of every online user in the cell.

use std::sync::{Arc, Mutex};

use log::info;

use crate::world::storage::WorldStore;
use crate::world::types::{unix_now, LogItem, Point};

pub trait EventSink: Send + Sync {
    /// Publish `message` to everyone at `location`.
    fn emit(&self, location: Point, message: &str);

    /// Publish `message` to a single user.
    fn notify(&self, username: &str, message: &str);
}

/// Writes events into the `userlog` tree.
pub struct CellLogSink {
    store: Arc<WorldStore>,
}

impl CellLogSink {
    pub fn new(store: Arc<WorldStore>) -> Self {
        Self { store }
    }
}

impl EventSink for CellLogSink {
    fn emit(&self, location: Point, message: &str) {
        info!("{} {}", location, message);
        let item = LogItem::new(message, Some(location));
        for user in self.store.online_users_in_cell_at(location, unix_now()) {
            self.store.append_user_log(&user.username, &item);
        }
    }

    fn notify(&self, username: &str, message: &str) {
        info!("[{}] {}", username, message);
        self.store
            .append_user_log(username, &LogItem::new(message, None));
    }
}

/// Keeps events in memory; handy for tools and tests that inspect output.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Option<Point>, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn events_at(&self, location: Point) -> Vec<String> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(pt, _)| *pt == Some(location))
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, location: Point, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((Some(location), message.to_string()));
        }
    }

    fn notify(&self, _username: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((None, message.to_string()));
        }
    }
}

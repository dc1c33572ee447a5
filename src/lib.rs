//! # Wildgrid - a persistent, tick-driven world
//!
//! Wildgrid keeps a very large grid world in an embedded `sled` database and
//! simulates only the parts of it where players are. Sessions move users around,
//! a single background task regenerates users and runs creature AI once per
//! second, and combat resolves attacks between users and creatures.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wildgrid::world::{
//!     ActiveRegionCache, CellLogSink, CombatResolver, SimulationScheduler, World, WorldStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(WorldStore::open("./data/world")?);
//!     let sink = Arc::new(CellLogSink::new(store.clone()));
//!     let cache = Arc::new(ActiveRegionCache::new(store.clone()));
//!     let resolver = Arc::new(CombatResolver::new(store.clone(), sink.clone()));
//!
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let scheduler = Arc::new(SimulationScheduler::new(
//!         store.clone(),
//!         cache.clone(),
//!         resolver.clone(),
//!         sink,
//!     ));
//!     let task = scheduler.start(shutdown_rx);
//!
//!     let world = World::new(store, cache, resolver);
//!     world.enter("alice");
//!
//!     shutdown_tx.send(true)?;
//!     task.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - storage, active regions, combat, scheduler and the session facade
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! sessions ──► World ──► WorldStore (sled)
//!                │            ▲
//!                ▼            │
//!        ActiveRegionCache ◄── SimulationScheduler ──► CombatResolver
//! ```

pub mod config;
pub mod world;

//! Background simulation loop.
//!
//! Once per tick, in this order:
//!
//! 1. online users regenerate, level up, respawn and heal
//! 2. expired active cells are swept and their dead creatures reaped
//! 3. creatures in the remaining active cells decide whether to attack
//!
//! The loop runs on a `tokio` interval until the shared shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::world::active::ActiveRegionCache;
use crate::world::combat::{CombatOutcome, CombatResolver, Combatant, ResolvedAttack};
use crate::world::events::EventSink;
use crate::world::storage::WorldStore;
use crate::world::types::{charge_since, unix_now, Point, UserRecord};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Counters from a single tick, logged at debug level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub online: usize,
    pub users_updated: usize,
    pub level_ups: usize,
    pub respawns: usize,
    pub cells_swept: usize,
    pub active_cells: usize,
    pub attacks: usize,
}

pub struct SimulationScheduler {
    store: Arc<WorldStore>,
    cache: Arc<ActiveRegionCache>,
    resolver: Arc<CombatResolver>,
    sink: Arc<dyn EventSink>,
    interval: Duration,
}

impl SimulationScheduler {
    pub fn new(
        store: Arc<WorldStore>,
        cache: Arc<ActiveRegionCache>,
        resolver: Arc<CombatResolver>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            cache,
            resolver,
            sink,
            interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the tick loop. It exits once `shutdown` holds `true` or its sender is dropped.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("simulation scheduler started ({:?} tick)", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = self.tick_once(unix_now());
                        debug!("tick: {:?}", stats);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("simulation scheduler stopped");
        })
    }

    /// Run one full tick at unix time `now`.
    pub fn tick_once(&self, now: i64) -> TickStats {
        let mut stats = TickStats::default();
        self.regenerate_users(now, &mut stats);
        stats.cells_swept = self.cache.sweep_expired_at(now);
        let points = self.cache.active_points();
        stats.active_cells = points.len();
        for pt in points {
            stats.attacks += self.run_creatures(pt, now);
        }
        stats
    }

    fn regenerate_users(&self, now: i64, stats: &mut TickStats) {
        let scan = self.store.scan_and_prune_presence_at(now);
        stats.online = scan.online.len();
        for username in &scan.online {
            let mut user = self.store.get_user(username);
            let before = user.clone();
            let leveled = self.regenerate(&mut user, now, stats);
            if user != before {
                self.store.put_user(&user);
                stats.users_updated += 1;
            }
            if leveled {
                self.sink.notify(&user.username, "Leveled Up!");
            }
        }
    }

    /// Apply one tick of recovery to `user`. Returns true on level up.
    fn regenerate(&self, user: &mut UserRecord, now: i64, stats: &mut TickStats) -> bool {
        user.ap = (user.ap + 1).min(user.max_ap);
        user.rp = (user.rp + 1).min(user.max_rp);
        user.mp = (user.mp + 1).min(user.max_mp);

        let leveled = user.try_level_up();
        if leveled {
            stats.level_ups += 1;
            info!("{} reached a new level", user.username);
        }

        if !user.stats_full() {
            return leveled;
        }
        if user.is_dead() {
            user.hp = user.max_hp;
            user.x = user.spawn_x;
            user.y = user.spawn_y;
            stats.respawns += 1;
            info!("{} respawned at {}", user.username, user.spawn_point());
        } else if now % 5 == 0 && user.hp < user.max_hp {
            let max = self.store.catalog().user_max_charge(user);
            if self.store.user_charge_at(user, now.saturating_mul(1_000_000_000)) == max {
                user.hp += 1;
            }
        }
        leveled
    }

    /// Creature AI for one active cell. Returns the number of attacks made.
    fn run_creatures(&self, pt: Point, now: i64) -> usize {
        let catalog = self.store.catalog().clone();
        let mut rng = rand::thread_rng();
        let mut attacks = 0;
        {
            let Some(mut entry) = self.cache.entry_mut(pt) else {
                return 0;
            };
            let entry = &mut *entry;
            for creature in entry.creatures.iter_mut() {
                if creature.is_dead() {
                    continue;
                }
                let id = creature.id;
                let max = creature.max_charge.max(1);
                let last = *entry.last_action.entry(id).or_insert(now);
                creature.charge = charge_since(last, now, max);

                let desired = match entry.desired_charge.get(&id) {
                    Some(&d) if d > 0 => d,
                    _ => rng.gen_range(1..=max),
                };
                if creature.charge < desired {
                    entry.desired_charge.insert(id, desired);
                    continue;
                }
                entry.desired_charge.insert(id, rng.gen_range(1..=max));

                let Some(kind) = catalog.creature_type(&creature.creature_type_id) else {
                    warn!("creature {} has unknown type {}", id, creature.creature_type_id);
                    continue;
                };
                let choices = catalog.creature_attacks(kind);
                let Some(def) = choices.choose(&mut rng) else {
                    continue;
                };
                let mut source = Combatant::Creature(creature.clone());
                let attack = ResolvedAttack::from_def(def, &source.stat_block());
                if creature.charge < attack.charge {
                    continue;
                }

                let present = self.store.online_users_in_cell_at(pt, now);
                let Some(victim) = present.choose(&mut rng) else {
                    continue;
                };
                // The user may have moved since the presence scan.
                let victim = self.store.get_user(&victim.username);
                if victim.position() != pt || victim.is_dead() {
                    continue;
                }

                let mut target = Combatant::User(victim);
                let outcome = self.resolver.resolve_at(&mut source, &mut target, &attack, now);
                if outcome != CombatOutcome::NoTarget {
                    attacks += 1;
                }
                entry.last_action.insert(id, now);
                creature.charge = 0;
            }
        }
        if attacks > 0 {
            self.cache.refresh_snapshot(pt);
        }
        attacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::events::RecordingSink;
    use crate::world::generator::NoPopulation;
    use crate::world::storage::WorldStoreBuilder;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<WorldStore>,
        cache: Arc<ActiveRegionCache>,
        sink: Arc<RecordingSink>,
        scheduler: Arc<SimulationScheduler>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            WorldStoreBuilder::new(dir.path())
                .terrain_generator(NoPopulation)
                .open()
                .unwrap(),
        );
        let sink = Arc::new(RecordingSink::new());
        let cache = Arc::new(ActiveRegionCache::new(store.clone()));
        let resolver = Arc::new(CombatResolver::new(store.clone(), sink.clone()));
        let scheduler = Arc::new(SimulationScheduler::new(
            store.clone(),
            cache.clone(),
            resolver,
            sink.clone(),
        ));
        Fixture {
            _dir: dir,
            store,
            cache,
            sink,
            scheduler,
        }
    }

    #[test]
    fn regeneration_caps_at_max_and_skips_offline_users() {
        let f = fixture();
        let mut online = UserRecord::new("online");
        online.ap = 0;
        online.rp = 1;
        online.mp = 2;
        f.store.put_user(&online);
        let mut offline = UserRecord::new("offline");
        offline.ap = 0;
        f.store.put_user(&offline);
        f.store.heartbeat_at("online", 1_001);

        let stats = f.scheduler.tick_once(1_001);
        assert_eq!(stats.online, 1);
        let online = f.store.get_user("online");
        assert_eq!((online.ap, online.rp, online.mp), (1, 2, 2));
        assert_eq!(f.store.get_user("offline").ap, 0);
    }

    #[test]
    fn level_up_spends_xp_and_notifies() {
        let f = fixture();
        let mut user = UserRecord::new("hero");
        user.xp = user.xp_to_next_level() + 3;
        f.store.put_user(&user);
        f.store.heartbeat_at("hero", 7);

        let stats = f.scheduler.tick_once(7);
        assert_eq!(stats.level_ups, 1);
        let user = f.store.get_user("hero");
        assert_eq!(user.xp, 3);
        assert_eq!(user.max_ap, 4);
        assert_eq!(user.max_rp, 3);
        assert_eq!(user.max_hp, 11);
        assert!(f.sink.messages().contains(&"Leveled Up!".to_string()));
    }

    #[test]
    fn dead_user_respawns_once_stats_are_full() {
        let f = fixture();
        let mut user = UserRecord::new("ghost");
        user.hp = 0;
        user.x += 3;
        user.mp = 1;
        f.store.put_user(&user);
        f.store.heartbeat_at("ghost", 11);

        f.scheduler.tick_once(11);
        let user = f.store.get_user("ghost");
        assert_eq!(user.hp, user.max_hp);
        assert_eq!(user.position(), user.spawn_point());
    }

    #[test]
    fn hp_regenerates_only_on_fifth_second_when_charged() {
        let f = fixture();
        let mut user = UserRecord::new("healer");
        user.hp = 5;
        f.store.put_user(&user);
        f.store.heartbeat_at("healer", 21);

        f.scheduler.tick_once(21);
        assert_eq!(f.store.get_user("healer").hp, 5);

        f.store.heartbeat_at("healer", 25);
        f.scheduler.tick_once(25);
        assert_eq!(f.store.get_user("healer").hp, 6);

        // Having just acted, the user is not charged.
        f.store.touch_user_action_at("healer", 30 * 1_000_000_000);
        f.store.heartbeat_at("healer", 30);
        f.scheduler.tick_once(30);
        assert_eq!(f.store.get_user("healer").hp, 6);
    }

    #[test]
    fn unchanged_users_are_not_rewritten() {
        let f = fixture();
        f.store.put_user(&UserRecord::new("idle"));
        f.store.heartbeat_at("idle", 3);
        let stats = f.scheduler.tick_once(3);
        assert_eq!(stats.users_updated, 0);
    }

    #[test]
    fn creatures_attack_online_users_in_their_cell() {
        let f = fixture();
        let mut user = UserRecord::new("prey");
        user.hp = 1000;
        user.max_hp = 1000;
        f.store.put_user(&user);
        let pt = user.position();
        f.store.spawn_creature(pt, "wolf").unwrap();
        f.cache.activate_at(pt, 100);

        let mut attacks = 0;
        for now in 100..140 {
            f.store.heartbeat_at("prey", now);
            f.cache.activate_at(pt, now);
            attacks += f.scheduler.tick_once(now).attacks;
        }
        assert!(attacks > 0);
        assert!(!f.sink.events_at(pt).is_empty());
        let entry = f.cache.snapshot(pt).unwrap();
        let max = entry.creatures[0].max_charge;
        assert_eq!(max, 3);
        assert!(entry.desired_charge.values().all(|&d| (1..=max).contains(&d)));
    }

    #[test]
    fn idle_creature_charge_clamps_at_max() {
        let f = fixture();
        let pt = Point::new(40, 40);
        let wolf = f.store.spawn_creature(pt, "wolf").unwrap();
        f.cache.activate_at(pt, 100);
        assert_eq!(f.scheduler.tick_once(100).attacks, 0);

        // Long after first sighting, with nobody around to attack.
        f.cache.activate_at(pt, 127);
        assert_eq!(f.scheduler.tick_once(127).attacks, 0);

        let entry = f.cache.snapshot(pt).unwrap();
        let seen = entry.creatures.iter().find(|c| c.id == wolf.id).unwrap();
        assert_eq!(seen.max_charge, 3);
        assert_eq!(seen.charge, seen.max_charge);
        assert_eq!(entry.last_action.get(&wolf.id), Some(&100));
        let desired = entry.desired_charge[&wolf.id];
        assert!((1..=seen.max_charge).contains(&desired));
        assert!(f.sink.events_at(pt).is_empty());
    }

    #[test]
    fn creatures_ignore_users_elsewhere() {
        let f = fixture();
        let user = UserRecord::new("away");
        f.store.put_user(&user);
        let pt = Point::new(user.x + 1, user.y);
        f.store.spawn_creature(pt, "wolf").unwrap();

        for now in 100..130 {
            f.store.heartbeat_at("away", now);
            f.cache.activate_at(pt, now);
            assert_eq!(f.scheduler.tick_once(now).attacks, 0);
        }
        assert!(f.sink.messages().is_empty());
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown_signal() {
        let f = fixture();
        let scheduler = Arc::new(
            SimulationScheduler::new(
                f.store.clone(),
                f.cache.clone(),
                Arc::new(CombatResolver::new(f.store.clone(), f.sink.clone())),
                f.sink.clone(),
            )
            .with_interval(Duration::from_millis(10)),
        );
        let (tx, rx) = watch::channel(false);
        let handle = scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}

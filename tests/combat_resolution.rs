/// Integration tests for attack resolution against the store
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::test_world;
use wildgrid::world::types::{InventoryOwner, StatPoints};
use wildgrid::world::{
    CombatOutcome, CombatResolver, Combatant, CounterattackHook, ResolvedAttack, UserRecord,
};

fn attack(accuracy: u8, ap: u64) -> ResolvedAttack {
    ResolvedAttack {
        name: "strike".into(),
        accuracy,
        stats: StatPoints::new(ap, 0, 0),
        trample: 0,
        charge: 1,
    }
}

#[test]
fn sure_hit_deals_ap_minus_rp() {
    let w = test_world();
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone());
    let hero = UserRecord::new("hero");
    let pt = hero.position();
    let golem = w.store.spawn_creature(pt, "golem").expect("spawn");

    let mut source = Combatant::User(hero);
    let mut target = Combatant::Creature(golem.clone());
    let outcome = resolver.resolve_at(&mut source, &mut target, &attack(100, 5), 1_000);

    assert_eq!(outcome, CombatOutcome::Hit { damage: 3 });
    assert_eq!(w.store.get_creature(golem.id).unwrap().hp, 7);
    assert_eq!(w.sink.events_at(pt).len(), 1);
}

#[test]
fn zero_accuracy_always_misses() {
    let w = test_world();
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone());
    let hero = UserRecord::new("hero");
    let golem = w.store.spawn_creature(hero.position(), "golem").unwrap();

    let mut source = Combatant::User(hero);
    let mut target = Combatant::Creature(golem.clone());
    for _ in 0..20 {
        assert_eq!(
            resolver.resolve_at(&mut source, &mut target, &attack(0, 50), 1_000),
            CombatOutcome::Missed
        );
    }
    assert_eq!(w.store.get_creature(golem.id).unwrap().hp, 10);
    assert_eq!(w.sink.messages().len(), 20);
}

#[test]
fn kill_drops_loot_and_rewards_online_users_once() {
    let w = test_world();
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone());
    let hero = UserRecord::new("hero");
    let pt = hero.position();
    w.store.put_user(&hero);
    w.store.put_user(&UserRecord::new("watcher"));
    w.store.put_user(&UserRecord::new("sleeper"));
    w.store.heartbeat_at("hero", 1_000);
    w.store.heartbeat_at("watcher", 1_000);
    w.store.heartbeat_at("sleeper", 900);

    let mut golem = w.store.spawn_creature(pt, "golem").unwrap();
    golem.hp = 2;
    w.store.put_creature(&golem);
    // thump costs 3, averages are 0, so the reward is 3
    let reward = golem.max_charge;
    assert_eq!(reward, 3);

    let mut source = Combatant::User(hero);
    let mut target = Combatant::Creature(golem.clone());
    let outcome = resolver.resolve_at(&mut source, &mut target, &attack(100, 10), 1_000);
    assert_eq!(outcome, CombatOutcome::Killed { damage: 8 });

    // Dead but not yet reaped.
    assert_eq!(w.store.get_creature(golem.id).unwrap().hp, 0);
    assert_eq!(w.store.get_user("hero").xp, reward);
    assert_eq!(w.store.get_user("watcher").xp, reward);
    assert_eq!(w.store.get_user("sleeper").xp, 0);
    let loot = w.store.list_inventory(&InventoryOwner::Cell(pt));
    assert_eq!(loot.len(), 1);
    assert_eq!(loot[0].name, "Stone Shard");

    // Hitting the corpse again does nothing.
    assert_eq!(
        resolver.resolve_at(&mut source, &mut target, &attack(100, 10), 1_001),
        CombatOutcome::NoTarget
    );
    let mut reloaded = Combatant::Creature(w.store.get_creature(golem.id).unwrap());
    assert_eq!(
        resolver.resolve_at(&mut source, &mut reloaded, &attack(100, 10), 1_001),
        CombatOutcome::NoTarget
    );
    assert_eq!(w.store.get_user("hero").xp, reward);
    assert_eq!(w.sink.events_at(pt).len(), 1);
}

#[test]
fn reaped_creature_stays_gone_for_stale_attackers() {
    let w = test_world();
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone());
    let hero = UserRecord::new("hero");
    let pt = hero.position();
    w.store.put_user(&hero);
    w.store.heartbeat_at("hero", 1_000);

    let golem = w.store.spawn_creature(pt, "golem").unwrap();
    assert!(w.store.delete_creature(golem.id));

    let mut source = Combatant::User(hero);
    let mut target = Combatant::Creature(golem.clone());
    let outcome = resolver.resolve_at(&mut source, &mut target, &attack(100, 20), 1_000);
    assert_eq!(outcome, CombatOutcome::NoTarget);
    assert!(w.store.get_creature(golem.id).is_none());
    assert_eq!(w.store.creature_count(), 0);
    assert_eq!(w.store.get_user("hero").xp, 0);
    assert!(w.store.list_inventory(&InventoryOwner::Cell(pt)).is_empty());
    assert!(w.sink.events_at(pt).is_empty());
}

#[test]
fn users_are_not_wounded_without_a_counter() {
    let w = test_world();
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone());
    let victim = UserRecord::new("victim");
    w.store.put_user(&victim);
    let husk = w.store.spawn_creature(victim.position(), "husk").unwrap();

    let mut source = Combatant::Creature(husk);
    let mut target = Combatant::User(victim);
    let outcome = resolver.resolve_at(&mut source, &mut target, &attack(100, 9), 1_000);
    assert_eq!(outcome, CombatOutcome::Hit { damage: 7 });
    assert_eq!(w.store.get_user("victim").hp, 10);
}

struct AlwaysCounter {
    calls: Arc<AtomicUsize>,
}

impl CounterattackHook for AlwaysCounter {
    fn counterattack(
        &self,
        _defender: &Combatant,
        _attacker: &Combatant,
        _incoming: &ResolvedAttack,
    ) -> Option<ResolvedAttack> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(attack(100, 1))
    }
}

#[test]
fn counterattack_recurses_exactly_once() {
    let w = test_world();
    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = CombatResolver::new(w.store.clone(), w.sink.clone()).with_counterattack(
        AlwaysCounter {
            calls: calls.clone(),
        },
    );
    let a = UserRecord::new("a");
    let b = UserRecord::new("b");
    let pt = a.position();
    w.store.put_user(&a);
    w.store.put_user(&b);

    let mut source = Combatant::User(a);
    let mut target = Combatant::User(b);
    // 4 AP against RP 2 lands 2; the counter's 1 AP is fully absorbed.
    let outcome = resolver.resolve_at(&mut source, &mut target, &attack(100, 4), 1_000);
    assert_eq!(
        outcome,
        CombatOutcome::Countered {
            damage: 2,
            counter: Box::new(CombatOutcome::Hit { damage: 0 }),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(w.store.get_user("b").hp, 8);
    assert_eq!(w.store.get_user("a").hp, 10);
    assert_eq!(w.sink.events_at(pt).len(), 2);
}

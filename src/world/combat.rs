//! Attack resolution.
//!
//! Attack components are mitigated crosswise by the defender: AP is absorbed by
//! RP, RP by MP, and MP by AP. Whatever survives is damage. Trample adds extra
//! damage that ignores mitigation.

use std::sync::Arc;

use log::debug;
use rand::Rng;

use crate::world::bonus::{apply_bonuses, StatBlock};
use crate::world::catalog::AttackDef;
use crate::world::events::EventSink;
use crate::world::storage::WorldStore;
use crate::world::types::{unix_now, CreatureRecord, InventoryOwner, Point, StatPoints, UserRecord};

/// Residual attack after the defender's stats absorb what they can.
pub fn apply_defense(attack: StatPoints, defense: StatPoints) -> StatPoints {
    StatPoints {
        ap: attack.ap.saturating_sub(defense.rp),
        rp: attack.rp.saturating_sub(defense.mp),
        mp: attack.mp.saturating_sub(defense.ap),
    }
}

/// Either side of a fight.
#[derive(Debug, Clone, PartialEq)]
pub enum Combatant {
    User(UserRecord),
    Creature(CreatureRecord),
}

impl Combatant {
    pub fn name(&self) -> &str {
        match self {
            Combatant::User(user) => &user.username,
            Combatant::Creature(creature) if creature.display_name.is_empty() => {
                &creature.creature_type_id
            }
            Combatant::Creature(creature) => &creature.display_name,
        }
    }

    pub fn stat_points(&self) -> StatPoints {
        match self {
            Combatant::User(user) => user.stat_points(),
            Combatant::Creature(creature) => creature.stat_points(),
        }
    }

    pub fn hp(&self) -> u64 {
        match self {
            Combatant::User(user) => user.hp,
            Combatant::Creature(creature) => creature.hp,
        }
    }

    pub fn position(&self) -> Point {
        match self {
            Combatant::User(user) => user.position(),
            Combatant::Creature(creature) => creature.position,
        }
    }

    /// Own stats as a bonus-expression source.
    pub fn stat_block(&self) -> StatBlock {
        StatBlock::from_actor(self.hp(), self.stat_points())
    }
}

/// An attack with its bonus expression already applied for a specific attacker.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttack {
    pub name: String,
    pub accuracy: u8,
    pub stats: StatPoints,
    pub trample: u64,
    pub charge: u64,
}

impl ResolvedAttack {
    pub fn from_def(def: &AttackDef, attacker: &StatBlock) -> Self {
        let mut block = StatBlock::from_attack(def.stats, def.trample);
        if !def.bonuses.is_empty() {
            apply_bonuses(&def.bonuses, attacker, &mut block);
        }
        Self {
            name: def.name.clone(),
            accuracy: def.accuracy,
            stats: block.stat_points(),
            trample: block.trample(),
            charge: def.charge,
        }
    }
}

/// Chance for a defender to strike back. Whatever it returns is resolved once
/// against the original attacker and never triggers a further counter.
pub trait CounterattackHook: Send + Sync {
    fn counterattack(
        &self,
        defender: &Combatant,
        attacker: &Combatant,
        incoming: &ResolvedAttack,
    ) -> Option<ResolvedAttack>;
}

/// The current rules: nobody counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCounterattack;

impl CounterattackHook for NoCounterattack {
    fn counterattack(&self, _: &Combatant, _: &Combatant, _: &ResolvedAttack) -> Option<ResolvedAttack> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatOutcome {
    /// Target was already dead; nothing happened.
    NoTarget,
    Missed,
    Hit { damage: u64 },
    Killed { damage: u64 },
    /// The defender struck back; `counter` is the outcome of that strike.
    Countered { damage: u64, counter: Box<CombatOutcome> },
}

pub struct CombatResolver {
    store: Arc<WorldStore>,
    sink: Arc<dyn EventSink>,
    counter: Box<dyn CounterattackHook>,
}

impl CombatResolver {
    pub fn new(store: Arc<WorldStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            sink,
            counter: Box::new(NoCounterattack),
        }
    }

    pub fn with_counterattack(mut self, hook: impl CounterattackHook + 'static) -> Self {
        self.counter = Box::new(hook);
        self
    }

    pub fn resolve(
        &self,
        source: &mut Combatant,
        target: &mut Combatant,
        attack: &ResolvedAttack,
    ) -> CombatOutcome {
        self.resolve_at(source, target, attack, unix_now())
    }

    /// Resolve one attack, persisting the target and emitting exactly one event.
    pub fn resolve_at(
        &self,
        source: &mut Combatant,
        target: &mut Combatant,
        attack: &ResolvedAttack,
        now: i64,
    ) -> CombatOutcome {
        self.resolve_inner(source, target, attack, now, true)
    }

    fn resolve_inner(
        &self,
        source: &mut Combatant,
        target: &mut Combatant,
        attack: &ResolvedAttack,
        now: i64,
        allow_counter: bool,
    ) -> CombatOutcome {
        if target.hp() == 0 {
            return CombatOutcome::NoTarget;
        }
        let location = target.position();
        let mut rng = rand::thread_rng();

        if rng.gen_range(0..100) >= attack.accuracy as u32 {
            self.sink.emit(
                location,
                &format!(
                    "{} attacks {} with {}, but misses.",
                    source.name(),
                    target.name(),
                    attack.name
                ),
            );
            return CombatOutcome::Missed;
        }

        let mut damage = apply_defense(attack.stats, target.stat_points()).damage();
        if attack.trample > 0 {
            damage += rng.gen_range(0..=attack.trample);
        }
        let source_name = source.name().to_string();
        let target_name = target.name().to_string();
        debug!(
            "{} -> {} with {}: {} damage",
            source_name, target_name, attack.name, damage
        );

        match &mut *target {
            Combatant::User(user) => {
                let counter = if allow_counter {
                    self.counter
                        .counterattack(&Combatant::User(user.clone()), source, attack)
                } else {
                    None
                };
                // User HP only moves when the counter hook fires.
                let Some(counter) = counter else {
                    self.sink.emit(
                        location,
                        &format!(
                            "{} hits {} with {} for {} damage.",
                            source_name, target_name, attack.name, damage
                        ),
                    );
                    return CombatOutcome::Hit { damage };
                };
                user.hp = user.hp.saturating_sub(damage);
                self.store.put_user(user);
                if user.hp == 0 {
                    self.sink.emit(
                        location,
                        &format!(
                            "{} strikes down {} with {}!",
                            source_name, target_name, attack.name
                        ),
                    );
                    return CombatOutcome::Killed { damage };
                }
                self.sink.emit(
                    location,
                    &format!(
                        "{} hits {} with {} for {} damage, and {} counters with {}!",
                        source_name, target_name, attack.name, damage, target_name, counter.name
                    ),
                );
                let outcome = self.resolve_inner(target, source, &counter, now, false);
                CombatOutcome::Countered {
                    damage,
                    counter: Box::new(outcome),
                }
            }
            Combatant::Creature(creature) => {
                creature.hp = creature.hp.saturating_sub(damage);
                // Reaped while this combatant was held.
                if !self.store.put_creature(creature) {
                    return CombatOutcome::NoTarget;
                }
                if creature.hp > 0 {
                    self.sink.emit(
                        location,
                        &format!(
                            "{} hits {} with {} for {} damage.",
                            source_name, target_name, attack.name, damage
                        ),
                    );
                    return CombatOutcome::Hit { damage };
                }
                self.on_creature_death(creature, now);
                self.sink.emit(
                    location,
                    &format!("{} kills {} with {}!", source_name, target_name, attack.name),
                );
                CombatOutcome::Killed { damage }
            }
        }
    }

    /// Roll drops into the cell and reward every online user standing in it.
    fn on_creature_death(&self, creature: &CreatureRecord, now: i64) {
        let catalog = self.store.catalog();
        let Some(kind) = catalog.creature_type(&creature.creature_type_id) else {
            return;
        };
        let mut rng = rand::thread_rng();
        let owner = InventoryOwner::Cell(creature.position);
        for drop in &kind.drops {
            let Some(item_type) = catalog.item_type(&drop.id) else {
                continue;
            };
            for _ in 0..drop.roll(&mut rng) {
                self.store.add_inventory_item(&owner, &item_type.instantiate());
            }
        }

        let reward = if creature.max_charge > 0 {
            creature.max_charge
        } else {
            catalog.creature_max_charge(kind)
        };
        for mut user in self.store.online_users_in_cell_at(creature.position, now) {
            user.xp += reward;
            self.store.put_user(&user);
            self.sink
                .notify(&user.username, &format!("You gain {} XP.", reward));
        }
    }
}

//! Attack bonus expressions.
//!
//! An expression is a `;`-separated list of clauses. Each clause starts with an
//! optional target field tag followed by one or more signed tokens:
//!
//! ```text
//! AP+50%MP-1      AP gains half the source's MP, minus one
//! MP+10%          MP gains 10% of the source's MP
//! RP+AP           RP gains the source's AP
//! +1              AP, RP and MP each gain one
//! ```
//!
//! Tokens have the shape `(+|-)N(%?)(FIELD?)` where FIELD is one of
//! `HP`, `AP`, `RP`, `MP`, `TP`. Malformed tokens are logged and skipped; the rest
//! of the expression is still applied.

use log::warn;

use crate::world::types::StatPoints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusField {
    Hp,
    Ap,
    Rp,
    Mp,
    /// Trample
    Tp,
}

impl BonusField {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "HP" => Some(BonusField::Hp),
            "AP" => Some(BonusField::Ap),
            "RP" => Some(BonusField::Rp),
            "MP" => Some(BonusField::Mp),
            "TP" => Some(BonusField::Tp),
            _ => None,
        }
    }
}

/// Signed working copy of the fields a bonus can read or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatBlock {
    pub hp: i64,
    pub ap: i64,
    pub rp: i64,
    pub mp: i64,
    pub tp: i64,
}

impl StatBlock {
    pub fn from_attack(stats: StatPoints, trample: u64) -> Self {
        Self {
            hp: 0,
            ap: stats.ap as i64,
            rp: stats.rp as i64,
            mp: stats.mp as i64,
            tp: trample as i64,
        }
    }

    pub fn from_actor(hp: u64, stats: StatPoints) -> Self {
        Self {
            hp: hp as i64,
            ap: stats.ap as i64,
            rp: stats.rp as i64,
            mp: stats.mp as i64,
            tp: 0,
        }
    }

    pub fn get(&self, field: BonusField) -> i64 {
        match field {
            BonusField::Hp => self.hp,
            BonusField::Ap => self.ap,
            BonusField::Rp => self.rp,
            BonusField::Mp => self.mp,
            BonusField::Tp => self.tp,
        }
    }

    fn get_mut(&mut self, field: BonusField) -> &mut i64 {
        match field {
            BonusField::Hp => &mut self.hp,
            BonusField::Ap => &mut self.ap,
            BonusField::Rp => &mut self.rp,
            BonusField::Mp => &mut self.mp,
            BonusField::Tp => &mut self.tp,
        }
    }

    /// Combat components, negatives floored at zero.
    pub fn stat_points(&self) -> StatPoints {
        StatPoints::new(
            self.ap.max(0) as u64,
            self.rp.max(0) as u64,
            self.mp.max(0) as u64,
        )
    }

    pub fn trample(&self) -> u64 {
        self.tp.max(0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Percent {
        sign: i64,
        amount: i64,
        field: Option<BonusField>,
    },
    Literal {
        sign: i64,
        amount: i64,
    },
    Copy {
        sign: i64,
        field: BonusField,
    },
}

fn parse_token(raw: &str) -> Option<Token> {
    let mut chars = raw.chars();
    let sign = match chars.next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let rest = chars.as_str();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, rest) = rest.split_at(digits_end);
    let (percent, rest) = match rest.strip_prefix('%') {
        Some(after) => (true, after),
        None => (false, rest),
    };
    let field = if rest.is_empty() {
        None
    } else {
        Some(BonusField::parse(rest)?)
    };
    let amount = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<i64>().ok()?)
    };

    match (amount, percent, field) {
        (Some(amount), true, field) => Some(Token::Percent { sign, amount, field }),
        (Some(amount), false, _) => Some(Token::Literal { sign, amount }),
        (None, false, Some(field)) => Some(Token::Copy { sign, field }),
        _ => None,
    }
}

/// Split `AP+5-10%MP` into its leading tag and signed token strings.
fn split_clause(clause: &str) -> (&str, Vec<&str>) {
    let first_sign = clause.find(['+', '-']).unwrap_or(clause.len());
    let (tag, mut rest) = clause.split_at(first_sign);
    let mut tokens = Vec::new();
    while !rest.is_empty() {
        let next = rest[1..]
            .find(['+', '-'])
            .map(|i| i + 1)
            .unwrap_or(rest.len());
        let (token, tail) = rest.split_at(next);
        tokens.push(token);
        rest = tail;
    }
    (tag.trim(), tokens)
}

/// Apply one token to every target field, or to none of them if any sum overflows.
fn apply_token(
    token: Token,
    targets: &[BonusField],
    source: &StatBlock,
    target: &mut StatBlock,
) -> Option<()> {
    let mut updated = *target;
    for &field in targets {
        let delta = match token {
            Token::Percent {
                sign,
                amount,
                field: from,
            } => source
                .get(from.unwrap_or(field))
                .checked_mul(amount)
                .map(|scaled| scaled / 100)
                .and_then(|part| part.checked_mul(sign))?,
            Token::Literal { sign, amount } => amount.checked_mul(sign)?,
            Token::Copy { sign, field: from } => source.get(from).checked_mul(sign)?,
        };
        let slot = updated.get_mut(field);
        *slot = slot.checked_add(delta)?;
    }
    *target = updated;
    Some(())
}

/// Apply `expr` to `target`, reading source values from `source`.
pub fn apply_bonuses(expr: &str, source: &StatBlock, target: &mut StatBlock) {
    const UNTAGGED: [BonusField; 3] = [BonusField::Ap, BonusField::Rp, BonusField::Mp];

    for clause in expr.split(';') {
        let compact: String = clause
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        if compact.is_empty() {
            continue;
        }
        let (tag, tokens) = split_clause(&compact);
        let single;
        let targets: &[BonusField] = if tag.is_empty() {
            &UNTAGGED
        } else {
            match BonusField::parse(tag) {
                Some(field) => {
                    single = [field];
                    &single
                }
                None => {
                    warn!("bonus clause {:?} has unknown target {:?}; skipped", clause, tag);
                    continue;
                }
            }
        };
        for raw in tokens {
            match parse_token(raw) {
                Some(token) => {
                    if apply_token(token, targets, source, target).is_none() {
                        warn!("bonus token {:?} in clause {:?} overflows; skipped", raw, clause);
                    }
                }
                None => warn!("bonus token {:?} in clause {:?} is malformed; skipped", raw, clause),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> StatBlock {
        StatBlock {
            hp: 20,
            ap: 10,
            rp: 4,
            mp: 7,
            tp: 0,
        }
    }

    fn run(expr: &str) -> StatBlock {
        let mut target = StatBlock::from_attack(StatPoints::new(2, 1, 0), 1);
        apply_bonuses(expr, &source(), &mut target);
        target
    }

    #[test]
    fn percentage_of_named_and_default_field() {
        let t = run("AP+50%MP");
        assert_eq!(t.ap, 2 + 3); // 50% of 7 truncates to 3
        let t = run("AP+50%");
        assert_eq!(t.ap, 2 + 5);
        let t = run("RP-25%HP");
        assert_eq!(t.rp, 1 - 5);
    }

    #[test]
    fn literal_and_copy_tokens() {
        let t = run("TP+3");
        assert_eq!(t.tp, 4);
        let t = run("MP+AP-RP");
        assert_eq!(t.mp, 10 - 4);
    }

    #[test]
    fn untagged_clause_hits_all_components() {
        let t = run("+1");
        assert_eq!((t.ap, t.rp, t.mp), (3, 2, 1));
        assert_eq!(t.tp, 1);
    }

    #[test]
    fn multiple_clauses_and_whitespace() {
        let t = run(" ap + 1 ; mp +10%hp ");
        assert_eq!(t.ap, 3);
        assert_eq!(t.mp, 2);
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let t = run("AP+1+%+XX+2;ZZ+5;MP+1");
        // +1 and +2 apply, +% and +XX are dropped, ZZ clause skipped entirely
        assert_eq!(t.ap, 5);
        assert_eq!(t.mp, 1);
        assert_eq!(t.rp, 1);
    }

    #[test]
    fn overflowing_tokens_are_skipped() {
        let t = run("AP+9223372036854775807%AP");
        assert_eq!(t.ap, 2);
        let t = run("AP+9223372036854775807");
        assert_eq!(t.ap, 2);
        let t = run("AP-9223372036854775807-9223372036854775807+1");
        assert_eq!(t.ap, 2 - 9223372036854775807 + 1);

        // An untagged token that overflows one field leaves all three untouched.
        let t = run("+9223372036854775806;RP+1");
        assert_eq!((t.ap, t.rp, t.mp), (2, 2, 0));
    }

    #[test]
    fn negative_results_floor_in_stat_points() {
        let t = run("AP-100");
        assert_eq!(t.stat_points().ap, 0);
    }
}

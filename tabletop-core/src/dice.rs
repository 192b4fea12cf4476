//! Dice notation parsing and rolling.
//!
//! Supports standard notation (`XdY+Z`), multi-term formulas (`1d6+1d4+3`),
//! keep highest/lowest (`4d6kh3`), percentile dice, and roll options for
//! advantage, exploding dice and rerolls.
//!
//! Grammar (whitespace ignored, case-insensitive):
//!
//! ```text
//! formula := term (sign term)*
//! term    := dice | integer
//! dice    := [count] 'd' sides [keep]
//! keep    := ('kh' | 'kl') integer
//! sign    := '+' | '-'
//! ```
//!
//! The first term may carry a leading sign. At least one dice term is required.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Die size reserved for percentile rolls.
pub const PERCENTILE_SIDES: u32 = 100;

/// Upper bound on dice in a single term.
pub const MAX_DICE_PER_TERM: u32 = 1000;

/// Largest die the parser accepts.
pub const MAX_DIE_SIDES: u32 = 10_000;

/// Default cap on extra faces rolled by one exploding die.
pub const DEFAULT_MAX_EXPLOSIONS: u32 = 100;

/// Error type for dice notation parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty dice notation")]
    Empty,
    #[error("Unexpected token '{token}' in '{notation}'")]
    UnexpectedToken { token: String, notation: String },
    #[error("Invalid die size {sides} in '{token}'")]
    InvalidDieSize { sides: u32, token: String },
    #[error("Dice and keep counts must be at least 1 in '{0}'")]
    ZeroCount(String),
    #[error("Cannot keep {keep} dice when only rolling {count} (in '{token}')")]
    InvalidKeepCount { keep: u32, count: u32, token: String },
    #[error("Too many dice in '{0}'")]
    TooManyDice(String),
    #[error("Number out of range: '{0}'")]
    NumberOutOfRange(String),
    #[error("No dice in notation '{0}'")]
    NoDice(String),
}

/// A source of die faces.
///
/// Any [`rand::Rng`] is a `DieRoller`; tests swap in a scripted source.
pub trait DieRoller {
    /// Return a uniform value in `1..=sides`.
    fn roll_die(&mut self, sides: u32) -> u32;
}

impl<R: Rng + ?Sized> DieRoller for R {
    fn roll_die(&mut self, sides: u32) -> u32 {
        if sides == 0 {
            return 0;
        }
        self.gen_range(1..=sides)
    }
}

/// Draw one face of a die, modelling d100 as two d10s (tens and ones).
///
/// A zero-sided die always shows 0.
fn draw<R: DieRoller + ?Sized>(roller: &mut R, sides: u32) -> u32 {
    if sides == 0 {
        0
    } else if sides == PERCENTILE_SIDES {
        let tens = roller.roll_die(10).clamp(1, 10) - 1;
        let ones = roller.roll_die(10).clamp(1, 10) - 1;
        match tens * 10 + ones {
            0 => 100,
            value => value,
        }
    } else {
        roller.roll_die(sides).clamp(1, sides)
    }
}

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }

    /// Build from the pair of flags a client sends; both set cancels out.
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Advantage {
        match (advantage, disadvantage) {
            (true, false) => Advantage::Advantage,
            (false, true) => Advantage::Disadvantage,
            _ => Advantage::Normal,
        }
    }
}

/// Which dice of a term survive trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keep {
    Highest(u32),
    Lowest(u32),
}

impl Keep {
    pub fn count(&self) -> u32 {
        match self {
            Keep::Highest(n) | Keep::Lowest(n) => *n,
        }
    }
}

/// A single dice term of a formula, e.g. `4d6kh3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiceTerm {
    pub count: u32,
    pub sides: u32,
    pub keep: Option<Keep>,
    /// Subtracted from the total instead of added.
    #[serde(default)]
    pub negative: bool,
}

impl DiceTerm {
    pub fn new(count: u32, sides: u32) -> Self {
        Self {
            count,
            sides,
            keep: None,
            negative: false,
        }
    }

    pub fn keep_highest(mut self, keep: u32) -> Self {
        self.keep = Some(Keep::Highest(keep));
        self
    }

    pub fn keep_lowest(mut self, keep: u32) -> Self {
        self.keep = Some(Keep::Lowest(keep));
        self
    }

    /// Number of dice that contribute to the total.
    pub fn kept_count(&self) -> u32 {
        self.keep.map_or(self.count, |k| k.count().min(self.count))
    }
}

impl fmt::Display for DiceTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.keep {
            Some(Keep::Highest(n)) => write!(f, "kh{n}"),
            Some(Keep::Lowest(n)) => write!(f, "kl{n}"),
            None => Ok(()),
        }
    }
}

/// A parsed dice formula (e.g., `2d6+3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiceFormula {
    pub terms: Vec<DiceTerm>,
    pub modifier: i32,
}

impl DiceFormula {
    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, ParseError> {
        Parser::new(notation)?.parse()
    }

    /// A single-term formula `NdS+M`.
    pub fn single(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            terms: vec![DiceTerm::new(count, sides)],
            modifier,
        }
    }

    /// `1d20` plus a modifier.
    pub fn d20(modifier: i32) -> Self {
        Self::single(1, 20, modifier)
    }

    /// True when the pool reduces to exactly one d20.
    pub fn is_single_d20(&self) -> bool {
        matches!(
            self.terms.as_slice(),
            [term] if term.sides == 20 && !term.negative && term.kept_count() == 1
        )
    }

    /// The same formula with every dice count doubled; the flat modifier is untouched.
    ///
    /// Used for critical damage.
    pub fn doubled_dice(&self) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .map(|term| DiceTerm {
                    count: term.count.saturating_mul(2),
                    keep: term.keep.map(|k| match k {
                        Keep::Highest(n) => Keep::Highest(n.saturating_mul(2)),
                        Keep::Lowest(n) => Keep::Lowest(n.saturating_mul(2)),
                    }),
                    ..term.clone()
                })
                .collect(),
            modifier: self.modifier,
        }
    }

    /// Roll the formula with default options and the thread RNG.
    pub fn roll(&self) -> RollOutcome {
        self.roll_with(&RollOptions::default(), &mut rand::thread_rng())
    }

    /// Roll with explicit options and random source.
    pub fn roll_with<R: DieRoller + ?Sized>(
        &self,
        options: &RollOptions,
        roller: &mut R,
    ) -> RollOutcome {
        let collapse = options.advantage != Advantage::Normal && self.is_single_d20();

        let pool = if collapse {
            let first = self.roll_pool(options, roller);
            let second = self.roll_pool(options, roller);
            let first_wins = match options.advantage {
                Advantage::Advantage => first.dice_total >= second.dice_total,
                _ => first.dice_total <= second.dice_total,
            };
            let (mut chosen, other) = if first_wins {
                (first, second)
            } else {
                (second, first)
            };
            chosen.dropped.extend(other.kept);
            chosen.dropped.extend(other.dropped);
            chosen
        } else {
            self.roll_pool(options, roller)
        };

        let natural = if self.is_single_d20() {
            pool.natural_d20
        } else {
            None
        };

        RollOutcome {
            notation: self.to_string(),
            dice: pool.kept,
            dropped: pool.dropped,
            modifier: self.modifier,
            total: saturate(pool.dice_total.saturating_add(i64::from(self.modifier))),
            is_critical: natural.is_some_and(|n| n >= options.critical_threshold),
            is_fumble: natural == Some(1),
        }
    }

    fn roll_pool<R: DieRoller + ?Sized>(&self, options: &RollOptions, roller: &mut R) -> Pool {
        let mut pool = Pool::default();

        for term in &self.terms {
            let mut rolled: Vec<(u32, u32)> = (0..term.count)
                .map(|_| roll_one(term.sides, options, roller))
                .collect();

            let kept_indices = kept_indices(&rolled, term.keep);
            for (i, (value, natural)) in rolled.drain(..).enumerate() {
                if kept_indices.contains(&i) {
                    let signed = i64::from(value);
                    pool.dice_total = pool
                        .dice_total
                        .saturating_add(if term.negative { -signed } else { signed });
                    if term.sides == 20 {
                        pool.natural_d20 = Some(natural);
                    }
                    pool.kept.push(value);
                } else {
                    pool.dropped.push(value);
                }
            }
        }

        pool
    }
}

#[derive(Debug, Default)]
struct Pool {
    kept: Vec<u32>,
    dropped: Vec<u32>,
    dice_total: i64,
    natural_d20: Option<u32>,
}

/// Clamp a pool sum into the `i32` total reported to callers.
fn saturate(total: i64) -> i32 {
    i32::try_from(total).unwrap_or(if total < 0 { i32::MIN } else { i32::MAX })
}

/// Roll one die through the reroll and explode stages; returns (value, natural face).
fn roll_one<R: DieRoller + ?Sized>(sides: u32, options: &RollOptions, roller: &mut R) -> (u32, u32) {
    let mut face = draw(roller, sides);
    if options.rerolls(face) {
        face = draw(roller, sides);
    }

    let mut value = face;
    if options.exploding && sides > 0 {
        let mut last = face;
        let mut explosions = 0;
        while last == sides && explosions < options.max_explosions {
            last = draw(roller, sides);
            value = value.saturating_add(last);
            explosions += 1;
        }
    }

    (value, face)
}

/// Indices of the dice that survive keep trimming, in roll order.
fn kept_indices(rolled: &[(u32, u32)], keep: Option<Keep>) -> BTreeSet<usize> {
    let mut order: Vec<usize> = (0..rolled.len()).collect();
    let n = match keep {
        None => return order.into_iter().collect(),
        Some(Keep::Highest(n)) => {
            order.sort_by(|&a, &b| rolled[b].0.cmp(&rolled[a].0).then(a.cmp(&b)));
            n
        }
        Some(Keep::Lowest(n)) => {
            order.sort_by(|&a, &b| rolled[a].0.cmp(&rolled[b].0).then(a.cmp(&b)));
            n
        }
    };
    order.truncate(n as usize);
    order.into_iter().collect()
}

impl FromStr for DiceFormula {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceFormula::parse(s)
    }
}

impl fmt::Display for DiceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            match (i, term.negative) {
                (_, true) => write!(f, "-")?,
                (0, false) => {}
                (_, false) => write!(f, "+")?,
            }
            write!(f, "{term}")?;
        }
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Number,
    D,
    KeepHighest,
    KeepLowest,
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

struct Parser {
    source: String,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(notation: &str) -> Result<Self, ParseError> {
        let source = notation.trim().to_lowercase();
        if source.is_empty() {
            return Err(ParseError::Empty);
        }
        let tokens = Self::lex(&source)?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
        })
    }

    fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
        let bytes = source.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let start = i;
            let kind = match bytes[i] {
                b if b.is_ascii_whitespace() => {
                    i += 1;
                    continue;
                }
                b'0'..=b'9' => {
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    tokens.push(Token {
                        kind: TokenKind::Number,
                        start,
                        end: i,
                    });
                    continue;
                }
                b'd' => TokenKind::D,
                b'+' => TokenKind::Plus,
                b'-' => TokenKind::Minus,
                b'k' if bytes.get(i + 1) == Some(&b'h') => {
                    i += 1;
                    TokenKind::KeepHighest
                }
                b'k' if bytes.get(i + 1) == Some(&b'l') => {
                    i += 1;
                    TokenKind::KeepLowest
                }
                _ => {
                    let token: String = source[start..].chars().take(1).collect();
                    return Err(ParseError::UnexpectedToken {
                        token,
                        notation: source.to_string(),
                    });
                }
            };
            i += 1;
            tokens.push(Token {
                kind,
                start,
                end: i,
            });
        }

        Ok(tokens)
    }

    fn parse(mut self) -> Result<DiceFormula, ParseError> {
        let mut terms = Vec::new();
        let mut modifier: i32 = 0;
        let mut first = true;

        while self.pos < self.tokens.len() || first {
            let negative = match self.peek_kind() {
                Some(TokenKind::Plus) => {
                    self.pos += 1;
                    false
                }
                Some(TokenKind::Minus) => {
                    self.pos += 1;
                    true
                }
                _ if first => false,
                _ => return Err(self.unexpected()),
            };
            first = false;

            match self.term(negative)? {
                Term::Dice(term) => terms.push(term),
                Term::Constant(value, text) => {
                    let signed = if negative { -value } else { value };
                    modifier = modifier
                        .checked_add(signed)
                        .ok_or(ParseError::NumberOutOfRange(text))?;
                }
            }
        }

        if terms.is_empty() {
            return Err(ParseError::NoDice(self.source));
        }

        Ok(DiceFormula { terms, modifier })
    }

    fn term(&mut self, negative: bool) -> Result<Term, ParseError> {
        let start = self.tokens.get(self.pos).map_or(self.source.len(), |t| t.start);

        let count = match self.peek_kind() {
            Some(TokenKind::Number) => Some(self.number()?),
            Some(TokenKind::D) => None,
            _ => return Err(self.unexpected()),
        };

        if self.peek_kind() != Some(TokenKind::D) {
            let text = self.text_from(start);
            let value = count.unwrap_or_default();
            let value = i32::try_from(value).map_err(|_| ParseError::NumberOutOfRange(text.clone()))?;
            return Ok(Term::Constant(value, text));
        }
        self.pos += 1;

        if self.peek_kind() != Some(TokenKind::Number) {
            return Err(self.unexpected());
        }
        let sides = self.number()?;

        let keep = match self.peek_kind() {
            Some(TokenKind::KeepHighest) => {
                self.pos += 1;
                Some(Keep::Highest(self.keep_number()?))
            }
            Some(TokenKind::KeepLowest) => {
                self.pos += 1;
                Some(Keep::Lowest(self.keep_number()?))
            }
            _ => None,
        };

        let text = self.text_from(start);
        let count = count.unwrap_or(1);

        if !(2..=MAX_DIE_SIDES).contains(&sides) {
            return Err(ParseError::InvalidDieSize { sides, token: text });
        }
        if count == 0 || keep.is_some_and(|k| k.count() == 0) {
            return Err(ParseError::ZeroCount(text));
        }
        if count > MAX_DICE_PER_TERM {
            return Err(ParseError::TooManyDice(text));
        }
        if let Some(k) = keep {
            if k.count() > count {
                return Err(ParseError::InvalidKeepCount {
                    keep: k.count(),
                    count,
                    token: text,
                });
            }
        }

        Ok(Term::Dice(DiceTerm {
            count,
            sides,
            keep,
            negative,
        }))
    }

    fn keep_number(&mut self) -> Result<u32, ParseError> {
        if self.peek_kind() != Some(TokenKind::Number) {
            return Err(self.unexpected());
        }
        self.number()
    }

    fn number(&mut self) -> Result<u32, ParseError> {
        let token = self.tokens[self.pos];
        self.pos += 1;
        let text = &self.source[token.start..token.end];
        text.parse()
            .map_err(|_| ParseError::NumberOutOfRange(text.to_string()))
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn text_from(&self, start: usize) -> String {
        let end = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map_or(start, |t| t.end)
            .max(start);
        self.source[start..end].to_string()
    }

    fn unexpected(&self) -> ParseError {
        let token = match self.tokens.get(self.pos) {
            Some(t) => self.source[t.start..t.end].to_string(),
            None => "end of input".to_string(),
        };
        ParseError::UnexpectedToken {
            token,
            notation: self.source.clone(),
        }
    }
}

enum Term {
    Dice(DiceTerm),
    Constant(i32, String),
}

// ============================================================================
// Roll options and outcomes
// ============================================================================

/// Options applied while rolling a formula.
///
/// Application order: rerolls, explosions, keep trimming, advantage, then
/// summation with the modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollOptions {
    pub advantage: Advantage,
    pub exploding: bool,
    pub reroll_ones: bool,
    /// Faces that are re-rolled exactly once.
    pub reroll_once: BTreeSet<u32>,
    pub critical_threshold: u32,
    pub max_explosions: u32,
}

impl Default for RollOptions {
    fn default() -> Self {
        Self {
            advantage: Advantage::Normal,
            exploding: false,
            reroll_ones: false,
            reroll_once: BTreeSet::new(),
            critical_threshold: 20,
            max_explosions: DEFAULT_MAX_EXPLOSIONS,
        }
    }
}

impl RollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_advantage(mut self) -> Self {
        self.advantage = self.advantage.combine(Advantage::Advantage);
        self
    }

    pub fn with_disadvantage(mut self) -> Self {
        self.advantage = self.advantage.combine(Advantage::Disadvantage);
        self
    }

    pub fn exploding(mut self) -> Self {
        self.exploding = true;
        self
    }

    pub fn reroll_ones(mut self) -> Self {
        self.reroll_ones = true;
        self
    }

    pub fn reroll_once(mut self, faces: impl IntoIterator<Item = u32>) -> Self {
        self.reroll_once.extend(faces);
        self
    }

    pub fn critical_threshold(mut self, threshold: u32) -> Self {
        self.critical_threshold = threshold;
        self
    }

    /// Apply engine limits: the lower critical threshold and explosion cap win.
    pub fn within(mut self, limits: &RollOptions) -> Self {
        self.critical_threshold = self.critical_threshold.min(limits.critical_threshold);
        self.max_explosions = self.max_explosions.min(limits.max_explosions);
        self
    }

    fn rerolls(&self, face: u32) -> bool {
        (self.reroll_ones && face == 1) || self.reroll_once.contains(&face)
    }
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub notation: String,
    /// Kept dice, in roll order.
    pub dice: Vec<u32>,
    pub dropped: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub is_critical: bool,
    pub is_fumble: bool,
}

impl RollOutcome {
    /// Chat-feed summary: `1d20+5: [17] +5 = **22**`.
    pub fn summary(&self) -> String {
        let dice = self
            .dice
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match self.modifier {
            0 => format!("{}: [{}] = **{}**", self.notation, dice, self.total),
            m if m > 0 => format!("{}: [{}] +{} = **{}**", self.notation, dice, m, self.total),
            m => format!("{}: [{}] {} = **{}**", self.notation, dice, m, self.total),
        }
    }

    /// Check if the roll meets or exceeds a DC.
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }
}

impl fmt::Display for RollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

// ============================================================================
// Convenience rolls
// ============================================================================

/// Roll dice from a notation string with the thread RNG.
pub fn roll(notation: &str) -> Result<RollOutcome, ParseError> {
    Ok(DiceFormula::parse(notation)?.roll())
}

/// Parse and roll with explicit options and random source.
pub fn roll_with_options<R: DieRoller + ?Sized>(
    notation: &str,
    options: &RollOptions,
    roller: &mut R,
) -> Result<RollOutcome, ParseError> {
    Ok(DiceFormula::parse(notation)?.roll_with(options, roller))
}

/// d20 + ability modifier.
pub fn roll_ability_check<R: DieRoller + ?Sized>(
    modifier: i32,
    options: &RollOptions,
    roller: &mut R,
) -> RollOutcome {
    DiceFormula::d20(modifier).roll_with(options, roller)
}

/// d20 + attack bonus; `is_critical` marks a hit at or above the threshold.
pub fn roll_attack<R: DieRoller + ?Sized>(
    attack_bonus: i32,
    options: &RollOptions,
    roller: &mut R,
) -> RollOutcome {
    DiceFormula::d20(attack_bonus).roll_with(options, roller)
}

/// d20 + saving throw bonus.
pub fn roll_saving_throw<R: DieRoller + ?Sized>(
    save_bonus: i32,
    options: &RollOptions,
    roller: &mut R,
) -> RollOutcome {
    DiceFormula::d20(save_bonus).roll_with(options, roller)
}

/// Roll damage; a critical hit doubles the dice but not the modifier.
pub fn roll_damage<R: DieRoller + ?Sized>(
    formula: &DiceFormula,
    critical: bool,
    options: &RollOptions,
    roller: &mut R,
) -> RollOutcome {
    let options = RollOptions {
        advantage: Advantage::Normal,
        ..options.clone()
    };
    let mut outcome = if critical {
        formula.doubled_dice().roll_with(&options, roller)
    } else {
        formula.roll_with(&options, roller)
    };
    outcome.is_critical = critical;
    outcome.is_fumble = false;
    outcome
}

/// Roll 4d6 and keep the highest three.
pub fn roll_ability_score<R: DieRoller + ?Sized>(roller: &mut R) -> RollOutcome {
    DiceFormula {
        terms: vec![DiceTerm::new(4, 6).keep_highest(3)],
        modifier: 0,
    }
    .roll_with(&RollOptions::default(), roller)
}

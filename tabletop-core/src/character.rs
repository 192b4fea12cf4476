//! Character snapshot types consumed by the statistics calculator.
//!
//! A [`CharacterSnapshot`] is a read-only copy of what the external character
//! store holds: ability scores, class levels, armor, spellcasting ability and
//! proficiencies. The engine never owns a character's lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Lowest legal ability score.
pub const MIN_ABILITY_SCORE: i32 = 1;
/// Highest legal ability score.
pub const MAX_ABILITY_SCORE: i32 = 30;

/// Errors from character data validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("{ability} score {value} is outside 1..=30")]
    OutOfRange { ability: Ability, value: i32 },
    #[error("Unknown name: {0}")]
    UnknownName(String),
}

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase and strip separators so "Sleight of Hand", "sleight_of_hand"
/// and "SleightOfHand" all match.
fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Ability Scores
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

impl FromStr for Ability {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_name(s);
        Ability::all()
            .into_iter()
            .find(|a| normalize_name(a.name()) == wanted || normalize_name(a.abbreviation()) == wanted)
            .ok_or_else(|| ScoreError::UnknownName(s.to_string()))
    }
}

/// Ability scores container.
///
/// Every score stays within `1..=30`; the only way to change one is
/// [`AbilityScores::set`], which validates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAbilityScores", into = "RawAbilityScores")]
pub struct AbilityScores {
    strength: i32,
    dexterity: i32,
    constitution: i32,
    intelligence: i32,
    wisdom: i32,
    charisma: i32,
}

/// Unvalidated wire form of [`AbilityScores`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAbilityScores {
    strength: i32,
    dexterity: i32,
    constitution: i32,
    intelligence: i32,
    wisdom: i32,
    charisma: i32,
}

impl TryFrom<RawAbilityScores> for AbilityScores {
    type Error = ScoreError;

    fn try_from(raw: RawAbilityScores) -> Result<Self, Self::Error> {
        AbilityScores::new(
            raw.strength,
            raw.dexterity,
            raw.constitution,
            raw.intelligence,
            raw.wisdom,
            raw.charisma,
        )
    }
}

impl From<AbilityScores> for RawAbilityScores {
    fn from(scores: AbilityScores) -> Self {
        Self {
            strength: scores.strength,
            dexterity: scores.dexterity,
            constitution: scores.constitution,
            intelligence: scores.intelligence,
            wisdom: scores.wisdom,
            charisma: scores.charisma,
        }
    }
}

impl AbilityScores {
    pub fn new(str: i32, dex: i32, con: i32, int: i32, wis: i32, cha: i32) -> Result<Self, ScoreError> {
        let mut scores = Self::default();
        for (ability, value) in Ability::all().into_iter().zip([str, dex, con, int, wis, cha]) {
            scores.set(ability, value)?;
        }
        Ok(scores)
    }

    pub fn standard_array() -> Self {
        Self {
            strength: 15,
            dexterity: 14,
            constitution: 13,
            intelligence: 12,
            wisdom: 10,
            charisma: 8,
        }
    }

    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    /// Update one score; rejects values outside `1..=30` without changing anything.
    pub fn set(&mut self, ability: Ability, value: i32) -> Result<(), ScoreError> {
        if !(MIN_ABILITY_SCORE..=MAX_ABILITY_SCORE).contains(&value) {
            return Err(ScoreError::OutOfRange { ability, value });
        }
        let slot = match ability {
            Ability::Strength => &mut self.strength,
            Ability::Dexterity => &mut self.dexterity,
            Ability::Constitution => &mut self.constitution,
            Ability::Intelligence => &mut self.intelligence,
            Ability::Wisdom => &mut self.wisdom,
            Ability::Charisma => &mut self.charisma,
        };
        *slot = value;
        Ok(())
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        crate::stats::ability_modifier(self.get(ability))
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

// ============================================================================
// Skills
// ============================================================================

/// D&D 5e skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

lazy_static::lazy_static! {
    static ref SKILLS_BY_NAME: HashMap<String, Skill> = Skill::all()
        .iter()
        .map(|skill| (normalize_name(skill.name()), *skill))
        .collect();

    static ref CLASSES_BY_NAME: HashMap<String, CharacterClass> = CharacterClass::all()
        .iter()
        .map(|class| (normalize_name(class.name()), *class))
        .collect();
}

impl Skill {
    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "Athletics",
            Skill::Acrobatics => "Acrobatics",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Arcana => "Arcana",
            Skill::History => "History",
            Skill::Investigation => "Investigation",
            Skill::Nature => "Nature",
            Skill::Religion => "Religion",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Insight => "Insight",
            Skill::Medicine => "Medicine",
            Skill::Perception => "Perception",
            Skill::Survival => "Survival",
            Skill::Deception => "Deception",
            Skill::Intimidation => "Intimidation",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
        }
    }

    pub fn all() -> &'static [Skill] {
        &[
            Skill::Athletics,
            Skill::Acrobatics,
            Skill::SleightOfHand,
            Skill::Stealth,
            Skill::Arcana,
            Skill::History,
            Skill::Investigation,
            Skill::Nature,
            Skill::Religion,
            Skill::AnimalHandling,
            Skill::Insight,
            Skill::Medicine,
            Skill::Perception,
            Skill::Survival,
            Skill::Deception,
            Skill::Intimidation,
            Skill::Performance,
            Skill::Persuasion,
        ]
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Skill {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SKILLS_BY_NAME
            .get(&normalize_name(s))
            .copied()
            .ok_or_else(|| ScoreError::UnknownName(s.to_string()))
    }
}

/// Proficiency level for skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProficiencyLevel {
    #[default]
    None,
    Proficient,
    /// Adds a second, full proficiency bonus on top of proficiency.
    Expertise,
}

impl ProficiencyLevel {
    pub fn bonus(&self, proficiency_bonus: i32) -> i32 {
        match self {
            ProficiencyLevel::None => 0,
            ProficiencyLevel::Proficient => proficiency_bonus,
            ProficiencyLevel::Expertise => proficiency_bonus + proficiency_bonus,
        }
    }
}

// ============================================================================
// Armor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArmorType {
    Light,
    Medium,
    Heavy,
}

impl ArmorType {
    /// Cap on the dexterity bonus this armor allows.
    pub fn max_dex_bonus(&self) -> Option<i32> {
        match self {
            ArmorType::Light => None,
            ArmorType::Medium => Some(2),
            ArmorType::Heavy => Some(0),
        }
    }
}

/// Armor class inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArmorClass {
    pub base: i32,
    pub armor_type: Option<ArmorType>,
    /// Overrides the cap implied by `armor_type`.
    #[serde(default)]
    pub max_dex_bonus: Option<i32>,
    /// Shields, rings, cover and other flat bonuses.
    #[serde(default)]
    pub flat_bonus: i32,
}

impl ArmorClass {
    pub fn unarmored() -> Self {
        Self {
            base: 10,
            armor_type: None,
            max_dex_bonus: None,
            flat_bonus: 0,
        }
    }

    pub fn armor(base: i32, armor_type: ArmorType) -> Self {
        Self {
            base,
            armor_type: Some(armor_type),
            max_dex_bonus: None,
            flat_bonus: 0,
        }
    }

    pub fn with_bonus(mut self, bonus: i32) -> Self {
        self.flat_bonus += bonus;
        self
    }

    pub fn calculate(&self, dex_mod: i32) -> i32 {
        let cap = self
            .max_dex_bonus
            .or_else(|| self.armor_type.and_then(|t| t.max_dex_bonus()));
        let dex_bonus = cap.map_or(dex_mod, |cap| dex_mod.min(cap));
        self.base + dex_bonus + self.flat_bonus
    }
}

impl Default for ArmorClass {
    fn default() -> Self {
        Self::unarmored()
    }
}

// ============================================================================
// Classes
// ============================================================================

/// How a class contributes to multiclass spellcaster level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CasterProgression {
    None,
    Full,
    Half,
    Third,
    /// Warlock pact magic; tracked separately from shared slots.
    Pact,
}

/// D&D character classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterClass {
    Barbarian,
    Bard,
    Cleric,
    Druid,
    Fighter,
    Monk,
    Paladin,
    Ranger,
    Rogue,
    Sorcerer,
    Warlock,
    Wizard,
}

impl CharacterClass {
    /// Number of faces on the class hit die.
    pub fn hit_die(&self) -> u32 {
        match self {
            CharacterClass::Barbarian => 12,
            CharacterClass::Fighter | CharacterClass::Paladin | CharacterClass::Ranger => 10,
            CharacterClass::Bard
            | CharacterClass::Cleric
            | CharacterClass::Druid
            | CharacterClass::Monk
            | CharacterClass::Rogue
            | CharacterClass::Warlock => 8,
            CharacterClass::Sorcerer | CharacterClass::Wizard => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CharacterClass::Barbarian => "Barbarian",
            CharacterClass::Bard => "Bard",
            CharacterClass::Cleric => "Cleric",
            CharacterClass::Druid => "Druid",
            CharacterClass::Fighter => "Fighter",
            CharacterClass::Monk => "Monk",
            CharacterClass::Paladin => "Paladin",
            CharacterClass::Ranger => "Ranger",
            CharacterClass::Rogue => "Rogue",
            CharacterClass::Sorcerer => "Sorcerer",
            CharacterClass::Warlock => "Warlock",
            CharacterClass::Wizard => "Wizard",
        }
    }

    pub fn caster_progression(&self) -> CasterProgression {
        match self {
            CharacterClass::Bard
            | CharacterClass::Cleric
            | CharacterClass::Druid
            | CharacterClass::Sorcerer
            | CharacterClass::Wizard => CasterProgression::Full,
            CharacterClass::Paladin | CharacterClass::Ranger => CasterProgression::Half,
            CharacterClass::Warlock => CasterProgression::Pact,
            CharacterClass::Barbarian
            | CharacterClass::Fighter
            | CharacterClass::Monk
            | CharacterClass::Rogue => CasterProgression::None,
        }
    }

    pub fn spellcasting_ability(&self) -> Option<Ability> {
        match self {
            CharacterClass::Bard
            | CharacterClass::Paladin
            | CharacterClass::Sorcerer
            | CharacterClass::Warlock => Some(Ability::Charisma),
            CharacterClass::Cleric | CharacterClass::Druid | CharacterClass::Ranger => {
                Some(Ability::Wisdom)
            }
            CharacterClass::Wizard => Some(Ability::Intelligence),
            _ => None,
        }
    }

    pub fn all() -> &'static [CharacterClass] {
        &[
            CharacterClass::Barbarian,
            CharacterClass::Bard,
            CharacterClass::Cleric,
            CharacterClass::Druid,
            CharacterClass::Fighter,
            CharacterClass::Monk,
            CharacterClass::Paladin,
            CharacterClass::Ranger,
            CharacterClass::Rogue,
            CharacterClass::Sorcerer,
            CharacterClass::Warlock,
            CharacterClass::Wizard,
        ]
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CharacterClass {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CLASSES_BY_NAME
            .get(&normalize_name(s))
            .copied()
            .ok_or_else(|| ScoreError::UnknownName(s.to_string()))
    }
}

/// Levels held in one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassLevel {
    pub class: CharacterClass,
    pub level: u8,
    /// Subclasses such as Eldritch Knight turn a non-caster into a third caster.
    #[serde(default)]
    pub caster_override: Option<CasterProgression>,
}

impl ClassLevel {
    pub fn new(class: CharacterClass, level: u8) -> Self {
        Self {
            class,
            level,
            caster_override: None,
        }
    }

    pub fn progression(&self) -> CasterProgression {
        self.caster_override
            .unwrap_or_else(|| self.class.caster_progression())
    }
}

// ============================================================================
// Character snapshot
// ============================================================================

/// Read-only view of a stored character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub id: CharacterId,
    pub name: String,
    pub ability_scores: AbilityScores,
    /// The first entry is the starting class.
    pub classes: Vec<ClassLevel>,
    #[serde(default)]
    pub armor: ArmorClass,
    /// An AC already recorded on the character; used as a floor.
    #[serde(default)]
    pub armor_class: Option<i32>,
    #[serde(default)]
    pub spellcasting_ability: Option<Ability>,
    #[serde(default)]
    pub skill_proficiencies: BTreeMap<Skill, ProficiencyLevel>,
    #[serde(default)]
    pub saving_throw_proficiencies: BTreeSet<Ability>,
}

/// Every field the derived-statistics formulas read, plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    id: CharacterId,
    ability_scores: AbilityScores,
    classes: Vec<ClassLevel>,
    armor: ArmorClass,
    armor_class: Option<i32>,
    spellcasting_ability: Option<Ability>,
    skill_proficiencies: BTreeMap<Skill, ProficiencyLevel>,
    saving_throw_proficiencies: BTreeSet<Ability>,
}

impl CharacterSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            ability_scores: AbilityScores::default(),
            classes: Vec::new(),
            armor: ArmorClass::default(),
            armor_class: None,
            spellcasting_ability: None,
            skill_proficiencies: BTreeMap::new(),
            saving_throw_proficiencies: BTreeSet::new(),
        }
    }

    pub fn with_scores(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = scores;
        self
    }

    pub fn with_class(mut self, class: CharacterClass, level: u8) -> Self {
        self.classes.push(ClassLevel::new(class, level));
        self
    }

    pub fn with_class_level(mut self, class_level: ClassLevel) -> Self {
        self.classes.push(class_level);
        self
    }

    pub fn with_armor(mut self, armor: ArmorClass) -> Self {
        self.armor = armor;
        self
    }

    pub fn with_skill(mut self, skill: Skill, level: ProficiencyLevel) -> Self {
        self.skill_proficiencies.insert(skill, level);
        self
    }

    pub fn with_saving_throw(mut self, ability: Ability) -> Self {
        self.saving_throw_proficiencies.insert(ability);
        self
    }

    pub fn with_spellcasting(mut self, ability: Ability) -> Self {
        self.spellcasting_ability = Some(ability);
        self
    }

    /// The explicit score-update operation.
    pub fn set_ability_score(&mut self, ability: Ability, value: i32) -> Result<(), ScoreError> {
        self.ability_scores.set(ability, value)
    }

    /// Total character level across all classes (at least 1).
    pub fn total_level(&self) -> u32 {
        self.classes
            .iter()
            .map(|c| u32::from(c.level))
            .sum::<u32>()
            .max(1)
    }

    pub fn skill_proficiency(&self, skill: Skill) -> ProficiencyLevel {
        self.skill_proficiencies
            .get(&skill)
            .copied()
            .unwrap_or_default()
    }

    /// Explicit ability, else the starting class's default, else the first caster class.
    pub fn effective_spellcasting_ability(&self) -> Option<Ability> {
        self.spellcasting_ability.or_else(|| {
            self.classes
                .iter()
                .find_map(|c| c.class.spellcasting_ability())
        })
    }

    pub fn stats_key(&self) -> StatsKey {
        StatsKey {
            id: self.id,
            ability_scores: self.ability_scores.clone(),
            classes: self.classes.clone(),
            armor: self.armor.clone(),
            armor_class: self.armor_class,
            spellcasting_ability: self.spellcasting_ability,
            skill_proficiencies: self.skill_proficiencies.clone(),
            saving_throw_proficiencies: self.saving_throw_proficiencies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_reject_out_of_range() {
        let mut scores = AbilityScores::default();
        assert!(scores.set(Ability::Strength, 30).is_ok());
        assert_eq!(
            scores.set(Ability::Strength, 31),
            Err(ScoreError::OutOfRange {
                ability: Ability::Strength,
                value: 31
            })
        );
        assert!(scores.set(Ability::Wisdom, 0).is_err());
        assert_eq!(scores.get(Ability::Strength), 30);
        assert!(AbilityScores::new(10, 10, 10, 10, 10, 40).is_err());
    }

    #[test]
    fn test_scores_deserialize_validates() {
        let ok = r#"{"strength":8,"dexterity":14,"constitution":12,"intelligence":10,"wisdom":13,"charisma":15}"#;
        let scores: AbilityScores = serde_json::from_str(ok).unwrap();
        assert_eq!(scores.get(Ability::Charisma), 15);

        let bad = r#"{"strength":0,"dexterity":14,"constitution":12,"intelligence":10,"wisdom":13,"charisma":15}"#;
        assert!(serde_json::from_str::<AbilityScores>(bad).is_err());
    }

    #[test]
    fn test_skill_lookup_by_name() {
        assert_eq!("Sleight of Hand".parse::<Skill>().unwrap(), Skill::SleightOfHand);
        assert_eq!("animal_handling".parse::<Skill>().unwrap(), Skill::AnimalHandling);
        assert!("Juggling".parse::<Skill>().is_err());
        assert_eq!("wizard".parse::<CharacterClass>().unwrap(), CharacterClass::Wizard);
        assert_eq!("dex".parse::<Ability>().unwrap(), Ability::Dexterity);
    }

    #[test]
    fn test_armor_dex_caps() {
        assert_eq!(ArmorClass::unarmored().calculate(3), 13);
        assert_eq!(ArmorClass::armor(14, ArmorType::Medium).calculate(4), 16);
        assert_eq!(ArmorClass::armor(18, ArmorType::Heavy).calculate(-1), 17);
        assert_eq!(ArmorClass::armor(18, ArmorType::Heavy).with_bonus(2).calculate(3), 20);
    }

    #[test]
    fn test_total_level_and_spellcasting_fallback() {
        let character = CharacterSnapshot::new("Vex")
            .with_class(CharacterClass::Fighter, 3)
            .with_class(CharacterClass::Wizard, 2);
        assert_eq!(character.total_level(), 5);
        assert_eq!(
            character.effective_spellcasting_ability(),
            Some(Ability::Intelligence)
        );
        assert_eq!(CharacterSnapshot::new("Nobody").total_level(), 1);
    }
}

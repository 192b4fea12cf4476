//! Derived character statistics.
//!
//! Everything here is a pure function of a [`CharacterSnapshot`]:
//! modifiers, proficiency, skills, saves, armor class, spellcasting numbers,
//! spell slots and hit points. [`StatisticsCalculator`] adds a bounded,
//! time-limited memo cache on top without changing any result.

use crate::cache::{BoundedCache, CacheStats};
use crate::character::{Ability, CasterProgression, CharacterSnapshot, ClassLevel, Skill, StatsKey};
use crate::config::EngineConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Spell slots per slot level (1st..9th) indexed by caster level 1..=20.
pub const SPELL_SLOT_TABLE: [[u8; 9]; 20] = [
    [2, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 2, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 2, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 1, 0, 0, 0, 0, 0],
    [4, 3, 3, 2, 0, 0, 0, 0, 0],
    [4, 3, 3, 3, 1, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 2, 1, 1],
];

/// `floor((score - 10) / 2)`; negative modifiers round down.
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Proficiency bonus by total character level.
pub fn proficiency_bonus(level: u32) -> i32 {
    match level {
        0..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Multiclass spellcaster level: full + floor(half / 2) + floor(third / 3).
///
/// Pact magic does not contribute.
pub fn caster_level(classes: &[ClassLevel]) -> u32 {
    let levels_for = |wanted: CasterProgression| -> u32 {
        classes
            .iter()
            .filter(|c| c.progression() == wanted)
            .map(|c| u32::from(c.level))
            .sum()
    };
    levels_for(CasterProgression::Full)
        + levels_for(CasterProgression::Half) / 2
        + levels_for(CasterProgression::Third) / 3
}

/// Slot row for a caster level; levels above 20 use the level-20 row.
pub fn spell_slots(caster_level: u32) -> [u8; 9] {
    match caster_level {
        0 => [0; 9],
        level => SPELL_SLOT_TABLE[(level.min(20) - 1) as usize],
    }
}

/// Maximum hit points summed across every class level.
///
/// The first level of the starting class takes the hit die's maximum face;
/// every other level takes `ceil(face / 2) + 1`. Each level gains at least 1.
pub fn hit_points(classes: &[ClassLevel], con_mod: i32) -> i32 {
    let mut total = 0;
    let mut first = true;
    for class_level in classes {
        let face = class_level.class.hit_die() as i32;
        for _ in 0..class_level.level {
            let base = if first {
                first = false;
                face
            } else {
                (face + 1) / 2 + 1
            };
            total += (base + con_mod).max(1);
        }
    }
    total
}

/// Everything derived from a character snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStatistics {
    pub level: u32,
    pub proficiency_bonus: i32,
    pub ability_modifiers: BTreeMap<Ability, i32>,
    pub skills: BTreeMap<Skill, i32>,
    pub saving_throws: BTreeMap<Ability, i32>,
    pub initiative: i32,
    pub passive_perception: i32,
    pub armor_class: i32,
    pub spell_save_dc: Option<i32>,
    pub spell_attack_bonus: Option<i32>,
    pub caster_level: u32,
    pub spell_slots: [u8; 9],
    pub max_hit_points: i32,
}

impl DerivedStatistics {
    pub fn modifier(&self, ability: Ability) -> i32 {
        self.ability_modifiers.get(&ability).copied().unwrap_or(0)
    }

    pub fn skill(&self, skill: Skill) -> i32 {
        self.skills.get(&skill).copied().unwrap_or(0)
    }

    pub fn saving_throw(&self, ability: Ability) -> i32 {
        self.saving_throws.get(&ability).copied().unwrap_or(0)
    }
}

/// Compute derived statistics without caching.
pub fn calculate(character: &CharacterSnapshot) -> DerivedStatistics {
    let scores = &character.ability_scores;
    let level = character.total_level();
    let proficiency = proficiency_bonus(level);

    let ability_modifiers: BTreeMap<Ability, i32> = Ability::all()
        .into_iter()
        .map(|ability| (ability, scores.modifier(ability)))
        .collect();
    let modifier = |ability: Ability| ability_modifiers[&ability];

    let skills = Skill::all()
        .iter()
        .map(|&skill| {
            let bonus = character.skill_proficiency(skill).bonus(proficiency);
            (skill, modifier(skill.ability()) + bonus)
        })
        .collect();

    let saving_throws = Ability::all()
        .into_iter()
        .map(|ability| {
            let bonus = if character.saving_throw_proficiencies.contains(&ability) {
                proficiency
            } else {
                0
            };
            (ability, modifier(ability) + bonus)
        })
        .collect();

    let passive_perception = 10
        + modifier(Ability::Wisdom)
        + character
            .skill_proficiency(Skill::Perception)
            .bonus(proficiency);

    let computed_ac = character.armor.calculate(modifier(Ability::Dexterity));
    let armor_class = character
        .armor_class
        .map_or(computed_ac, |explicit| explicit.max(computed_ac));

    let spell_ability_mod = character.effective_spellcasting_ability().map(modifier);
    let caster_level = caster_level(&character.classes);

    DerivedStatistics {
        level,
        proficiency_bonus: proficiency,
        initiative: modifier(Ability::Dexterity),
        passive_perception,
        armor_class,
        spell_save_dc: spell_ability_mod.map(|m| 8 + m + proficiency),
        spell_attack_bonus: spell_ability_mod.map(|m| m + proficiency),
        caster_level,
        spell_slots: spell_slots(caster_level),
        max_hit_points: hit_points(&character.classes, modifier(Ability::Constitution)),
        ability_modifiers,
        skills,
        saving_throws,
    }
}

/// Memoizing front end to [`calculate`].
///
/// Safe to share between threads; the cache sits behind a mutex and results
/// are identical to uncached calculation.
#[derive(Debug)]
pub struct StatisticsCalculator {
    cache: Mutex<BoundedCache<StatsKey, DerivedStatistics>>,
}

impl StatisticsCalculator {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(BoundedCache::new(capacity, ttl)),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.stats_cache_capacity, config.stats_cache_ttl())
    }

    pub fn calculate(&self, character: &CharacterSnapshot) -> DerivedStatistics {
        self.calculate_at(character, Instant::now())
    }

    /// Same as [`Self::calculate`] with an explicit clock reading.
    pub fn calculate_at(&self, character: &CharacterSnapshot, now: Instant) -> DerivedStatistics {
        let key = character.stats_key();
        let mut cache = self.cache.lock();
        if let Some(stats) = cache.get(&key, now) {
            return stats;
        }
        tracing::trace!(character = %character.id, "computing derived statistics");
        let stats = calculate(character);
        cache.insert(key, stats.clone(), now);
        stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

impl Default for StatisticsCalculator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{AbilityScores, ArmorClass, ArmorType, CharacterClass, ProficiencyLevel};
    use crate::testing::{sample_fighter, sample_wizard};

    #[test]
    fn test_ability_modifier_spot_values() {
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(8), -1);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(20), 5);
        assert_eq!(ability_modifier(1), -5);
        assert_eq!(ability_modifier(30), 10);
    }

    #[test]
    fn test_proficiency_bonus_tiers() {
        assert_eq!(proficiency_bonus(1), 2);
        assert_eq!(proficiency_bonus(4), 2);
        assert_eq!(proficiency_bonus(5), 3);
        assert_eq!(proficiency_bonus(9), 4);
        assert_eq!(proficiency_bonus(13), 5);
        assert_eq!(proficiency_bonus(17), 6);
        assert_eq!(proficiency_bonus(20), 6);
    }

    #[test]
    fn test_expertise_stacks_full_bonus() {
        let character = CharacterSnapshot::new("Lark")
            .with_class(CharacterClass::Rogue, 5)
            .with_scores(AbilityScores::new(10, 16, 12, 10, 14, 10).unwrap())
            .with_skill(Skill::Stealth, ProficiencyLevel::Expertise)
            .with_skill(Skill::Perception, ProficiencyLevel::Proficient);
        let stats = calculate(&character);

        assert_eq!(stats.proficiency_bonus, 3);
        assert_eq!(stats.skill(Skill::Stealth), 3 + 3 + 3);
        assert_eq!(stats.skill(Skill::Perception), 2 + 3);
        assert_eq!(stats.skill(Skill::Arcana), 0);
        assert_eq!(stats.passive_perception, 10 + 2 + 3);
        assert_eq!(stats.initiative, 3);
    }

    #[test]
    fn test_saving_throws() {
        let stats = calculate(&sample_fighter("Roland"));
        assert_eq!(stats.saving_throw(Ability::Strength), 3 + 2);
        assert_eq!(stats.saving_throw(Ability::Constitution), 2 + 2);
        assert_eq!(stats.saving_throw(Ability::Charisma), -1);
    }

    #[test]
    fn test_armor_class_with_explicit_floor() {
        let mut character = CharacterSnapshot::new("Tank")
            .with_scores(AbilityScores::new(16, 14, 14, 10, 10, 10).unwrap())
            .with_armor(ArmorClass::armor(14, ArmorType::Medium).with_bonus(2));
        assert_eq!(calculate(&character).armor_class, 18);

        character.armor_class = Some(20);
        assert_eq!(calculate(&character).armor_class, 20);

        character.armor_class = Some(12);
        assert_eq!(calculate(&character).armor_class, 18);
    }

    #[test]
    fn test_spellcasting_numbers() {
        let stats = calculate(&sample_wizard("Elminster"));
        // INT 16 (+3), level 1 proficiency 2.
        assert_eq!(stats.spell_save_dc, Some(13));
        assert_eq!(stats.spell_attack_bonus, Some(5));
        assert_eq!(stats.spell_slots[0], 2);

        let stats = calculate(&sample_fighter("Roland"));
        assert_eq!(stats.spell_save_dc, None);
        assert_eq!(stats.caster_level, 0);
        assert_eq!(stats.spell_slots, [0; 9]);
    }

    #[test]
    fn test_multiclass_caster_level() {
        let classes = vec![
            ClassLevel::new(CharacterClass::Wizard, 5),
            ClassLevel::new(CharacterClass::Paladin, 5),
            ClassLevel {
                class: CharacterClass::Fighter,
                level: 7,
                caster_override: Some(CasterProgression::Third),
            },
            ClassLevel::new(CharacterClass::Warlock, 3),
        ];
        assert_eq!(caster_level(&classes), 5 + 2 + 2);
        assert_eq!(spell_slots(9), [4, 3, 3, 3, 1, 0, 0, 0, 0]);
        assert_eq!(spell_slots(25), spell_slots(20));
    }

    #[test]
    fn test_hit_points() {
        // Fighter 3 with CON +2: 10+2, then (6+2) twice.
        let classes = vec![ClassLevel::new(CharacterClass::Fighter, 3)];
        assert_eq!(hit_points(&classes, 2), 12 + 8 + 8);

        // Wizard 1 / Fighter 1 with CON -3: each level floors at 1.
        let classes = vec![
            ClassLevel::new(CharacterClass::Wizard, 1),
            ClassLevel::new(CharacterClass::Fighter, 1),
        ];
        assert_eq!(hit_points(&classes, -3), 3 + 3);
        assert_eq!(hit_points(&classes, -9), 2);
    }

    #[test]
    fn test_calculate_is_deterministic() {
        let character = sample_fighter("Roland");
        assert_eq!(calculate(&character), calculate(&character));
    }

    #[test]
    fn test_calculator_cache_reflects_writes() {
        let calculator = StatisticsCalculator::new(8, Duration::from_secs(300));
        let mut character = sample_fighter("Roland");

        let first = calculator.calculate(&character);
        assert_eq!(calculator.calculate(&character), first);
        assert_eq!(calculator.cache_stats().hits, 1);

        character.set_ability_score(Ability::Dexterity, 18).unwrap();
        let updated = calculator.calculate(&character);
        assert_eq!(updated.initiative, 4);
        assert_eq!(updated, calculate(&character));
        assert_eq!(calculator.cache_len(), 2);
    }

    #[test]
    fn test_calculator_recomputes_after_ttl() {
        let calculator = StatisticsCalculator::new(8, Duration::from_secs(5));
        let character = sample_fighter("Roland");
        let now = Instant::now();

        calculator.calculate_at(&character, now);
        calculator.calculate_at(&character, now + Duration::from_secs(6));
        assert_eq!(calculator.cache_stats().hits, 0);
        assert_eq!(calculator.cache_stats().misses, 2);
    }
}

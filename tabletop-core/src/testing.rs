//! Testing utilities for the engine.
//!
//! This module provides tools for deterministic tests:
//! - `ScriptedRoller` for fixed die faces instead of a random source
//! - Sample character snapshots
//! - `EncounterHarness` for scripted combat scenarios

use crate::character::{
    Ability, AbilityScores, ArmorClass, ArmorType, CharacterClass, CharacterSnapshot,
    ProficiencyLevel, Skill,
};
use crate::combat::{Combat, CombatError, GameId, ParticipantId, ParticipantSpec};
use crate::dice::DieRoller;
use crate::rules::{self, CombatCommand, CombatEvent};
use std::collections::VecDeque;

/// A die roller that returns scripted faces in order.
///
/// Once the script runs out the last face repeats (1 if the script was empty).
/// Faces are returned as given; for percentile dice script the two d10 faces
/// (tens then ones, where a face of 1 reads as 0) rather than the d100 result.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    faces: VecDeque<u32>,
    last: Option<u32>,
    requested: Vec<u32>,
}

impl ScriptedRoller {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            last: None,
            requested: Vec::new(),
        }
    }

    /// Always return `face`.
    pub fn constant(face: u32) -> Self {
        Self {
            faces: VecDeque::new(),
            last: Some(face),
            requested: Vec::new(),
        }
    }

    /// Queue more faces after the current script.
    pub fn push(&mut self, face: u32) {
        self.faces.push_back(face);
    }

    /// Number of draws made so far.
    pub fn draws(&self) -> usize {
        self.requested.len()
    }

    /// Die sizes requested, in order.
    pub fn requested_sides(&self) -> &[u32] {
        &self.requested
    }

    pub fn remaining(&self) -> usize {
        self.faces.len()
    }
}

impl DieRoller for ScriptedRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.requested.push(sides);
        let face = self
            .faces
            .pop_front()
            .or(self.last)
            .unwrap_or(1);
        self.last = Some(face);
        face
    }
}

/// Level 1 fighter: STR 16, DEX 12, CON 14, INT 10, WIS 12, CHA 8, chain mail.
pub fn sample_fighter(name: &str) -> CharacterSnapshot {
    CharacterSnapshot::new(name)
        .with_scores(AbilityScores::new(16, 12, 14, 10, 12, 8).unwrap_or_default())
        .with_class(CharacterClass::Fighter, 1)
        .with_armor(ArmorClass::armor(16, ArmorType::Heavy))
        .with_skill(Skill::Athletics, ProficiencyLevel::Proficient)
        .with_skill(Skill::Perception, ProficiencyLevel::Proficient)
        .with_saving_throw(Ability::Strength)
        .with_saving_throw(Ability::Constitution)
}

/// Level 1 wizard: STR 8, DEX 14, CON 12, INT 16, WIS 12, CHA 10.
pub fn sample_wizard(name: &str) -> CharacterSnapshot {
    CharacterSnapshot::new(name)
        .with_scores(AbilityScores::new(8, 14, 12, 16, 12, 10).unwrap_or_default())
        .with_class(CharacterClass::Wizard, 1)
        .with_skill(Skill::Arcana, ProficiencyLevel::Proficient)
        .with_skill(Skill::History, ProficiencyLevel::Proficient)
        .with_saving_throw(Ability::Intelligence)
        .with_saving_throw(Ability::Wisdom)
}

/// A combat plus a scripted roller, recording every event produced.
#[derive(Debug)]
pub struct EncounterHarness {
    pub combat: Combat,
    pub roller: ScriptedRoller,
    pub events: Vec<CombatEvent>,
}

impl EncounterHarness {
    pub fn new(name: &str) -> Self {
        Self {
            combat: Combat::new(GameId::new(), name),
            roller: ScriptedRoller::default(),
            events: Vec::new(),
        }
    }

    /// Add an NPC with the given hit points and initiative modifier.
    ///
    /// # Panics
    ///
    /// If the encounter rejects the NPC, e.g. for `max_hp` below 1.
    pub fn with_npc(mut self, name: &str, max_hp: i32, initiative_modifier: i32) -> Self {
        let spec = ParticipantSpec::npc(name, max_hp).with_initiative_modifier(initiative_modifier);
        if let Err(err) = self.combat.add_participant(spec) {
            panic!("cannot add NPC {name}: {err}");
        }
        self
    }

    /// Queue faces for the next rolls.
    pub fn script(mut self, faces: impl IntoIterator<Item = u32>) -> Self {
        for face in faces {
            self.roller.push(face);
        }
        self
    }

    pub fn run(&mut self, command: CombatCommand) -> Result<Vec<CombatEvent>, CombatError> {
        let events = rules::execute(&mut self.combat, command, &mut self.roller)?;
        self.events.extend(events.iter().cloned());
        Ok(events)
    }

    /// Find a participant by display name.
    pub fn id_of(&self, name: &str) -> Option<ParticipantId> {
        self.combat
            .participants()
            .iter()
            .find(|p| p.display_name() == Some(name))
            .map(|p| p.id)
    }

    /// Display names in turn order.
    pub fn turn_order(&self) -> Vec<String> {
        self.combat
            .participants()
            .iter()
            .map(|p| p.display_name().unwrap_or("?").to_string())
            .collect()
    }

    /// Display name of whoever is acting.
    pub fn current_name(&self) -> Option<&str> {
        self.combat
            .current_participant()
            .and_then(|p| p.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_roller_repeats_last_face() {
        let mut roller = ScriptedRoller::new([3, 5]);
        assert_eq!(roller.roll_die(6), 3);
        assert_eq!(roller.roll_die(6), 5);
        assert_eq!(roller.roll_die(6), 5);
        assert_eq!(roller.draws(), 3);
        assert_eq!(ScriptedRoller::default().roll_die(20), 1);
    }

    #[test]
    fn test_sample_characters_are_valid() {
        let fighter = sample_fighter("Roland");
        assert_eq!(fighter.ability_scores.get(Ability::Strength), 16);
        let wizard = sample_wizard("Mira");
        assert_eq!(wizard.ability_scores.get(Ability::Intelligence), 16);
    }

    #[test]
    fn test_harness_runs_commands() {
        let mut harness = EncounterHarness::new("Ambush")
            .with_npc("Goblin", 7, 2)
            .with_npc("Wolf", 11, 2)
            .script([10, 15]);
        harness.run(CombatCommand::RollInitiative).unwrap();
        assert_eq!(harness.turn_order(), vec!["Wolf", "Goblin"]);
        assert_eq!(harness.current_name(), Some("Wolf"));
    }

    #[test]
    #[should_panic(expected = "cannot add NPC Ghost")]
    fn test_harness_rejects_npc_without_hit_points() {
        let _ = EncounterHarness::new("Haunt").with_npc("Ghost", 0, 0);
    }
}

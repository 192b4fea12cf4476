//! Command/event layer over the combat state machine.
//!
//! This module implements the pipeline a transport layer drives:
//! 1. A client submits a [`CombatCommand`] (what someone wants to happen)
//! 2. [`execute`] validates and applies it to a [`Combat`]
//! 3. [`CombatEvent`]s are produced that describe every state change
//! 4. The caller persists the combat and broadcasts the events
//!
//! Commands and events are plain serde values, so they travel over any wire
//! format unchanged.

use crate::combat::{
    Combat, CombatError, Condition, DamageType, InitiativeEntry, Participant, ParticipantId,
    ParticipantSpec, ParticipantUpdate, TurnAdvance,
};
use crate::dice::{self, DiceFormula, DieRoller, RollOptions, RollOutcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A request to change (or roll within) an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatCommand {
    /// Add a participant at the end of the turn order
    AddParticipant { spec: ParticipantSpec },

    /// Remove a participant
    RemoveParticipant { participant_id: ParticipantId },

    /// Roll initiative for everyone and start combat
    RollInitiative,

    /// End the current turn
    AdvanceTurn,

    /// Deal a fixed amount of damage
    DealDamage {
        participant_id: ParticipantId,
        amount: i32,
        damage_type: DamageType,
    },

    /// Roll damage dice and deal the total
    RollDamage {
        participant_id: ParticipantId,
        formula: String,
        damage_type: DamageType,
        #[serde(default)]
        critical: bool,
    },

    /// Heal a participant
    Heal {
        participant_id: ParticipantId,
        amount: i32,
    },

    /// Apply a condition
    ApplyCondition {
        participant_id: ParticipantId,
        condition: Condition,
    },

    /// Remove a condition by name
    RemoveCondition {
        participant_id: ParticipantId,
        name: String,
    },

    /// Change participant fields
    UpdateParticipant {
        participant_id: ParticipantId,
        update: ParticipantUpdate,
    },

    /// A free-form roll shown to the table; changes no state
    Roll {
        notation: String,
        #[serde(default)]
        options: RollOptions,
        #[serde(default)]
        purpose: Option<String>,
    },

    Pause,
    Resume,
    End,

    /// Set or clear the per-turn time limit in seconds
    SetTurnTimeLimit { seconds: Option<u32> },
}

impl CombatCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CombatCommand::AddParticipant { .. } => "add_participant",
            CombatCommand::RemoveParticipant { .. } => "remove_participant",
            CombatCommand::RollInitiative => "roll_initiative",
            CombatCommand::AdvanceTurn => "advance_turn",
            CombatCommand::DealDamage { .. } => "deal_damage",
            CombatCommand::RollDamage { .. } => "roll_damage",
            CombatCommand::Heal { .. } => "heal",
            CombatCommand::ApplyCondition { .. } => "apply_condition",
            CombatCommand::RemoveCondition { .. } => "remove_condition",
            CombatCommand::UpdateParticipant { .. } => "update_participant",
            CombatCommand::Roll { .. } => "roll",
            CombatCommand::Pause => "pause",
            CombatCommand::Resume => "resume",
            CombatCommand::End => "end",
            CombatCommand::SetTurnTimeLimit { .. } => "set_turn_time_limit",
        }
    }

    /// Whether a successful run changes the encounter.
    pub fn mutates(&self) -> bool {
        !matches!(self, CombatCommand::Roll { .. })
    }
}

/// Something that happened in an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatEvent {
    /// A dice roll occurred
    DiceRolled { roll: RollOutcome, purpose: String },

    ParticipantAdded { participant: Participant },

    ParticipantRemoved {
        participant_id: ParticipantId,
        turn_index: usize,
    },

    ParticipantUpdated { participant: Participant },

    /// Initiative order rebuilt
    InitiativeRolled { order: Vec<InitiativeEntry> },

    CombatStarted,

    RoundStarted { round: u32 },

    TurnAdvanced {
        round: u32,
        turn_index: usize,
        participant_id: ParticipantId,
    },

    /// HP changed; `amount` is negative for damage
    HpChanged {
        participant_id: ParticipantId,
        amount: i32,
        previous_hp: i32,
        current_hp: i32,
        max_hp: i32,
    },

    /// Damage dropped a participant to 0 HP
    ParticipantDied { participant_id: ParticipantId },

    ConditionApplied {
        participant_id: ParticipantId,
        condition: Condition,
    },

    ConditionRemoved {
        participant_id: ParticipantId,
        condition: Condition,
    },

    /// A timed condition ran out
    ConditionExpired {
        participant_id: ParticipantId,
        condition: Condition,
    },

    CombatPaused,
    CombatResumed,
    CombatEnded { round: u32 },

    TurnTimeLimitChanged { seconds: Option<u32> },
}

/// Run one command against an encounter.
///
/// Either the whole command applies and its events are returned, or the
/// combat is untouched and the error is returned.
pub fn execute<R: DieRoller + ?Sized>(
    combat: &mut Combat,
    command: CombatCommand,
    roller: &mut R,
) -> Result<Vec<CombatEvent>, CombatError> {
    execute_with_options(combat, command, &RollOptions::default(), roller)
}

/// Like [`execute`], rolling under engine-wide roll options.
///
/// Damage rolls use `limits` as-is; free rolls keep the client's options
/// but never exceed its critical threshold or explosion cap.
pub fn execute_with_options<R: DieRoller + ?Sized>(
    combat: &mut Combat,
    command: CombatCommand,
    limits: &RollOptions,
    roller: &mut R,
) -> Result<Vec<CombatEvent>, CombatError> {
    debug!(combat = %combat.id(), command = command.name(), "executing command");

    let events = match command {
        CombatCommand::AddParticipant { spec } => {
            let id = combat.add_participant(spec)?;
            vec![CombatEvent::ParticipantAdded {
                participant: participant_snapshot(combat, id)?,
            }]
        }

        CombatCommand::RemoveParticipant { participant_id } => {
            let removal = combat.remove_participant(participant_id)?;
            let mut events = vec![CombatEvent::ParticipantRemoved {
                participant_id,
                turn_index: combat.turn_index(),
            }];
            if let Some(step) = removal.handoff {
                events.extend(turn_events(step));
            }
            events
        }

        CombatCommand::RollInitiative => {
            let was_active = combat.is_active();
            let order = combat.roll_initiative(roller)?;
            let mut events = vec![CombatEvent::InitiativeRolled { order }];
            if !was_active {
                events.push(CombatEvent::CombatStarted);
            }
            events
        }

        CombatCommand::AdvanceTurn => turn_events(combat.advance_turn()?),

        CombatCommand::DealDamage {
            participant_id,
            amount,
            damage_type,
        } => damage_events(combat, participant_id, amount, damage_type)?,

        CombatCommand::RollDamage {
            participant_id,
            formula,
            damage_type,
            critical,
        } => {
            let formula = DiceFormula::parse(&formula)?;
            if combat.participant(participant_id).is_none() {
                return Err(CombatError::NotFound(participant_id));
            }
            let roll = dice::roll_damage(&formula, critical, limits, roller);
            let amount = roll.total.max(0);
            let mut events = vec![CombatEvent::DiceRolled {
                purpose: format!("{damage_type} damage"),
                roll,
            }];
            events.extend(damage_events(combat, participant_id, amount, damage_type)?);
            events
        }

        CombatCommand::Heal {
            participant_id,
            amount,
        } => {
            let outcome = combat.heal(participant_id, amount)?;
            vec![CombatEvent::HpChanged {
                participant_id,
                amount: outcome.current_hp - outcome.previous_hp,
                previous_hp: outcome.previous_hp,
                current_hp: outcome.current_hp,
                max_hp: max_hp_of(combat, participant_id),
            }]
        }

        CombatCommand::ApplyCondition {
            participant_id,
            condition,
        } => {
            combat.apply_condition(participant_id, condition.clone())?;
            vec![CombatEvent::ConditionApplied {
                participant_id,
                condition,
            }]
        }

        CombatCommand::RemoveCondition {
            participant_id,
            name,
        } => {
            let condition = combat.remove_condition(participant_id, &name)?;
            vec![CombatEvent::ConditionRemoved {
                participant_id,
                condition,
            }]
        }

        CombatCommand::UpdateParticipant {
            participant_id,
            update,
        } => {
            combat.update_participant(participant_id, update)?;
            vec![CombatEvent::ParticipantUpdated {
                participant: participant_snapshot(combat, participant_id)?,
            }]
        }

        CombatCommand::Roll {
            notation,
            options,
            purpose,
        } => {
            let roll = DiceFormula::parse(&notation)?.roll_with(&options.within(limits), roller);
            vec![CombatEvent::DiceRolled {
                roll,
                purpose: purpose.unwrap_or_default(),
            }]
        }

        CombatCommand::Pause => {
            combat.pause()?;
            vec![CombatEvent::CombatPaused]
        }

        CombatCommand::Resume => {
            combat.resume()?;
            vec![CombatEvent::CombatResumed]
        }

        CombatCommand::End => {
            combat.end()?;
            vec![CombatEvent::CombatEnded {
                round: combat.round(),
            }]
        }

        CombatCommand::SetTurnTimeLimit { seconds } => {
            combat.set_turn_time_limit(seconds)?;
            vec![CombatEvent::TurnTimeLimitChanged { seconds }]
        }
    };

    Ok(events)
}

fn turn_events(step: TurnAdvance) -> Vec<CombatEvent> {
    let mut events = Vec::new();
    if step.new_round {
        events.push(CombatEvent::RoundStarted { round: step.round });
    }
    events.extend(
        step.expired
            .into_iter()
            .map(|expired| CombatEvent::ConditionExpired {
                participant_id: expired.participant_id,
                condition: expired.condition,
            }),
    );
    events.push(CombatEvent::TurnAdvanced {
        round: step.round,
        turn_index: step.turn_index,
        participant_id: step.participant_id,
    });
    events
}

fn damage_events(
    combat: &mut Combat,
    participant_id: ParticipantId,
    amount: i32,
    damage_type: DamageType,
) -> Result<Vec<CombatEvent>, CombatError> {
    let outcome = combat.deal_damage(participant_id, amount, damage_type)?;
    let mut events = vec![CombatEvent::HpChanged {
        participant_id,
        amount: outcome.current_hp - outcome.previous_hp,
        previous_hp: outcome.previous_hp,
        current_hp: outcome.current_hp,
        max_hp: max_hp_of(combat, participant_id),
    }];
    if outcome.dead {
        events.push(CombatEvent::ParticipantDied { participant_id });
    }
    Ok(events)
}

fn participant_snapshot(
    combat: &Combat,
    participant_id: ParticipantId,
) -> Result<Participant, CombatError> {
    combat
        .participant(participant_id)
        .cloned()
        .ok_or(CombatError::NotFound(participant_id))
}

fn max_hp_of(combat: &Combat, participant_id: ParticipantId) -> i32 {
    combat
        .participant(participant_id)
        .map_or(0, |p| p.max_hp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterId;
    use crate::combat::{CombatStatus, GameId};
    use crate::testing::ScriptedRoller;

    fn setup() -> (Combat, ParticipantId, ParticipantId) {
        let mut combat = Combat::new(GameId::new(), "Crypt");
        let mut roller = ScriptedRoller::default();
        let events = execute(
            &mut combat,
            CombatCommand::AddParticipant {
                spec: ParticipantSpec::npc("Skeleton", 13),
            },
            &mut roller,
        )
        .unwrap();
        let skeleton = match &events[0] {
            CombatEvent::ParticipantAdded { participant } => participant.id,
            other => panic!("unexpected event {other:?}"),
        };
        let zombie = combat
            .add_participant(ParticipantSpec::npc("Zombie", 22))
            .unwrap();
        (combat, skeleton, zombie)
    }

    #[test]
    fn test_character_participant_rolls_with_its_modifier() {
        let mut combat = Combat::new(GameId::new(), "Bridge");
        let mut roller = ScriptedRoller::new([10, 10]);
        let hero = CharacterId::new();
        execute(
            &mut combat,
            CombatCommand::AddParticipant {
                spec: ParticipantSpec::character(hero, 12, 3),
            },
            &mut roller,
        )
        .unwrap();
        execute(
            &mut combat,
            CombatCommand::AddParticipant {
                spec: ParticipantSpec::npc("Troll", 30),
            },
            &mut roller,
        )
        .unwrap();

        execute(&mut combat, CombatCommand::RollInitiative, &mut roller).unwrap();
        let first = &combat.participants()[0];
        assert_eq!(first.character_id(), Some(hero));
        assert_eq!(first.initiative, 13);
        assert_eq!(combat.participants()[1].initiative, 10);
    }

    #[test]
    fn test_character_spec_without_modifier_is_rejected() {
        let mut combat = Combat::new(GameId::new(), "Bridge");
        let spec = ParticipantSpec {
            initiative_modifier: None,
            ..ParticipantSpec::character(CharacterId::new(), 12, 0)
        };
        let err = execute(
            &mut combat,
            CombatCommand::AddParticipant { spec },
            &mut ScriptedRoller::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CombatError::InvariantViolation(_)));
        assert!(combat.participants().is_empty());
        assert_eq!(combat.version(), 0);
    }

    #[test]
    fn test_removing_acting_participant_passes_the_turn() {
        let (mut combat, skeleton, zombie) = setup();
        let mut roller = ScriptedRoller::new([18, 6]);
        execute(&mut combat, CombatCommand::RollInitiative, &mut roller).unwrap();
        assert_eq!(combat.current_participant().unwrap().id, skeleton);

        let events = execute(
            &mut combat,
            CombatCommand::RemoveParticipant {
                participant_id: skeleton,
            },
            &mut roller,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                CombatEvent::ParticipantRemoved {
                    participant_id: skeleton,
                    turn_index: 0,
                },
                CombatEvent::TurnAdvanced {
                    round: 1,
                    turn_index: 0,
                    participant_id: zombie,
                },
            ]
        );
    }

    #[test]
    fn test_roll_initiative_starts_combat_once() {
        let (mut combat, _, _) = setup();
        let mut roller = ScriptedRoller::new([12, 8, 3, 4]);

        let events = execute(&mut combat, CombatCommand::RollInitiative, &mut roller).unwrap();
        assert!(matches!(events[0], CombatEvent::InitiativeRolled { .. }));
        assert_eq!(events.last(), Some(&CombatEvent::CombatStarted));

        let events = execute(&mut combat, CombatCommand::RollInitiative, &mut roller).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_advance_reports_round_and_expiry() {
        let (mut combat, skeleton, _) = setup();
        let mut roller = ScriptedRoller::new([15, 10]);
        execute(&mut combat, CombatCommand::RollInitiative, &mut roller).unwrap();
        execute(
            &mut combat,
            CombatCommand::ApplyCondition {
                participant_id: skeleton,
                condition: Condition::new("Frightened").lasting(1),
            },
            &mut roller,
        )
        .unwrap();

        execute(&mut combat, CombatCommand::AdvanceTurn, &mut roller).unwrap();
        let events = execute(&mut combat, CombatCommand::AdvanceTurn, &mut roller).unwrap();
        assert_eq!(events[0], CombatEvent::RoundStarted { round: 2 });
        assert!(matches!(
            &events[1],
            CombatEvent::ConditionExpired { participant_id, condition }
                if *participant_id == skeleton && condition.name == "Frightened"
        ));
        assert!(matches!(events[2], CombatEvent::TurnAdvanced { round: 2, turn_index: 0, .. }));
    }

    #[test]
    fn test_lethal_damage_emits_death() {
        let (mut combat, skeleton, _) = setup();
        let mut roller = ScriptedRoller::default();
        let events = execute(
            &mut combat,
            CombatCommand::DealDamage {
                participant_id: skeleton,
                amount: 20,
                damage_type: DamageType::Bludgeoning,
            },
            &mut roller,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                CombatEvent::HpChanged {
                    participant_id: skeleton,
                    amount: -13,
                    previous_hp: 13,
                    current_hp: 0,
                    max_hp: 13,
                },
                CombatEvent::ParticipantDied {
                    participant_id: skeleton
                },
            ]
        );
    }

    #[test]
    fn test_roll_damage_doubles_dice_on_critical() {
        let (mut combat, _, zombie) = setup();
        let mut roller = ScriptedRoller::constant(3);
        let events = execute(
            &mut combat,
            CombatCommand::RollDamage {
                participant_id: zombie,
                formula: "1d8+2".to_string(),
                damage_type: DamageType::Radiant,
                critical: true,
            },
            &mut roller,
        )
        .unwrap();

        match &events[0] {
            CombatEvent::DiceRolled { roll, purpose } => {
                assert_eq!(roll.dice, vec![3, 3]);
                assert_eq!(roll.total, 8);
                assert_eq!(purpose, "radiant damage");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(combat.participant(zombie).unwrap().current_hp, 14);
    }

    #[test]
    fn test_failed_command_leaves_combat_untouched() {
        let (mut combat, _, zombie) = setup();
        let before = combat.clone();
        let mut roller = ScriptedRoller::default();

        let err = execute(
            &mut combat,
            CombatCommand::RollDamage {
                participant_id: zombie,
                formula: "2x6".to_string(),
                damage_type: DamageType::Fire,
                critical: false,
            },
            &mut roller,
        )
        .unwrap_err();
        assert!(matches!(err, CombatError::Notation(_)));

        let err = execute(
            &mut combat,
            CombatCommand::RollDamage {
                participant_id: ParticipantId::new(),
                formula: "2d6".to_string(),
                damage_type: DamageType::Fire,
                critical: false,
            },
            &mut roller,
        )
        .unwrap_err();
        assert!(matches!(err, CombatError::NotFound(_)));
        assert_eq!(roller.draws(), 0);

        assert!(execute(&mut combat, CombatCommand::Resume, &mut roller).is_err());
        assert_eq!(combat, before);
    }

    #[test]
    fn test_free_roll_does_not_bump_version() {
        let (mut combat, _, _) = setup();
        let version = combat.version();
        let mut roller = ScriptedRoller::new([5, 18]);
        let command = CombatCommand::Roll {
            notation: "1d20+2".to_string(),
            options: RollOptions::new().with_advantage(),
            purpose: Some("Perception".to_string()),
        };
        assert!(!command.mutates());

        let events = execute(&mut combat, command, &mut roller).unwrap();
        match &events[0] {
            CombatEvent::DiceRolled { roll, .. } => assert_eq!(roll.total, 20),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(combat.version(), version);
    }

    #[test]
    fn test_end_reports_round() {
        let (mut combat, _, _) = setup();
        let mut roller = ScriptedRoller::default();
        let events = execute(&mut combat, CombatCommand::End, &mut roller).unwrap();
        assert_eq!(events, vec![CombatEvent::CombatEnded { round: 1 }]);
        assert_eq!(combat.status(), CombatStatus::Ended);
    }

    #[test]
    fn test_commands_serialize() {
        let command = CombatCommand::Heal {
            participant_id: ParticipantId::new(),
            amount: 5,
        };
        let json = serde_json::to_string(&command).unwrap();
        let back: CombatCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, command);
    }
}

//! Turn-based combat encounters.
//!
//! A [`Combat`] is a single-writer aggregate: every operation takes
//! `&mut self`, validates first and only then mutates, so a rejected call
//! leaves the encounter exactly as it was. Each successful mutation bumps
//! [`Combat::version`].
//!
//! Lifecycle: `Inactive -> Active <-> Paused -> Ended`. Rolling initiative
//! activates an encounter; `end` is accepted from any non-terminal state.

use crate::character::{CharacterId, CharacterSnapshot};
use crate::dice::{self, DieRoller, ParseError, RollOptions};
use crate::stats::DerivedStatistics;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from combat operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("Cannot {operation} while combat is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: CombatStatus,
    },

    #[error("Participant not found: {0}")]
    NotFound(ParticipantId),

    #[error("Participant {participant} has no condition named '{condition}'")]
    ConditionNotFound {
        participant: ParticipantId,
        condition: String,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Dice error: {0}")]
    Notation(#[from] ParseError),
}

// ============================================================================
// ID Types
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a combat encounter.
    CombatId
);
uuid_id!(
    /// The game an encounter belongs to.
    GameId
);
uuid_id!(
    /// Unique identifier for a participant within an encounter.
    ParticipantId
);

// ============================================================================
// Value types
// ============================================================================

/// Lifecycle state of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CombatStatus {
    #[default]
    Inactive,
    Active,
    Paused,
    Ended,
}

impl CombatStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CombatStatus::Inactive => "inactive",
            CombatStatus::Active => "active",
            CombatStatus::Paused => "paused",
            CombatStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for CombatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Common D&D damage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Thunder,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Force,
    Psychic,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Thunder => "thunder",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Force => "force",
            DamageType::Psychic => "psychic",
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named, optionally timed effect on a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rounds remaining; `None` lasts until removed.
    #[serde(default)]
    pub duration_rounds: Option<u32>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Condition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            duration_rounds: None,
            source: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn lasting(mut self, rounds: u32) -> Self {
        self.duration_rounds = Some(rounds);
        self
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Who a participant is: a stored character or a named non-player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantIdentity {
    Character(CharacterId),
    Npc { name: String },
}

/// One combatant in an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub identity: ParticipantIdentity,
    /// Initiative total; 0 until rolled.
    pub initiative: i32,
    /// The raw d20 face behind `initiative`.
    pub initiative_roll: Option<u32>,
    pub initiative_modifier: i32,
    pub current_hp: i32,
    pub max_hp: i32,
    /// Overrides the character's derived armor class.
    pub armor_class: Option<i32>,
    pub conditions: Vec<Condition>,
    /// Position in turn order, `0..participants.len()`.
    pub rank: usize,
    pub visible: bool,
    /// Insertion order; the final initiative tie-break.
    pub seq: u64,
}

impl Participant {
    /// NPC name, if this participant is not a stored character.
    pub fn display_name(&self) -> Option<&str> {
        match &self.identity {
            ParticipantIdentity::Npc { name } => Some(name),
            ParticipantIdentity::Character(_) => None,
        }
    }

    pub fn character_id(&self) -> Option<CharacterId> {
        match self.identity {
            ParticipantIdentity::Character(id) => Some(id),
            ParticipantIdentity::Npc { .. } => None,
        }
    }

    pub fn is_unconscious(&self) -> bool {
        self.current_hp == 0
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.is_named(name))
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.condition(name).is_some()
    }

    fn label(&self) -> String {
        match &self.identity {
            ParticipantIdentity::Npc { name } => name.clone(),
            ParticipantIdentity::Character(id) => format!("character {id}"),
        }
    }
}

/// Input for [`Combat::add_participant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSpec {
    pub identity: ParticipantIdentity,
    pub max_hp: i32,
    #[serde(default)]
    pub armor_class: Option<i32>,
    /// Required for characters; NPCs without one roll at +0.
    #[serde(default)]
    pub initiative_modifier: Option<i32>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ParticipantSpec {
    pub fn npc(name: impl Into<String>, max_hp: i32) -> Self {
        Self {
            identity: ParticipantIdentity::Npc { name: name.into() },
            max_hp,
            armor_class: None,
            initiative_modifier: None,
            visible: true,
        }
    }

    /// A character participant; `initiative_modifier` is its dexterity-derived bonus.
    pub fn character(id: CharacterId, max_hp: i32, initiative_modifier: i32) -> Self {
        Self {
            identity: ParticipantIdentity::Character(id),
            max_hp,
            armor_class: None,
            initiative_modifier: Some(initiative_modifier),
            visible: true,
        }
    }

    /// A character participant using its derived hit points and initiative.
    pub fn from_character(character: &CharacterSnapshot, stats: &DerivedStatistics) -> Self {
        Self::character(character.id, stats.max_hit_points, stats.initiative)
    }

    pub fn with_initiative_modifier(mut self, modifier: i32) -> Self {
        self.initiative_modifier = Some(modifier);
        self
    }

    pub fn with_armor_class(mut self, armor_class: i32) -> Self {
        self.armor_class = Some(armor_class);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Partial update for [`Combat::update_participant`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    #[serde(default)]
    pub current_hp: Option<i32>,
    #[serde(default)]
    pub max_hp: Option<i32>,
    /// `Some(None)` clears the override.
    #[serde(default)]
    pub armor_class: Option<Option<i32>>,
    #[serde(default)]
    pub visible: Option<bool>,
    /// Only valid for NPC participants.
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of [`Combat::deal_damage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageOutcome {
    pub participant_id: ParticipantId,
    pub amount: i32,
    pub damage_type: DamageType,
    pub previous_hp: i32,
    pub current_hp: i32,
    pub unconscious: bool,
    pub dead: bool,
}

/// Result of [`Combat::heal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealOutcome {
    pub participant_id: ParticipantId,
    pub amount: i32,
    pub previous_hp: i32,
    pub current_hp: i32,
}

/// One line of a freshly rolled initiative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub participant_id: ParticipantId,
    pub roll: u32,
    pub modifier: i32,
    pub total: i32,
    pub rank: usize,
}

/// A condition dropped because its duration ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredCondition {
    pub participant_id: ParticipantId,
    pub condition: Condition,
}

/// Result of [`Combat::remove_participant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub participant: Participant,
    /// Set when the removed participant was acting and the turn passed on.
    pub handoff: Option<TurnAdvance>,
}

/// Result of [`Combat::advance_turn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAdvance {
    pub round: u32,
    pub turn_index: usize,
    pub participant_id: ParticipantId,
    pub new_round: bool,
    pub expired: Vec<ExpiredCondition>,
}

// ============================================================================
// Combat
// ============================================================================

/// A combat encounter and its participants in turn order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combat {
    id: CombatId,
    game_id: GameId,
    name: String,
    round: u32,
    turn_index: usize,
    status: CombatStatus,
    /// Seconds each participant gets per turn.
    turn_time_limit: Option<u32>,
    participants: Vec<Participant>,
    version: u64,
    next_seq: u64,
}

impl Combat {
    pub fn new(game_id: GameId, name: impl Into<String>) -> Self {
        Self {
            id: CombatId::new(),
            game_id,
            name: name.into(),
            round: 1,
            turn_index: 0,
            status: CombatStatus::Inactive,
            turn_time_limit: None,
            participants: Vec::new(),
            version: 0,
            next_seq: 0,
        }
    }

    pub fn id(&self) -> CombatId {
        self.id
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn status(&self) -> CombatStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == CombatStatus::Active
    }

    pub fn is_paused(&self) -> bool {
        self.status == CombatStatus::Paused
    }

    pub fn turn_time_limit(&self) -> Option<u32> {
        self.turn_time_limit
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Participants in turn order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Whoever the turn cursor points at.
    pub fn current_participant(&self) -> Option<&Participant> {
        self.participants.get(self.turn_index)
    }

    // ------------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------------

    /// Join the encounter at the end of the turn order with full hit points.
    pub fn add_participant(&mut self, spec: ParticipantSpec) -> Result<ParticipantId, CombatError> {
        self.ensure_not_ended("add a participant")?;
        if spec.max_hp < 1 {
            return Err(CombatError::InvariantViolation(format!(
                "max HP must be at least 1, got {}",
                spec.max_hp
            )));
        }
        if let Some(ac) = spec.armor_class {
            check_armor_class(ac)?;
        }
        let initiative_modifier = match (&spec.identity, spec.initiative_modifier) {
            (_, Some(modifier)) => modifier,
            (ParticipantIdentity::Npc { .. }, None) => 0,
            (ParticipantIdentity::Character(id), None) => {
                return Err(CombatError::InvariantViolation(format!(
                    "character {id} needs an initiative modifier"
                )))
            }
        };

        let participant = Participant {
            id: ParticipantId::new(),
            identity: spec.identity,
            initiative: 0,
            initiative_roll: None,
            initiative_modifier,
            current_hp: spec.max_hp,
            max_hp: spec.max_hp,
            armor_class: spec.armor_class,
            conditions: Vec::new(),
            rank: self.participants.len(),
            visible: spec.visible,
            seq: self.next_seq,
        };
        let id = participant.id;
        debug!(combat = %self.id, participant = %id, name = %participant.label(), "participant added");

        self.next_seq += 1;
        self.participants.push(participant);
        self.touch();
        Ok(id)
    }

    /// Remove a participant, keeping the turn cursor on the same logical turn.
    ///
    /// Removing someone ranked before the cursor steps it back one place.
    /// Removing the acting participant of a started encounter hands the turn
    /// to the next in order: the cursor keeps its index, or wraps into a new
    /// round when the removed participant was last.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<Removal, CombatError> {
        self.ensure_not_ended("remove a participant")?;
        let index = self.index_of(id)?;
        let acting = index == self.turn_index
            && matches!(self.status, CombatStatus::Active | CombatStatus::Paused);

        let participant = self.participants.remove(index);
        self.rerank();
        let mut handoff = None;
        if self.participants.is_empty() {
            self.turn_index = 0;
        } else if index < self.turn_index {
            self.turn_index -= 1;
        } else if acting {
            let new_round = index >= self.participants.len();
            let expired = if new_round {
                self.turn_index = 0;
                self.start_round()
            } else {
                Vec::new()
            };
            handoff = Some(TurnAdvance {
                round: self.round,
                turn_index: self.turn_index,
                participant_id: self.participants[self.turn_index].id,
                new_round,
                expired,
            });
        }

        debug!(
            combat = %self.id,
            participant = %id,
            turn_index = self.turn_index,
            handoff = handoff.is_some(),
            "participant removed"
        );
        self.touch();
        Ok(Removal {
            participant,
            handoff,
        })
    }

    pub fn update_participant(
        &mut self,
        id: ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<(), CombatError> {
        self.ensure_not_ended("update a participant")?;
        let index = self.index_of(id)?;
        let participant = &self.participants[index];

        if let Some(max_hp) = update.max_hp {
            if max_hp < 1 {
                return Err(CombatError::InvariantViolation(format!(
                    "max HP must be at least 1, got {max_hp}"
                )));
            }
        }
        if let Some(Some(ac)) = update.armor_class {
            check_armor_class(ac)?;
        }
        if update.name.is_some() && participant.display_name().is_none() {
            return Err(CombatError::InvariantViolation(
                "only NPC participants have an editable name".to_string(),
            ));
        }

        let participant = &mut self.participants[index];
        if let Some(max_hp) = update.max_hp {
            participant.max_hp = max_hp;
        }
        let current = update.current_hp.unwrap_or(participant.current_hp);
        participant.current_hp = current.clamp(0, participant.max_hp);
        if let Some(armor_class) = update.armor_class {
            participant.armor_class = armor_class;
        }
        if let Some(visible) = update.visible {
            participant.visible = visible;
        }
        if let Some(name) = update.name {
            participant.identity = ParticipantIdentity::Npc { name };
        }

        debug!(combat = %self.id, participant = %id, "participant updated");
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Turn order
    // ------------------------------------------------------------------------

    /// Roll 1d20 + initiative modifier for everyone and rebuild the turn order.
    ///
    /// Ranks by total, then raw die, then insertion order. Activates an
    /// inactive encounter and resets the cursor to the top of the order.
    pub fn roll_initiative<R: DieRoller + ?Sized>(
        &mut self,
        roller: &mut R,
    ) -> Result<Vec<InitiativeEntry>, CombatError> {
        match self.status {
            CombatStatus::Inactive | CombatStatus::Active => {}
            state => {
                return Err(CombatError::InvalidTransition {
                    operation: "roll initiative",
                    state,
                })
            }
        }
        if self.participants.is_empty() {
            return Err(CombatError::InvariantViolation(
                "cannot roll initiative without participants".to_string(),
            ));
        }

        let options = RollOptions::default();
        for participant in &mut self.participants {
            let outcome = dice::roll_ability_check(participant.initiative_modifier, &options, roller);
            participant.initiative_roll = outcome.dice.first().copied();
            participant.initiative = outcome.total;
        }
        self.participants.sort_by_key(|p| {
            (
                Reverse(p.initiative),
                Reverse(p.initiative_roll.unwrap_or(0)),
                p.seq,
            )
        });
        self.rerank();
        self.turn_index = 0;

        if self.status == CombatStatus::Inactive {
            self.status = CombatStatus::Active;
            info!(combat = %self.id, name = %self.name, "combat started");
        }
        debug!(combat = %self.id, participants = self.participants.len(), "initiative rolled");
        self.touch();

        Ok(self
            .participants
            .iter()
            .map(|p| InitiativeEntry {
                participant_id: p.id,
                roll: p.initiative_roll.unwrap_or(0),
                modifier: p.initiative_modifier,
                total: p.initiative,
                rank: p.rank,
            })
            .collect())
    }

    /// Move the cursor to the next participant.
    ///
    /// Wrapping past the last participant starts a new round, which ticks
    /// every timed condition down by one and drops those that reach zero.
    pub fn advance_turn(&mut self) -> Result<TurnAdvance, CombatError> {
        self.ensure_status("advance the turn", CombatStatus::Active)?;
        if self.participants.is_empty() {
            return Err(CombatError::InvariantViolation(
                "active combat has no participants".to_string(),
            ));
        }

        let mut expired = Vec::new();
        let mut next = self.turn_index + 1;
        let new_round = next >= self.participants.len();
        if new_round {
            next = 0;
            expired = self.start_round();
        }
        self.turn_index = next;

        let participant_id = self.participants[next].id;
        debug!(
            combat = %self.id,
            round = self.round,
            turn_index = next,
            expired = expired.len(),
            "turn advanced"
        );
        self.touch();

        Ok(TurnAdvance {
            round: self.round,
            turn_index: next,
            participant_id,
            new_round,
            expired,
        })
    }

    // ------------------------------------------------------------------------
    // Hit points
    // ------------------------------------------------------------------------

    /// Subtract hit points, clamping at zero. Over-damage is never rejected.
    pub fn deal_damage(
        &mut self,
        id: ParticipantId,
        amount: i32,
        damage_type: DamageType,
    ) -> Result<DamageOutcome, CombatError> {
        self.ensure_not_ended("deal damage")?;
        check_amount("damage", amount)?;
        let index = self.index_of(id)?;

        let participant = &mut self.participants[index];
        let previous_hp = participant.current_hp;
        let current_hp = previous_hp.saturating_sub(amount).max(0);
        participant.current_hp = current_hp;

        let outcome = DamageOutcome {
            participant_id: id,
            amount,
            damage_type,
            previous_hp,
            current_hp,
            unconscious: current_hp == 0,
            dead: amount > 0 && current_hp == 0,
        };
        debug!(
            combat = %self.id,
            participant = %id,
            amount,
            %damage_type,
            hp = current_hp,
            "damage dealt"
        );
        self.touch();
        Ok(outcome)
    }

    /// Add hit points, clamping at the participant's maximum.
    pub fn heal(&mut self, id: ParticipantId, amount: i32) -> Result<HealOutcome, CombatError> {
        self.ensure_not_ended("heal")?;
        check_amount("healing", amount)?;
        let index = self.index_of(id)?;

        let participant = &mut self.participants[index];
        let previous_hp = participant.current_hp;
        let current_hp = previous_hp.saturating_add(amount).min(participant.max_hp);
        participant.current_hp = current_hp;

        debug!(combat = %self.id, participant = %id, amount, hp = current_hp, "healed");
        self.touch();
        Ok(HealOutcome {
            participant_id: id,
            amount,
            previous_hp,
            current_hp,
        })
    }

    // ------------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------------

    /// Apply a condition; one already present under the same name is replaced.
    pub fn apply_condition(
        &mut self,
        id: ParticipantId,
        condition: Condition,
    ) -> Result<(), CombatError> {
        self.ensure_not_ended("apply a condition")?;
        if condition.name.trim().is_empty() {
            return Err(CombatError::InvariantViolation(
                "condition name is empty".to_string(),
            ));
        }
        if condition.duration_rounds == Some(0) {
            return Err(CombatError::InvariantViolation(format!(
                "condition '{}' has a zero-round duration",
                condition.name
            )));
        }
        let index = self.index_of(id)?;

        let participant = &mut self.participants[index];
        debug!(
            combat = %self.id,
            participant = %id,
            condition = %condition.name,
            rounds = ?condition.duration_rounds,
            "condition applied"
        );
        match participant
            .conditions
            .iter_mut()
            .find(|c| c.is_named(&condition.name))
        {
            Some(existing) => *existing = condition,
            None => participant.conditions.push(condition),
        }
        self.touch();
        Ok(())
    }

    pub fn remove_condition(
        &mut self,
        id: ParticipantId,
        name: &str,
    ) -> Result<Condition, CombatError> {
        self.ensure_not_ended("remove a condition")?;
        let index = self.index_of(id)?;

        let participant = &mut self.participants[index];
        let position = participant
            .conditions
            .iter()
            .position(|c| c.is_named(name))
            .ok_or_else(|| CombatError::ConditionNotFound {
                participant: id,
                condition: name.to_string(),
            })?;
        let removed = participant.conditions.remove(position);

        debug!(combat = %self.id, participant = %id, condition = %removed.name, "condition removed");
        self.touch();
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn pause(&mut self) -> Result<(), CombatError> {
        self.ensure_status("pause", CombatStatus::Active)?;
        self.status = CombatStatus::Paused;
        info!(combat = %self.id, round = self.round, "combat paused");
        self.touch();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), CombatError> {
        self.ensure_status("resume", CombatStatus::Paused)?;
        self.status = CombatStatus::Active;
        info!(combat = %self.id, round = self.round, "combat resumed");
        self.touch();
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), CombatError> {
        self.ensure_not_ended("end combat")?;
        self.status = CombatStatus::Ended;
        info!(combat = %self.id, round = self.round, "combat ended");
        self.touch();
        Ok(())
    }

    /// Set or clear the per-turn time limit in seconds.
    pub fn set_turn_time_limit(&mut self, seconds: Option<u32>) -> Result<(), CombatError> {
        self.ensure_not_ended("set the turn time limit")?;
        if seconds == Some(0) {
            return Err(CombatError::InvariantViolation(
                "turn time limit must be positive".to_string(),
            ));
        }
        self.turn_time_limit = seconds;
        debug!(combat = %self.id, seconds = ?seconds, "turn time limit set");
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------------

    /// Check the structural invariants; used when loading a snapshot.
    pub fn validate(&self) -> Result<(), CombatError> {
        if self.round < 1 {
            return Err(CombatError::InvariantViolation(
                "round must be at least 1".to_string(),
            ));
        }
        if !self.participants.is_empty() && self.turn_index >= self.participants.len() {
            return Err(CombatError::InvariantViolation(format!(
                "turn index {} out of range for {} participants",
                self.turn_index,
                self.participants.len()
            )));
        }
        if self.participants.is_empty() && self.turn_index != 0 {
            return Err(CombatError::InvariantViolation(
                "turn index must be 0 with no participants".to_string(),
            ));
        }
        for (index, participant) in self.participants.iter().enumerate() {
            if participant.rank != index {
                return Err(CombatError::InvariantViolation(format!(
                    "participant {} has rank {} at position {index}",
                    participant.id, participant.rank
                )));
            }
            if participant.max_hp < 1
                || participant.current_hp < 0
                || participant.current_hp > participant.max_hp
            {
                return Err(CombatError::InvariantViolation(format!(
                    "participant {} has {} of {} HP",
                    participant.id, participant.current_hp, participant.max_hp
                )));
            }
            if participant.seq >= self.next_seq {
                return Err(CombatError::InvariantViolation(format!(
                    "participant {} has sequence {} beyond {}",
                    participant.id, participant.seq, self.next_seq
                )));
            }
            if participant.conditions.iter().any(|c| c.duration_rounds == Some(0)) {
                return Err(CombatError::InvariantViolation(format!(
                    "participant {} holds an expired condition",
                    participant.id
                )));
            }
        }
        for (i, a) in self.participants.iter().enumerate() {
            if self.participants[i + 1..].iter().any(|b| b.id == a.id) {
                return Err(CombatError::InvariantViolation(format!(
                    "duplicate participant {}",
                    a.id
                )));
            }
        }
        Ok(())
    }

    fn ensure_status(&self, operation: &'static str, wanted: CombatStatus) -> Result<(), CombatError> {
        if self.status == wanted {
            Ok(())
        } else {
            Err(CombatError::InvalidTransition {
                operation,
                state: self.status,
            })
        }
    }

    fn ensure_not_ended(&self, operation: &'static str) -> Result<(), CombatError> {
        if self.status == CombatStatus::Ended {
            Err(CombatError::InvalidTransition {
                operation,
                state: self.status,
            })
        } else {
            Ok(())
        }
    }

    fn index_of(&self, id: ParticipantId) -> Result<usize, CombatError> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .ok_or(CombatError::NotFound(id))
    }

    /// Bump the round and tick every timed condition, returning those that ran out.
    fn start_round(&mut self) -> Vec<ExpiredCondition> {
        self.round += 1;
        let mut expired = Vec::new();
        for participant in &mut self.participants {
            let participant_id = participant.id;
            let mut kept = Vec::with_capacity(participant.conditions.len());
            for mut condition in participant.conditions.drain(..) {
                match condition.duration_rounds {
                    Some(rounds) if rounds <= 1 => {
                        condition.duration_rounds = Some(0);
                        expired.push(ExpiredCondition {
                            participant_id,
                            condition,
                        });
                    }
                    Some(rounds) => {
                        condition.duration_rounds = Some(rounds - 1);
                        kept.push(condition);
                    }
                    None => kept.push(condition),
                }
            }
            participant.conditions = kept;
        }
        expired
    }

    fn rerank(&mut self) {
        for (rank, participant) in self.participants.iter_mut().enumerate() {
            participant.rank = rank;
        }
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

fn check_amount(kind: &str, amount: i32) -> Result<(), CombatError> {
    if amount < 0 {
        Err(CombatError::InvariantViolation(format!(
            "{kind} amount must not be negative, got {amount}"
        )))
    } else {
        Ok(())
    }
}

fn check_armor_class(ac: i32) -> Result<(), CombatError> {
    if ac < 0 {
        Err(CombatError::InvariantViolation(format!(
            "armor class must not be negative, got {ac}"
        )))
    } else {
        Ok(())
    }
}

//! Combat and resolution engine for tabletop role-playing games.
//!
//! This crate provides:
//! - Dice notation parsing and rolling with advantage, rerolls, exploding
//!   dice and keep-highest/lowest
//! - Derived character statistics with a bounded memo cache
//! - A turn-based combat state machine with initiative, hit points and
//!   timed conditions
//! - A command/event layer, versioned snapshots and an async encounter registry
//!
//! # Quick Start
//!
//! ```ignore
//! use tabletop_core::{CombatCommand, EncounterRegistry, EngineConfig, GameId, ParticipantSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = EncounterRegistry::new(EngineConfig::default())?;
//!     let combat = registry.create(GameId::new(), "Goblin Ambush").await;
//!
//!     let spec = ParticipantSpec::npc("Goblin", 7).with_initiative_modifier(2);
//!     registry.execute(combat, CombatCommand::AddParticipant { spec }, None).await?;
//!     let update = registry.execute(combat, CombatCommand::RollInitiative, None).await?;
//!     println!("{:?}", update.events);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod character;
pub mod combat;
pub mod config;
pub mod dice;
pub mod persist;
pub mod rules;
pub mod session;
pub mod stats;
pub mod testing;

// Primary public API
pub use character::{
    Ability, AbilityScores, ArmorClass, ArmorType, CharacterClass, CharacterId,
    CharacterSnapshot, ClassLevel, ProficiencyLevel, ScoreError, Skill,
};
pub use combat::{
    Combat, CombatError, CombatId, CombatStatus, Condition, DamageType, GameId, Participant,
    ParticipantId, ParticipantSpec, ParticipantUpdate,
};
pub use config::{ConfigError, EngineConfig};
pub use dice::{Advantage, DiceFormula, DieRoller, ParseError, RollOptions, RollOutcome};
pub use persist::{EncounterSnapshot, PersistError};
pub use rules::{CombatCommand, CombatEvent};
pub use session::{EncounterRegistry, EncounterUpdate, SessionError};
pub use stats::{DerivedStatistics, StatisticsCalculator};
pub use testing::ScriptedRoller;

//! EncounterRegistry - the async entry point for running encounters.
//!
//! The registry owns every live [`Combat`] and is the single serialization
//! point per encounter: commands for one encounter run one at a time behind
//! its mutex, while different encounters proceed independently. After each
//! command the new state and its events are fanned out to subscribers.

use crate::character::CharacterSnapshot;
use crate::combat::{Combat, CombatError, CombatId, GameId, ParticipantSpec};
use crate::config::{ConfigError, EngineConfig};
use crate::dice::{DieRoller, RollOptions};
use crate::persist::{self, PersistError};
use crate::rules::{self, CombatCommand, CombatEvent};
use crate::stats::StatisticsCalculator;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Combat error: {0}")]
    Combat(#[from] CombatError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown encounter: {0}")]
    UnknownEncounter(CombatId),

    #[error("Encounter already registered: {0}")]
    AlreadyRegistered(CombatId),

    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
}

/// The state after one command, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterUpdate {
    pub combat_id: CombatId,
    /// `combat.version()` after the command.
    pub version: u64,
    pub combat: Combat,
    pub events: Vec<CombatEvent>,
}

struct Encounter {
    combat: Mutex<Combat>,
    updates: broadcast::Sender<EncounterUpdate>,
}

/// Live encounters keyed by id.
pub struct EncounterRegistry {
    encounters: RwLock<HashMap<CombatId, Arc<Encounter>>>,
    config: EngineConfig,
    statistics: StatisticsCalculator,
    rng: parking_lot::Mutex<StdRng>,
}

impl EncounterRegistry {
    /// Create a registry with a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::build(config, StdRng::from_entropy()))
    }

    /// Same as [`Self::new`] with a deterministic random source.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::build(config, StdRng::seed_from_u64(seed)))
    }

    fn build(config: EngineConfig, rng: StdRng) -> Self {
        Self {
            encounters: RwLock::new(HashMap::new()),
            statistics: StatisticsCalculator::from_config(&config),
            config,
            rng: parking_lot::Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared statistics calculator.
    pub fn statistics(&self) -> &StatisticsCalculator {
        &self.statistics
    }

    /// Start tracking a new, empty encounter.
    pub async fn create(&self, game_id: GameId, name: &str) -> CombatId {
        let combat = Combat::new(game_id, name);
        let id = combat.id();
        self.encounters
            .write()
            .await
            .insert(id, Arc::new(self.encounter(combat)));
        info!(combat = %id, name, "encounter opened");
        id
    }

    /// Track an existing encounter, e.g. one the caller loaded itself.
    pub async fn insert(&self, combat: Combat) -> Result<CombatId, SessionError> {
        combat.validate()?;
        let id = combat.id();
        let mut encounters = self.encounters.write().await;
        if encounters.contains_key(&id) {
            return Err(SessionError::AlreadyRegistered(id));
        }
        encounters.insert(id, Arc::new(self.encounter(combat)));
        info!(combat = %id, "encounter registered");
        Ok(id)
    }

    /// Decode snapshot JSON and track the encounter.
    pub async fn load(&self, json: &str) -> Result<CombatId, SessionError> {
        let combat = persist::load_combat(json)?;
        self.insert(combat).await
    }

    /// Encode an encounter's current state as snapshot JSON.
    pub async fn save(&self, id: CombatId) -> Result<String, SessionError> {
        let combat = self.snapshot(id).await?;
        Ok(persist::save_combat(&combat)?)
    }

    /// Stop tracking an encounter and return its final state.
    ///
    /// Subscribers see their channel close.
    pub async fn close(&self, id: CombatId) -> Result<Combat, SessionError> {
        let encounter = self
            .encounters
            .write()
            .await
            .remove(&id)
            .ok_or(SessionError::UnknownEncounter(id))?;
        let combat = encounter.combat.lock().await.clone();
        info!(combat = %id, round = combat.round(), "encounter closed");
        Ok(combat)
    }

    /// A copy of the encounter's current state.
    pub async fn snapshot(&self, id: CombatId) -> Result<Combat, SessionError> {
        let encounter = self.get(id).await?;
        let combat = encounter.combat.lock().await;
        Ok(combat.clone())
    }

    pub async fn subscribe(
        &self,
        id: CombatId,
    ) -> Result<broadcast::Receiver<EncounterUpdate>, SessionError> {
        Ok(self.get(id).await?.updates.subscribe())
    }

    pub async fn ids(&self) -> Vec<CombatId> {
        self.encounters.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.encounters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.encounters.read().await.is_empty()
    }

    /// Run a command using the registry's random source.
    ///
    /// With `expected_version` set, the command is rejected unless the
    /// encounter is still at that version.
    pub async fn execute(
        &self,
        id: CombatId,
        command: CombatCommand,
        expected_version: Option<u64>,
    ) -> Result<EncounterUpdate, SessionError> {
        let encounter = self.get(id).await?;
        let mut combat = encounter.combat.lock().await;
        let update = apply(
            &encounter,
            &mut combat,
            command,
            expected_version,
            &self.config.roll_options(),
            &mut *self.rng.lock(),
        )?;
        Ok(update)
    }

    /// Run a command with a caller-supplied random source.
    pub async fn execute_with<R: DieRoller + ?Sized>(
        &self,
        id: CombatId,
        command: CombatCommand,
        expected_version: Option<u64>,
        roller: &mut R,
    ) -> Result<EncounterUpdate, SessionError> {
        let encounter = self.get(id).await?;
        let mut combat = encounter.combat.lock().await;
        apply(
            &encounter,
            &mut combat,
            command,
            expected_version,
            &self.config.roll_options(),
            roller,
        )
    }

    /// Add a stored character, using its derived hit points and initiative.
    pub async fn add_character(
        &self,
        id: CombatId,
        character: &CharacterSnapshot,
    ) -> Result<EncounterUpdate, SessionError> {
        let stats = self.statistics.calculate(character);
        let spec = ParticipantSpec::from_character(character, &stats);
        self.execute(id, CombatCommand::AddParticipant { spec }, None)
            .await
    }

    fn encounter(&self, combat: Combat) -> Encounter {
        let (updates, _) = broadcast::channel(self.config.event_channel_capacity);
        Encounter {
            combat: Mutex::new(combat),
            updates,
        }
    }

    async fn get(&self, id: CombatId) -> Result<Arc<Encounter>, SessionError> {
        self.encounters
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::UnknownEncounter(id))
    }
}

fn apply<R: DieRoller + ?Sized>(
    encounter: &Encounter,
    combat: &mut Combat,
    command: CombatCommand,
    expected_version: Option<u64>,
    limits: &RollOptions,
    roller: &mut R,
) -> Result<EncounterUpdate, SessionError> {
    if let Some(expected) = expected_version {
        if combat.version() != expected {
            return Err(SessionError::VersionConflict {
                expected,
                found: combat.version(),
            });
        }
    }

    let events = rules::execute_with_options(combat, command, limits, roller)?;
    let update = EncounterUpdate {
        combat_id: combat.id(),
        version: combat.version(),
        combat: combat.clone(),
        events,
    };
    // No subscribers is not an error.
    let receivers = encounter.updates.send(update.clone()).unwrap_or(0);
    debug!(
        combat = %update.combat_id,
        version = update.version,
        events = update.events.len(),
        receivers,
        "encounter updated"
    );
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatStatus;
    use crate::testing::{sample_fighter, ScriptedRoller};

    fn registry() -> EncounterRegistry {
        EncounterRegistry::with_seed(EngineConfig::default(), 7).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_close() {
        let registry = registry();
        let id = registry.create(GameId::new(), "Tavern Brawl").await;
        assert_eq!(registry.len().await, 1);

        let combat = registry.close(id).await.unwrap();
        assert_eq!(combat.name(), "Tavern Brawl");
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.snapshot(id).await,
            Err(SessionError::UnknownEncounter(_))
        ));
    }

    #[tokio::test]
    async fn test_add_character_uses_derived_stats() {
        let registry = registry();
        let id = registry.create(GameId::new(), "Arena").await;
        let fighter = sample_fighter("Roland");

        let update = registry.add_character(id, &fighter).await.unwrap();
        let participant = &update.combat.participants()[0];
        assert_eq!(participant.character_id(), Some(fighter.id));
        assert_eq!(participant.max_hp, 12);
        assert_eq!(participant.initiative_modifier, 1);
    }

    #[tokio::test]
    async fn test_version_conflict_is_rejected() {
        let registry = registry();
        let id = registry.create(GameId::new(), "Arena").await;
        let update = registry
            .execute(
                id,
                CombatCommand::AddParticipant {
                    spec: ParticipantSpec::npc("Bandit", 11),
                },
                Some(0),
            )
            .await
            .unwrap();
        assert_eq!(update.version, 1);

        let err = registry
            .execute(id, CombatCommand::End, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::VersionConflict {
                expected: 0,
                found: 1
            }
        ));
        assert_eq!(
            registry.snapshot(id).await.unwrap().status(),
            CombatStatus::Inactive
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_updates() {
        let registry = registry();
        let id = registry.create(GameId::new(), "Arena").await;
        let mut updates = registry.subscribe(id).await.unwrap();

        registry
            .execute(
                id,
                CombatCommand::AddParticipant {
                    spec: ParticipantSpec::npc("Bandit", 11),
                },
                None,
            )
            .await
            .unwrap();
        let mut roller = ScriptedRoller::constant(12);
        registry
            .execute_with(id, CombatCommand::RollInitiative, None, &mut roller)
            .await
            .unwrap();

        let first = updates.recv().await.unwrap();
        assert_eq!(first.version, 1);
        let second = updates.recv().await.unwrap();
        assert_eq!(second.combat.status(), CombatStatus::Active);
        assert_eq!(second.combat.participants()[0].initiative, 12);
        assert!(second.events.contains(&CombatEvent::CombatStarted));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let registry = registry();
        let id = registry.create(GameId::new(), "Arena").await;
        registry
            .execute(
                id,
                CombatCommand::AddParticipant {
                    spec: ParticipantSpec::npc("Bandit", 11),
                },
                None,
            )
            .await
            .unwrap();
        let json = registry.save(id).await.unwrap();

        assert!(matches!(
            registry.load(&json).await,
            Err(SessionError::AlreadyRegistered(_))
        ));

        let other = registry_with_json(&json).await;
        assert_eq!(other, id);
    }

    async fn registry_with_json(json: &str) -> CombatId {
        let registry = registry();
        registry.load(json).await.unwrap()
    }

    #[tokio::test]
    async fn test_configured_critical_threshold_applies_to_rolls() {
        let config = EngineConfig::default().with_critical_threshold(19);
        let registry = EncounterRegistry::with_seed(config, 7).unwrap();
        let id = registry.create(GameId::new(), "Arena").await;

        let mut roller = ScriptedRoller::constant(19);
        let update = registry
            .execute_with(
                id,
                CombatCommand::Roll {
                    notation: "1d20+4".to_string(),
                    options: RollOptions::default(),
                    purpose: Some("attack".to_string()),
                },
                None,
                &mut roller,
            )
            .await
            .unwrap();
        assert!(matches!(
            &update.events[0],
            CombatEvent::DiceRolled { roll, .. } if roll.is_critical && roll.total == 23
        ));
    }

    #[tokio::test]
    async fn test_configured_explosion_cap_limits_rolls() {
        let config = EngineConfig::default().with_max_explosions(1);
        let registry = EncounterRegistry::with_seed(config, 7).unwrap();
        let id = registry.create(GameId::new(), "Arena").await;
        let update = registry
            .execute(
                id,
                CombatCommand::AddParticipant {
                    spec: ParticipantSpec::npc("Ogre", 100),
                },
                None,
            )
            .await
            .unwrap();
        let ogre = update.combat.participants()[0].id;

        let mut roller = ScriptedRoller::constant(6);
        let update = registry
            .execute_with(
                id,
                CombatCommand::Roll {
                    notation: "1d6".to_string(),
                    options: RollOptions::new().exploding(),
                    purpose: None,
                },
                None,
                &mut roller,
            )
            .await
            .unwrap();
        assert!(matches!(
            &update.events[0],
            CombatEvent::DiceRolled { roll, .. } if roll.total == 12
        ));

        let mut roller = ScriptedRoller::constant(3);
        registry
            .execute_with(
                id,
                CombatCommand::RollDamage {
                    participant_id: ogre,
                    formula: "2d6+1".to_string(),
                    damage_type: crate::combat::DamageType::Bludgeoning,
                    critical: false,
                },
                None,
                &mut roller,
            )
            .await
            .unwrap();
        assert_eq!(
            registry.snapshot(id).await.unwrap().participant(ogre).unwrap().current_hp,
            93
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig::default().with_event_channel_capacity(0);
        assert!(matches!(
            EncounterRegistry::new(config),
            Err(SessionError::Config(_))
        ));
    }
}

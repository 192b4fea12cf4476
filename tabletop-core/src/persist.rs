//! Versioned encounter snapshots.
//!
//! The engine never touches storage itself; callers hand the JSON text to
//! whatever backend they use. Loading checks the format version and the
//! combat invariants before handing an encounter back.

use crate::combat::{Combat, CombatError, CombatId, CombatStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from snapshot encoding and decoding.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid snapshot format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid snapshot: {0}")]
    Invalid(#[from] CombatError),
}

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A saved encounter with everything needed to resume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterSnapshot {
    /// Snapshot format version for compatibility checking.
    pub version: u32,

    pub combat: Combat,

    pub metadata: SnapshotMetadata,
}

/// Summary fields readable without validating the whole encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub combat_id: CombatId,
    pub name: String,
    pub status: CombatStatus,
    pub round: u32,
    pub participant_count: usize,
    /// The combat's mutation counter at save time.
    pub combat_version: u64,
}

impl EncounterSnapshot {
    pub fn new(combat: Combat) -> Self {
        let metadata = SnapshotMetadata {
            combat_id: combat.id(),
            name: combat.name().to_string(),
            status: combat.status(),
            round: combat.round(),
            participant_count: combat.participants().len(),
            combat_version: combat.version(),
        };
        Self {
            version: SNAPSHOT_VERSION,
            combat,
            metadata,
        }
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode and validate a snapshot.
    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        let snapshot: Self = serde_json::from_str(json)?;
        check_version(snapshot.version)?;
        snapshot.combat.validate()?;
        if snapshot.metadata.combat_id != snapshot.combat.id() {
            return Err(PersistError::InvalidFormat);
        }
        Ok(snapshot)
    }

    /// Read just the metadata without decoding the encounter.
    pub fn peek_metadata(json: &str) -> Result<SnapshotMetadata, PersistError> {
        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SnapshotMetadata,
        }

        let partial: Partial = serde_json::from_str(json)?;
        check_version(partial.version)?;
        Ok(partial.metadata)
    }

    pub fn into_combat(self) -> Combat {
        self.combat
    }
}

/// Encode a combat as snapshot JSON.
pub fn save_combat(combat: &Combat) -> Result<String, PersistError> {
    EncounterSnapshot::new(combat.clone()).to_json()
}

/// Decode and validate snapshot JSON back into a combat.
pub fn load_combat(json: &str) -> Result<Combat, PersistError> {
    Ok(EncounterSnapshot::from_json(json)?.into_combat())
}

fn check_version(found: u32) -> Result<(), PersistError> {
    if found == SNAPSHOT_VERSION {
        Ok(())
    } else {
        Err(PersistError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Condition, DamageType, GameId, ParticipantSpec};
    use crate::testing::ScriptedRoller;

    fn sample_combat() -> Combat {
        let mut combat = Combat::new(GameId::new(), "Goblin Ambush");
        let goblin = combat
            .add_participant(ParticipantSpec::npc("Goblin", 7).with_armor_class(15))
            .unwrap();
        combat
            .add_participant(ParticipantSpec::npc("Hobgoblin", 11).hidden())
            .unwrap();
        combat
            .roll_initiative(&mut ScriptedRoller::new([14, 9]))
            .unwrap();
        combat.deal_damage(goblin, 3, DamageType::Piercing).unwrap();
        combat
            .apply_condition(goblin, Condition::new("Prone").lasting(2))
            .unwrap();
        combat
    }

    #[test]
    fn test_snapshot_round_trip() {
        let combat = sample_combat();
        let json = save_combat(&combat).unwrap();
        let loaded = load_combat(&json).unwrap();
        assert_eq!(loaded, combat);
    }

    #[test]
    fn test_peek_metadata() {
        let combat = sample_combat();
        let json = save_combat(&combat).unwrap();
        let metadata = EncounterSnapshot::peek_metadata(&json).unwrap();
        assert_eq!(metadata.name, "Goblin Ambush");
        assert_eq!(metadata.status, CombatStatus::Active);
        assert_eq!(metadata.participant_count, 2);
        assert_eq!(metadata.combat_version, combat.version());
    }

    #[test]
    fn test_version_mismatch() {
        let mut snapshot = EncounterSnapshot::new(sample_combat());
        snapshot.version = 99;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(matches!(
            EncounterSnapshot::from_json(&json),
            Err(PersistError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
        assert!(EncounterSnapshot::peek_metadata(&json).is_err());
    }

    #[test]
    fn test_rejects_broken_invariants() {
        let json = save_combat(&sample_combat()).unwrap();

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["combat"]["turn_index"] = serde_json::json!(5);
        assert!(matches!(
            load_combat(&value.to_string()),
            Err(PersistError::Invalid(CombatError::InvariantViolation(_)))
        ));

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["combat"]["participants"][0]["current_hp"] = serde_json::json!(500);
        assert!(load_combat(&value.to_string()).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["combat"]["round"] = serde_json::json!(0);
        assert!(load_combat(&value.to_string()).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["combat"]["participants"][1]["rank"] = serde_json::json!(0);
        assert!(load_combat(&value.to_string()).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            load_combat("not json"),
            Err(PersistError::Json(_))
        ));
    }
}

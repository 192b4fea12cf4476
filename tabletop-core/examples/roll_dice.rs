//! Roll a few formulas and run a short encounter.
//!
//! Run with: `cargo run -p tabletop-core --example roll_dice`

use tabletop_core::dice::{self, RollOptions};
use tabletop_core::{CombatCommand, DamageType, EncounterRegistry, EngineConfig, GameId, ParticipantSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Dice ===\n");
    for notation in ["1d20", "2d6+3", "4d6kh3", "1d100", "8d6", "1d6+1d4-1"] {
        println!("{}", dice::roll(notation)?);
    }

    let mut rng = rand::thread_rng();
    let options = RollOptions::new().with_advantage();
    println!("{}", dice::roll_with_options("1d20+5", &options, &mut rng)?);

    println!("\n=== Encounter ===\n");
    let registry = EncounterRegistry::new(EngineConfig::default())?;
    let combat = registry.create(GameId::new(), "Goblin Ambush").await;

    let mut goblin = None;
    for (name, hp) in [("Goblin", 7), ("Wolf", 11)] {
        let spec = ParticipantSpec::npc(name, hp).with_initiative_modifier(2);
        let update = registry
            .execute(combat, CombatCommand::AddParticipant { spec }, None)
            .await?;
        goblin.get_or_insert(update.combat.participants()[0].id);
    }

    let update = registry
        .execute(combat, CombatCommand::RollInitiative, None)
        .await?;
    for participant in update.combat.participants() {
        println!(
            "{:>8}: initiative {}",
            participant.display_name().unwrap_or("?"),
            participant.initiative
        );
    }

    if let Some(goblin) = goblin {
        let update = registry
            .execute(
                combat,
                CombatCommand::RollDamage {
                    participant_id: goblin,
                    formula: "1d8+3".to_string(),
                    damage_type: DamageType::Slashing,
                    critical: false,
                },
                None,
            )
            .await?;
        for event in update.events {
            println!("{event:?}");
        }
    }

    Ok(())
}

//! Property tests for dice, hit points and turn order.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tabletop_core::combat::{Combat, DamageType, GameId, ParticipantSpec};
use tabletop_core::dice::{DiceFormula, DiceTerm, RollOptions};
use tabletop_core::stats::ability_modifier;
use tabletop_core::testing::ScriptedRoller;

fn dice_term() -> impl Strategy<Value = DiceTerm> {
    (1u32..20, 2u32..=100, any::<bool>(), 0u32..3).prop_flat_map(|(count, sides, negative, keep_kind)| {
        (1u32..=count).prop_map(move |keep| {
            let term = DiceTerm {
                negative,
                ..DiceTerm::new(count, sides)
            };
            match keep_kind {
                0 => term,
                1 => term.keep_highest(keep),
                _ => term.keep_lowest(keep),
            }
        })
    })
}

fn formula() -> impl Strategy<Value = DiceFormula> {
    (prop::collection::vec(dice_term(), 1..4), -50i32..50)
        .prop_map(|(terms, modifier)| DiceFormula { terms, modifier })
}

proptest! {
    /// NdM+K with a constant face v always totals v*N + K.
    #[test]
    fn prop_constant_roller_total(
        count in 1u32..30,
        sides in 2u32..100,
        face_seed in 0u32..1000,
        modifier in -20i32..20
    ) {
        let face = 1 + face_seed % sides;
        let formula = DiceFormula::single(count, sides, modifier);
        let mut roller = ScriptedRoller::constant(face);
        let outcome = formula.roll_with(&RollOptions::default(), &mut roller);

        prop_assert_eq!(outcome.total, (face * count) as i32 + modifier);
        prop_assert_eq!(outcome.dice.len(), count as usize);
    }

    /// Rendering a formula and parsing it back gives the same formula.
    #[test]
    fn prop_format_parse_round_trip(formula in formula()) {
        let text = formula.to_string();
        let parsed = DiceFormula::parse(&text);
        prop_assert_eq!(parsed, Ok(formula), "notation {}", text);
    }

    /// Random rolls stay within the formula's range.
    #[test]
    fn prop_single_term_total_in_range(
        count in 1u32..10,
        sides in 2u32..=100,
        modifier in -10i32..10,
        seed in any::<u64>()
    ) {
        let formula = DiceFormula::single(count, sides, modifier);
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = formula.roll_with(&RollOptions::default(), &mut rng);

        let low = count as i32 + modifier;
        let high = (count * sides) as i32 + modifier;
        prop_assert!(outcome.total >= low && outcome.total <= high);
        prop_assert!(outcome.dice.iter().all(|&d| (1..=sides).contains(&d)));
    }

    /// Advantage keeps the higher d20, disadvantage the lower.
    #[test]
    fn prop_advantage_picks_extreme(a in 1u32..=20, b in 1u32..=20) {
        let formula = DiceFormula::d20(0);

        let mut roller = ScriptedRoller::new([a, b]);
        let outcome = formula.roll_with(&RollOptions::new().with_advantage(), &mut roller);
        prop_assert_eq!(outcome.total, a.max(b) as i32);

        let mut roller = ScriptedRoller::new([a, b]);
        let outcome = formula.roll_with(&RollOptions::new().with_disadvantage(), &mut roller);
        prop_assert_eq!(outcome.total, a.min(b) as i32);
    }

    #[test]
    fn prop_ability_modifier_is_floor(score in 1i32..=30) {
        prop_assert_eq!(ability_modifier(score), (score - 10).div_euclid(2));
        prop_assert!(ability_modifier(score) * 2 <= score - 10);
    }

    /// No sequence of damage and healing leaves HP outside [0, max].
    #[test]
    fn prop_hp_stays_clamped(
        max_hp in 1i32..200,
        ops in prop::collection::vec((any::<bool>(), 0i32..300), 1..40)
    ) {
        let mut combat = Combat::new(GameId::new(), "Property");
        let id = combat.add_participant(ParticipantSpec::npc("Dummy", max_hp)).unwrap();

        for (is_damage, amount) in ops {
            if is_damage {
                combat.deal_damage(id, amount, DamageType::Force).unwrap();
            } else {
                combat.heal(id, amount).unwrap();
            }
            let hp = combat.participant(id).unwrap().current_hp;
            prop_assert!((0..=max_hp).contains(&hp));
        }
    }

    /// Advancing once per participant returns to the same cursor, one round later.
    #[test]
    fn prop_full_cycle_adds_one_round(
        participants in 1usize..8,
        start in 0usize..8,
        seed in any::<u64>()
    ) {
        let mut combat = Combat::new(GameId::new(), "Cycle");
        for i in 0..participants {
            combat
                .add_participant(ParticipantSpec::npc(format!("P{i}"), 10))
                .unwrap();
        }
        combat.roll_initiative(&mut StdRng::seed_from_u64(seed)).unwrap();
        for _ in 0..start % participants {
            combat.advance_turn().unwrap();
        }

        let index = combat.turn_index();
        let round = combat.round();
        for _ in 0..participants {
            combat.advance_turn().unwrap();
        }
        prop_assert_eq!(combat.turn_index(), index);
        prop_assert_eq!(combat.round(), round + 1);
    }
}

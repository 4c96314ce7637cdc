//! End-to-end pipeline tests over a synthesized in-memory ROM.

use pretty_assertions::assert_eq;

use randomizer_core::container::RomContainer;
use randomizer_core::context::Context;
use randomizer_core::filters::Filter;
use randomizer_core::steps::{IvMode, Step};
use randomizer_core::tables::{
    data_flags, species_flags, EncounterArea, EncounterSlot, EncounterTable, SpeciesRecord,
    SpeciesTable, StarterSet, StarterSlot, TeamEntry, Trainer, TrainerTable,
};
use randomizer_core::RandomizerError;

const GAME_CODE: [u8; 12] = *b"TESTPKMN0000";

fn species(id: u16, stat: u8, flags: u8) -> SpeciesRecord {
    SpeciesRecord {
        id,
        stats: [stat; 6],
        types: [0, 0],
        flags,
        pre_evolution: 0,
        evolves_into: 0,
        evolution_method: 0,
    }
}

fn fixture_species() -> SpeciesTable {
    SpeciesTable::from_records(vec![
        species(0, 0, 0), // blank sentinel
        species(1, 50, 0),
        species(2, 52, 0),
        species(3, 55, 0),
        species(4, 53, 0),
        species(5, 80, 0),
        species(6, 110, species_flags::LEGENDARY),
        species(7, 112, species_flags::MYTHICAL),
        species(8, 54, 0),
        species(9, 51, 0),
    ])
}

fn fixture_trainers() -> TrainerTable {
    TrainerTable {
        trainers: vec![
            Trainer {
                id: 1,
                class: 10,
                data_flags: 0,
                boss: false,
                team: vec![TeamEntry::new(1, 10), TeamEntry::new(2, 12)],
            },
            Trainer {
                id: 2,
                class: 60,
                data_flags: 0,
                boss: true,
                // Duplicated species on purpose: stable mapping must give
                // both slots the same replacement.
                team: vec![
                    TeamEntry::new(3, 20),
                    TeamEntry::new(3, 22),
                    TeamEntry::new(4, 24),
                ],
            },
        ],
    }
}

fn fixture_encounters() -> EncounterTable {
    EncounterTable {
        areas: vec![
            EncounterArea {
                area_id: 1,
                slots: vec![
                    EncounterSlot { species: 1, min_level: 4, max_level: 7 },
                    EncounterSlot { species: 1, min_level: 5, max_level: 8 },
                    EncounterSlot { species: 2, min_level: 6, max_level: 9 },
                ],
            },
            EncounterArea {
                area_id: 2,
                slots: vec![EncounterSlot { species: 8, min_level: 30, max_level: 35 }],
            },
        ],
    }
}

fn fixture_starters() -> StarterSet {
    StarterSet {
        slots: [
            StarterSlot { species: 1, level: 5 },
            StarterSlot { species: 2, level: 5 },
            StarterSlot { species: 3, level: 5 },
        ],
    }
}

fn fixture_rom() -> RomContainer {
    let species = fixture_species().to_bytes();
    let trainers = fixture_trainers().to_bytes().unwrap();
    let encounters = fixture_encounters().to_bytes().unwrap();
    let starters = fixture_starters().to_bytes();
    RomContainer::from_entries(
        GAME_CODE,
        &[
            ("data/species.tbl", species.as_slice()),
            ("data/trainers.tbl", trainers.as_slice()),
            ("data/encounters.tbl", encounters.as_slice()),
            ("data/starters.bin", starters.as_slice()),
        ],
    )
    .unwrap()
}

fn run_to_bytes(seed: u64, steps: &[Step]) -> Vec<u8> {
    let mut ctx = Context::new(fixture_rom(), seed);
    ctx.run_pipeline(steps).unwrap();
    ctx.flush_to_bytes().unwrap()
}

fn decode_trainers(image: Vec<u8>) -> TrainerTable {
    let rom = RomContainer::from_bytes(image).unwrap();
    TrainerTable::from_bytes(&rom.read_entry("data/trainers.tbl").unwrap()).unwrap()
}

fn decode_encounters(image: Vec<u8>) -> EncounterTable {
    let rom = RomContainer::from_bytes(image).unwrap();
    EncounterTable::from_bytes(&rom.read_entry("data/encounters.tbl").unwrap()).unwrap()
}

#[test]
fn identical_seed_and_steps_give_byte_identical_output() {
    let steps = vec![
        Step::ExpandTrainerTeams { bosses_only: false, target_size: 4 },
        Step::TrainerLevelMultiplier { multiplier: 1.3 },
        Step::RandomizeTrainers { filter: Filter::All(Vec::new()), independent: false },
        Step::RandomizeEncounters { filter: Filter::All(Vec::new()), independent: true },
        Step::RandomizeStarters { filter: Filter::All(Vec::new()), independent: false },
        Step::RandomizeIvs { mode: IvMode::Scaling },
    ];
    assert_eq!(run_to_bytes(42, &steps), run_to_bytes(42, &steps));
}

#[test]
fn multiplied_levels_are_scaled_and_clamped() {
    let image = run_to_bytes(
        1,
        &[Step::WildLevelMultiplier { multiplier: 4.0 }],
    );
    let encounters = decode_encounters(image);
    assert_eq!(encounters.areas[0].slots[0].min_level, 16);
    assert_eq!(encounters.areas[0].slots[0].max_level, 28);
    // Area 2 starts at 30/35: both clamp to the level cap.
    assert_eq!(encounters.areas[1].slots[0].min_level, 100);
    assert_eq!(encounters.areas[1].slots[0].max_level, 100);
}

#[test]
fn stable_mapping_reuses_one_replacement_per_species() {
    let image = run_to_bytes(
        7,
        &[Step::RandomizeTrainers { filter: Filter::All(Vec::new()), independent: false }],
    );
    let trainers = decode_trainers(image);
    let boss = &trainers.trainers[1];
    // Both slots held species 3 before randomization.
    assert_eq!(boss.team[0].species, boss.team[1].species);
}

#[test]
fn gym_randomization_with_filters_is_reproducible_and_scoped() {
    let excluded = [6u16, 7].into_iter().collect();
    let filter = Filter::All(vec![
        Filter::NotInSet(excluded),
        Filter::BstWithinFactor(0.15),
    ]);
    let steps = vec![Step::RandomizeGyms { filter, independent: false }];

    let first = decode_trainers(run_to_bytes(42, &steps));
    let second = decode_trainers(run_to_bytes(42, &steps));

    // Same seed, same mapping.
    for (a, b) in first.trainers.iter().zip(second.trainers.iter()) {
        assert_eq!(a.team, b.team);
    }

    // Only the boss trainer was touched, and no replacement is a legendary
    // or strays beyond 15% BST of the originals (species 3/4, BST 330/318).
    let original = fixture_trainers();
    assert_eq!(first.trainers[0].team, original.trainers[0].team);
    let species = fixture_species();
    for (slot, entry) in first.trainers[1].team.iter().enumerate() {
        let replacement = species.get(entry.species).unwrap();
        assert!(!replacement.is_special(), "slot {slot} got a special species");
        let reference = species.get(original.trainers[1].team[slot].species).unwrap();
        let delta = (replacement.bst() as f64 - reference.bst() as f64).abs();
        assert!(delta / reference.bst() as f64 <= 0.15);
    }
}

#[test]
fn expanding_a_team_appends_average_level_slots() {
    let image = run_to_bytes(
        3,
        &[Step::ExpandTrainerTeams { bosses_only: false, target_size: 3 }],
    );
    let trainers = decode_trainers(image);
    let trainer = &trainers.trainers[0];
    assert_eq!(trainer.team.len(), 3);
    // Slots 0-1 untouched.
    assert_eq!(trainer.team[0], TeamEntry::new(1, 10));
    assert_eq!(trainer.team[1], TeamEntry::new(2, 12));
    // New slot: half-up rounded mean of 10 and 12.
    assert_eq!(trainer.team[2].level, 11);
    assert!([1u16, 2].contains(&trainer.team[2].species));
}

#[test]
fn bosses_only_expansion_skips_ordinary_trainers() {
    let image = run_to_bytes(
        3,
        &[Step::ExpandTrainerTeams { bosses_only: true, target_size: 6 }],
    );
    let trainers = decode_trainers(image);
    assert_eq!(trainers.trainers[0].team.len(), 2);
    assert_eq!(trainers.trainers[1].team.len(), 6);
}

#[test]
fn gaining_the_moves_flag_adds_zeroed_move_slots() {
    let baseline = run_to_bytes(1, &[]);
    let image = run_to_bytes(
        1,
        &[Step::ChangeTrainerDataType { target_flags: data_flags::MOVES }],
    );

    let trainers = decode_trainers(image.clone());
    for trainer in &trainers.trainers {
        assert_eq!(trainer.data_flags, data_flags::MOVES);
        for entry in &trainer.team {
            assert_eq!(entry.moves, Some([0u16; 4]));
            assert_eq!(entry.item, None);
        }
    }

    // Five team entries across the fixture, 8 bytes of move slots each.
    let baseline_len = RomContainer::from_bytes(baseline)
        .unwrap()
        .read_entry("data/trainers.tbl")
        .unwrap()
        .len();
    let grown_len = RomContainer::from_bytes(image)
        .unwrap()
        .read_entry("data/trainers.tbl")
        .unwrap()
        .len();
    assert_eq!(grown_len - baseline_len, 5 * 8);
}

#[test]
fn unmutated_resources_still_round_trip_exactly() {
    // Loading the trainer table without mutating it and flushing must
    // reproduce the input payload byte for byte.
    let input = fixture_rom();
    let original = input.read_entry("data/trainers.tbl").unwrap();

    let mut ctx = Context::new(fixture_rom(), 5);
    ctx.run_pipeline(&[Step::TrainerLevelMultiplier { multiplier: 1.0 }])
        .unwrap();
    let image = ctx.flush_to_bytes().unwrap();

    let rom = RomContainer::from_bytes(image).unwrap();
    assert_eq!(rom.read_entry("data/trainers.tbl").unwrap(), original);
}

#[test]
fn dangling_species_reference_aborts_the_run() {
    let mut trainers = fixture_trainers();
    trainers.trainers[0].team[0].species = 999;
    let rom = RomContainer::from_entries(
        GAME_CODE,
        &[
            ("data/species.tbl", fixture_species().to_bytes().as_slice()),
            ("data/trainers.tbl", trainers.to_bytes().unwrap().as_slice()),
        ],
    )
    .unwrap();

    let mut ctx = Context::new(rom, 9);
    let err = ctx
        .run_pipeline(&[Step::RandomizeTrainers {
            filter: Filter::All(Vec::new()),
            independent: false,
        }])
        .unwrap_err();
    match err {
        RandomizerError::ReferentialIntegrity { step, detail } => {
            assert_eq!(step, "randomize-trainers");
            assert!(detail.contains("999"));
        }
        other => panic!("expected a referential integrity error, got {other}"),
    }
}

#[test]
fn invalid_step_configuration_is_rejected() {
    let mut ctx = Context::new(fixture_rom(), 1);
    let err = ctx
        .run_pipeline(&[Step::ExpandTrainerTeams { bosses_only: false, target_size: 7 }])
        .unwrap_err();
    assert!(matches!(err, RandomizerError::Config(_)));
}

#[test]
fn flushed_context_is_terminal() {
    let mut ctx = Context::new(fixture_rom(), 1);
    ctx.run_pipeline(&[Step::TrainerLevelMultiplier { multiplier: 1.1 }])
        .unwrap();
    ctx.flush_to_bytes().unwrap();

    assert!(ctx.flush_to_bytes().is_err());
    assert!(ctx
        .run_pipeline(&[Step::TrainerLevelMultiplier { multiplier: 1.1 }])
        .is_err());
}

#[test]
fn flush_covers_every_instantiated_resource() {
    // The species table is only read, never mutated, but it was
    // instantiated, so the flush re-encodes it too.
    let mut ctx = Context::new(fixture_rom(), 11);
    ctx.run_pipeline(&[Step::RandomizeStarters {
        filter: Filter::All(Vec::new()),
        independent: false,
    }])
    .unwrap();
    let image = ctx.flush_to_bytes().unwrap();

    let rom = RomContainer::from_bytes(image).unwrap();
    let species = SpeciesTable::from_bytes(&rom.read_entry("data/species.tbl").unwrap()).unwrap();
    assert_eq!(species.len(), fixture_species().len());
}

#[test]
fn stable_encounter_mapping_matches_duplicate_slots() {
    // Area 1 has the same original species in slots 0 and 1; the stable
    // mapping must give both slots the same replacement.
    let stable = decode_encounters(run_to_bytes(
        13,
        &[Step::RandomizeEncounters { filter: Filter::All(Vec::new()), independent: false }],
    ));
    assert_eq!(
        stable.areas[0].slots[0].species,
        stable.areas[0].slots[1].species
    );
}

#[test]
fn independent_rerolls_diverge_across_duplicate_slots() {
    // 24 slots all holding the same original species, rolled against a
    // nine-candidate pool. Independent mode draws each slot separately, so
    // the slots cannot all collapse onto one replacement the way the stable
    // mapping forces them to.
    let encounters = EncounterTable {
        areas: vec![EncounterArea {
            area_id: 1,
            slots: (0..24)
                .map(|_| EncounterSlot { species: 1, min_level: 5, max_level: 8 })
                .collect(),
        }],
    };
    let rom = RomContainer::from_entries(
        GAME_CODE,
        &[
            ("data/species.tbl", fixture_species().to_bytes().as_slice()),
            ("data/encounters.tbl", encounters.to_bytes().unwrap().as_slice()),
        ],
    )
    .unwrap();

    let mut ctx = Context::new(rom, 13);
    ctx.run_pipeline(&[Step::RandomizeEncounters {
        filter: Filter::All(Vec::new()),
        independent: true,
    }])
    .unwrap();
    let image = ctx.flush_to_bytes().unwrap();

    let replaced = decode_encounters(image);
    let distinct: std::collections::HashSet<u16> = replaced.areas[0]
        .slots
        .iter()
        .map(|slot| slot.species)
        .collect();
    assert!(distinct.len() > 1, "every slot drew the same replacement");
}

#[test]
fn starter_randomization_reuses_one_replacement_for_duplicates() {
    let starters = StarterSet {
        slots: [StarterSlot { species: 1, level: 5 }; 3],
    };
    let rom = RomContainer::from_entries(
        GAME_CODE,
        &[
            ("data/species.tbl", fixture_species().to_bytes().as_slice()),
            ("data/starters.bin", starters.to_bytes().as_slice()),
        ],
    )
    .unwrap();

    let mut ctx = Context::new(rom, 17);
    ctx.run_pipeline(&[Step::RandomizeStarters {
        filter: Filter::All(Vec::new()),
        independent: false,
    }])
    .unwrap();
    let image = ctx.flush_to_bytes().unwrap();

    let rom = RomContainer::from_bytes(image).unwrap();
    let replaced = StarterSet::from_bytes(&rom.read_entry("data/starters.bin").unwrap()).unwrap();
    assert_eq!(replaced.slots[0].species, replaced.slots[1].species);
    assert_eq!(replaced.slots[1].species, replaced.slots[2].species);
}

#[test]
fn writing_over_the_input_rom_is_rejected() {
    let dir = std::env::temp_dir().join(format!("nds-randomizer-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("fixture.nds");
    let image = Context::new(fixture_rom(), 0).flush_to_bytes().unwrap();
    std::fs::write(&input, image).unwrap();

    let mut ctx = Context::open(&input, 1).unwrap();
    ctx.run_pipeline(&[Step::TrainerLevelMultiplier { multiplier: 1.5 }])
        .unwrap();

    // A different spelling of the same file must not defeat the guard.
    let disguised = dir.join(".").join("fixture.nds");
    let err = ctx.write_all(&disguised).unwrap_err();
    assert!(matches!(err, RandomizerError::Config(_)));

    // The input on disk is untouched.
    let untouched = RomContainer::open(&input).unwrap();
    let trainers =
        TrainerTable::from_bytes(&untouched.read_entry("data/trainers.tbl").unwrap()).unwrap();
    assert_eq!(trainers.trainers[0].team[0].level, 10);

    std::fs::remove_dir_all(&dir).ok();
}

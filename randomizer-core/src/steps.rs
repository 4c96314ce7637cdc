//! Pipeline steps. Each step is one mutation unit over the cached resources;
//! the context executes a caller-ordered list of them, strictly sequentially.
//! All randomness comes from the context's single seeded stream, so a given
//! seed and step list always produce the same output.

use std::collections::HashMap;

use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::filters::Filter;
use crate::tables::{data_flags, IvEvSpread, SpeciesTable, TeamEntry, MAX_TEAM_SIZE};
use crate::{RandomizerError, Result};

pub const MAX_LEVEL: u8 = 100;
pub const MAX_IV: u8 = 31;
pub const MAX_ABILITY_SLOT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbilityMode {
    /// Uniform pick over slots 0..=2 (2 is the hidden ability).
    Random,
    Fixed(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemMode {
    /// Zeroes every held-item field that is present.
    Clear,
    /// Uniform pick from the given item-id pool.
    RandomFrom(Vec<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvMode {
    /// IV grows with the level tier: `level * 31 / 100`.
    Scaling,
    Uniform(u8),
}

/// One mutation unit. The ordering of a step list is the caller's contract;
/// the pipeline never reorders or skips.
#[derive(Debug, Clone)]
pub enum Step {
    TrainerLevelMultiplier { multiplier: f32 },
    WildLevelMultiplier { multiplier: f32 },
    ExpandTrainerTeams { bosses_only: bool, target_size: u8 },
    ChangeTrainerDataType { target_flags: u8 },
    RandomizeTrainers { filter: Filter, independent: bool },
    RandomizeGyms { filter: Filter, independent: bool },
    RandomizeEncounters { filter: Filter, independent: bool },
    RandomizeStarters { filter: Filter, independent: bool },
    RandomizeAbilities { mode: AbilityMode },
    RandomizeHeldItems { mode: ItemMode },
    RandomizeIvs { mode: IvMode },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::TrainerLevelMultiplier { .. } => "trainer-level-multiplier",
            Step::WildLevelMultiplier { .. } => "wild-level-multiplier",
            Step::ExpandTrainerTeams { .. } => "expand-trainer-teams",
            Step::ChangeTrainerDataType { .. } => "change-trainer-data-type",
            Step::RandomizeTrainers { .. } => "randomize-trainers",
            Step::RandomizeGyms { .. } => "randomize-gyms",
            Step::RandomizeEncounters { .. } => "randomize-encounters",
            Step::RandomizeStarters { .. } => "randomize-starters",
            Step::RandomizeAbilities { .. } => "randomize-abilities",
            Step::RandomizeHeldItems { .. } => "randomize-held-items",
            Step::RandomizeIvs { .. } => "randomize-ivs",
        }
    }

    pub fn apply(&self, ctx: &mut Context) -> Result<()> {
        match self {
            Step::TrainerLevelMultiplier { multiplier } => {
                apply_trainer_level_multiplier(ctx, *multiplier)
            }
            Step::WildLevelMultiplier { multiplier } => {
                apply_wild_level_multiplier(ctx, *multiplier)
            }
            Step::ExpandTrainerTeams {
                bosses_only,
                target_size,
            } => apply_expand_teams(ctx, *bosses_only, *target_size),
            Step::ChangeTrainerDataType { target_flags } => {
                apply_change_data_type(ctx, *target_flags)
            }
            Step::RandomizeTrainers {
                filter,
                independent,
            } => apply_randomize_trainer_species(
                ctx,
                filter,
                *independent,
                false,
                "randomize-trainers",
                "randomizer/steps/trainers",
            ),
            Step::RandomizeGyms {
                filter,
                independent,
            } => apply_randomize_trainer_species(
                ctx,
                filter,
                *independent,
                true,
                "randomize-gyms",
                "randomizer/steps/gyms",
            ),
            Step::RandomizeEncounters {
                filter,
                independent,
            } => apply_randomize_encounters(ctx, filter, *independent),
            Step::RandomizeStarters {
                filter,
                independent,
            } => apply_randomize_starters(ctx, filter, *independent),
            Step::RandomizeAbilities { mode } => apply_randomize_abilities(ctx, *mode),
            Step::RandomizeHeldItems { mode } => apply_randomize_held_items(ctx, mode),
            Step::RandomizeIvs { mode } => apply_randomize_ivs(ctx, *mode),
        }
    }
}

// Per-step replacement mapping: the first roll for an original species is
// reused for every later occurrence within the same step pass, unless the
// step opted into independent rerolls.
struct ReplacementMap {
    assigned: HashMap<u16, u16>,
    independent: bool,
}

impl ReplacementMap {
    fn new(independent: bool) -> Self {
        ReplacementMap {
            assigned: HashMap::new(),
            independent,
        }
    }

    fn replacement_for(
        &mut self,
        original: u16,
        species: &SpeciesTable,
        filter: &Filter,
        rng: &mut StdRng,
        step: &'static str,
        record: &str,
    ) -> Result<u16> {
        if !self.independent {
            if let Some(&chosen) = self.assigned.get(&original) {
                return Ok(chosen);
            }
        }

        let reference = species
            .get(original)
            .filter(|r| r.bst() > 0)
            .ok_or_else(|| RandomizerError::ReferentialIntegrity {
                step,
                detail: record.to_string(),
            })?;

        let chosen = pick_replacement(species, filter, reference, rng, step)?;
        if !self.independent {
            self.assigned.insert(original, chosen);
        }
        Ok(chosen)
    }
}

fn pick_replacement(
    species: &SpeciesTable,
    filter: &Filter,
    reference: &crate::tables::SpeciesRecord,
    rng: &mut StdRng,
    step: &'static str,
) -> Result<u16> {
    // Candidates in ascending id order so a given rng draw is reproducible.
    let pool: Vec<u16> = species
        .iter()
        .filter(|c| c.bst() > 0 && filter.allows(c, reference))
        .map(|c| c.id)
        .collect();

    if pool.is_empty() {
        return Err(RandomizerError::Config(format!(
            "{step}: filter rejects every candidate for species {}",
            reference.id
        )));
    }

    Ok(pool[rng.gen_range(0..pool.len())])
}

fn check_multiplier(step: &'static str, multiplier: f32) -> Result<()> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(RandomizerError::Config(format!(
            "{step}: multiplier must be a positive finite number, got {multiplier}"
        )));
    }
    Ok(())
}

fn scale_level(level: u8, multiplier: f32) -> u8 {
    let scaled = (level as f32 * multiplier).round() as i64;
    scaled.clamp(1, MAX_LEVEL as i64) as u8
}

fn apply_trainer_level_multiplier(ctx: &mut Context, multiplier: f32) -> Result<()> {
    check_multiplier("trainer-level-multiplier", multiplier)?;
    let (cache, rom, _) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;
    for trainer in &mut trainers.trainers {
        for entry in &mut trainer.team {
            entry.level = scale_level(entry.level, multiplier);
        }
    }
    Ok(())
}

fn apply_wild_level_multiplier(ctx: &mut Context, multiplier: f32) -> Result<()> {
    check_multiplier("wild-level-multiplier", multiplier)?;
    let (cache, rom, _) = ctx.parts();
    let encounters = cache.encounters_mut(rom)?;
    for area in &mut encounters.areas {
        for slot in &mut area.slots {
            slot.min_level = scale_level(slot.min_level, multiplier);
            slot.max_level = scale_level(slot.max_level, multiplier);
        }
    }
    Ok(())
}

fn apply_expand_teams(ctx: &mut Context, bosses_only: bool, target_size: u8) -> Result<()> {
    if target_size == 0 || target_size as usize > MAX_TEAM_SIZE {
        return Err(RandomizerError::Config(format!(
            "expand-trainer-teams: target size {target_size} outside [1, {MAX_TEAM_SIZE}]"
        )));
    }

    let (cache, rom, rng) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;

    for trainer in &mut trainers.trainers {
        if bosses_only && !trainer.boss {
            continue;
        }
        // An empty team gives us nothing to extrapolate from.
        if trainer.team.is_empty() {
            continue;
        }

        while trainer.team.len() < target_size as usize {
            let count = trainer.team.len() as u32;
            let sum: u32 = trainer.team.iter().map(|e| e.level as u32).sum();
            // Half-up integer rounding of the team's mean level.
            let level = (((sum + count / 2) / count) as u8).max(1);

            let template = trainer.team[rng.gen_range(0..trainer.team.len())].species;
            let entry = TeamEntry {
                item: (trainer.data_flags & data_flags::ITEMS != 0).then_some(0),
                moves: (trainer.data_flags & data_flags::MOVES != 0).then(|| [0u16; 4]),
                spread: (trainer.data_flags & data_flags::IV_EV != 0).then(IvEvSpread::default),
                ..TeamEntry::new(template, level)
            };
            debug!(
                target: "randomizer/steps/expand-teams",
                "trainer {}: appended slot {} (species {}, level {})",
                trainer.id,
                trainer.team.len(),
                template,
                level
            );
            trainer.team.push(entry);
        }
    }
    Ok(())
}

fn apply_change_data_type(ctx: &mut Context, target_flags: u8) -> Result<()> {
    if target_flags & !data_flags::ALL != 0 {
        return Err(RandomizerError::Config(format!(
            "change-trainer-data-type: unknown flag bits in {target_flags:#04x}"
        )));
    }

    let (cache, rom, _) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;

    for trainer in &mut trainers.trainers {
        for entry in &mut trainer.team {
            // Keep values for flags that stay set, zero-init newly set
            // fields, drop cleared ones.
            entry.moves = if target_flags & data_flags::MOVES != 0 {
                Some(entry.moves.take().unwrap_or([0; 4]))
            } else {
                None
            };
            entry.item = if target_flags & data_flags::ITEMS != 0 {
                Some(entry.item.take().unwrap_or(0))
            } else {
                None
            };
            entry.spread = if target_flags & data_flags::IV_EV != 0 {
                Some(entry.spread.take().unwrap_or_default())
            } else {
                None
            };
        }
        trainer.data_flags = target_flags;
    }
    Ok(())
}

fn apply_randomize_trainer_species(
    ctx: &mut Context,
    filter: &Filter,
    independent: bool,
    bosses_only: bool,
    step: &'static str,
    log_target: &'static str,
) -> Result<()> {
    let (cache, rom, rng) = ctx.parts();
    let (species, trainers) = cache.species_and_trainers_mut(rom)?;

    let mut map = ReplacementMap::new(independent);
    for trainer in &mut trainers.trainers {
        if bosses_only && !trainer.boss {
            continue;
        }
        for (slot, entry) in trainer.team.iter_mut().enumerate() {
            let record = format!(
                "trainer {} slot {} references species {}",
                trainer.id, slot, entry.species
            );
            let replacement =
                map.replacement_for(entry.species, species, filter, rng, step, &record)?;
            if replacement != entry.species {
                debug!(
                    target: log_target,
                    "trainer {} slot {}: species {} -> {}",
                    trainer.id, slot, entry.species, replacement
                );
            }
            entry.species = replacement;
        }
    }
    Ok(())
}

fn apply_randomize_encounters(ctx: &mut Context, filter: &Filter, independent: bool) -> Result<()> {
    let (cache, rom, rng) = ctx.parts();
    let (species, encounters) = cache.species_and_encounters_mut(rom)?;

    let mut map = ReplacementMap::new(independent);
    for area in &mut encounters.areas {
        for (slot_index, slot) in area.slots.iter_mut().enumerate() {
            let record = format!(
                "area {} slot {} references species {}",
                area.area_id, slot_index, slot.species
            );
            let replacement = map.replacement_for(
                slot.species,
                species,
                filter,
                rng,
                "randomize-encounters",
                &record,
            )?;
            if replacement != slot.species {
                debug!(
                    target: "randomizer/steps/encounters",
                    "area {} slot {}: species {} -> {}",
                    area.area_id, slot_index, slot.species, replacement
                );
            }
            slot.species = replacement;
        }
    }
    Ok(())
}

fn apply_randomize_starters(ctx: &mut Context, filter: &Filter, independent: bool) -> Result<()> {
    let (cache, rom, rng) = ctx.parts();
    let (species, starters) = cache.species_and_starters_mut(rom)?;

    let mut map = ReplacementMap::new(independent);
    for (slot_index, slot) in starters.slots.iter_mut().enumerate() {
        let record = format!(
            "starter slot {} references species {}",
            slot_index, slot.species
        );
        let replacement = map.replacement_for(
            slot.species,
            species,
            filter,
            rng,
            "randomize-starters",
            &record,
        )?;
        debug!(
            target: "randomizer/steps/starters",
            "starter slot {}: species {} -> {}",
            slot_index, slot.species, replacement
        );
        slot.species = replacement;
    }
    Ok(())
}

fn apply_randomize_abilities(ctx: &mut Context, mode: AbilityMode) -> Result<()> {
    if let AbilityMode::Fixed(slot) = mode {
        if slot > MAX_ABILITY_SLOT {
            return Err(RandomizerError::Config(format!(
                "randomize-abilities: ability slot {slot} outside [0, {MAX_ABILITY_SLOT}]"
            )));
        }
    }

    let (cache, rom, rng) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;
    for trainer in &mut trainers.trainers {
        for entry in &mut trainer.team {
            entry.ability = match mode {
                AbilityMode::Random => rng.gen_range(0..=MAX_ABILITY_SLOT),
                AbilityMode::Fixed(slot) => slot,
            };
        }
    }
    Ok(())
}

fn apply_randomize_held_items(ctx: &mut Context, mode: &ItemMode) -> Result<()> {
    if let ItemMode::RandomFrom(pool) = mode {
        if pool.is_empty() {
            return Err(RandomizerError::Config(
                "randomize-held-items: item pool is empty".to_string(),
            ));
        }
    }

    let (cache, rom, rng) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;
    for trainer in &mut trainers.trainers {
        // Only trainers whose record shape carries held items.
        if trainer.data_flags & data_flags::ITEMS == 0 {
            continue;
        }
        for entry in &mut trainer.team {
            if let Some(item) = entry.item.as_mut() {
                *item = match mode {
                    ItemMode::Clear => 0,
                    ItemMode::RandomFrom(pool) => pool[rng.gen_range(0..pool.len())],
                };
            }
        }
    }
    Ok(())
}

fn apply_randomize_ivs(ctx: &mut Context, mode: IvMode) -> Result<()> {
    if let IvMode::Uniform(value) = mode {
        if value > MAX_IV {
            return Err(RandomizerError::Config(format!(
                "randomize-ivs: IV {value} outside [0, {MAX_IV}]"
            )));
        }
    }

    let (cache, rom, _) = ctx.parts();
    let trainers = cache.trainers_mut(rom)?;
    for trainer in &mut trainers.trainers {
        for entry in &mut trainer.team {
            let value = match mode {
                IvMode::Scaling => ((entry.level as u16 * MAX_IV as u16) / 100) as u8,
                IvMode::Uniform(value) => value,
            };
            entry.iv = value;
            if let Some(spread) = entry.spread.as_mut() {
                spread.ivs = [value; 6];
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_levels_are_clamped_to_the_valid_range() {
        assert_eq!(scale_level(50, 1.5), 75);
        assert_eq!(scale_level(90, 2.0), 100);
        assert_eq!(scale_level(3, 0.1), 1);
        assert_eq!(scale_level(100, 1000.0), 100);
    }

    #[test]
    fn scaling_rounds_to_nearest() {
        assert_eq!(scale_level(5, 1.1), 6); // 5.5 rounds away from zero
        assert_eq!(scale_level(7, 0.5), 4); // 3.5 rounds away from zero
    }

    #[test]
    fn multiplier_must_be_positive_and_finite() {
        assert!(check_multiplier("t", 1.0).is_ok());
        assert!(check_multiplier("t", 0.0).is_err());
        assert!(check_multiplier("t", -2.0).is_err());
        assert!(check_multiplier("t", f32::INFINITY).is_err());
        assert!(check_multiplier("t", f32::NAN).is_err());
    }
}

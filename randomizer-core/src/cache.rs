//! Lazily-materialized resource cache. Each resource is decoded from its
//! container entry at most once per context lifetime and stays mutable in
//! memory until the context flushes.

use std::collections::HashSet;
use std::fmt;

use crate::container::RomContainer;
use crate::tables::{EncounterTable, SpeciesTable, StarterSet, TrainerTable};
use crate::{RandomizerError, Result};

const SPECIES_PATH: &str = "data/species.tbl";
const TRAINERS_PATH: &str = "data/trainers.tbl";
const ENCOUNTERS_PATH: &str = "data/encounters.tbl";
const STARTERS_PATH: &str = "data/starters.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Species,
    Trainers,
    Encounters,
    Starters,
    /// Derived from the species table; has no backing container entry.
    SpecialSpecies,
}

impl ResourceKind {
    pub fn entry_path(self) -> Option<&'static str> {
        match self {
            ResourceKind::Species => Some(SPECIES_PATH),
            ResourceKind::Trainers => Some(TRAINERS_PATH),
            ResourceKind::Encounters => Some(ENCOUNTERS_PATH),
            ResourceKind::Starters => Some(STARTERS_PATH),
            ResourceKind::SpecialSpecies => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Species => "species",
            ResourceKind::Trainers => "trainers",
            ResourceKind::Encounters => "encounters",
            ResourceKind::Starters => "starters",
            ResourceKind::SpecialSpecies => "special-species",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn empty_slot(kind: ResourceKind) -> RandomizerError {
    RandomizerError::ResourceLoad {
        resource: kind.name().to_string(),
        detail: "cache slot empty after load".to_string(),
    }
}

#[derive(Default)]
pub struct ResourceCache {
    species: Option<SpeciesTable>,
    trainers: Option<TrainerTable>,
    encounters: Option<EncounterTable>,
    starters: Option<StarterSet>,
    special: Option<HashSet<u16>>,
    load_order: Vec<ResourceKind>,
}

impl ResourceCache {
    fn ensure_species(&mut self, rom: &RomContainer) -> Result<()> {
        if self.species.is_none() {
            let bytes = rom.read_entry(SPECIES_PATH)?;
            self.species = Some(SpeciesTable::from_bytes(&bytes)?);
            self.load_order.push(ResourceKind::Species);
            log::debug!(target: "randomizer/cache", "loaded species table");
        }
        Ok(())
    }

    fn ensure_trainers(&mut self, rom: &RomContainer) -> Result<()> {
        if self.trainers.is_none() {
            let bytes = rom.read_entry(TRAINERS_PATH)?;
            self.trainers = Some(TrainerTable::from_bytes(&bytes)?);
            self.load_order.push(ResourceKind::Trainers);
            log::debug!(target: "randomizer/cache", "loaded trainer table");
        }
        Ok(())
    }

    fn ensure_encounters(&mut self, rom: &RomContainer) -> Result<()> {
        if self.encounters.is_none() {
            let bytes = rom.read_entry(ENCOUNTERS_PATH)?;
            self.encounters = Some(EncounterTable::from_bytes(&bytes)?);
            self.load_order.push(ResourceKind::Encounters);
            log::debug!(target: "randomizer/cache", "loaded encounter table");
        }
        Ok(())
    }

    fn ensure_starters(&mut self, rom: &RomContainer) -> Result<()> {
        if self.starters.is_none() {
            let bytes = rom.read_entry(STARTERS_PATH)?;
            self.starters = Some(StarterSet::from_bytes(&bytes)?);
            self.load_order.push(ResourceKind::Starters);
            log::debug!(target: "randomizer/cache", "loaded starter set");
        }
        Ok(())
    }

    pub fn species(&mut self, rom: &RomContainer) -> Result<&SpeciesTable> {
        self.ensure_species(rom)?;
        self.species
            .as_ref()
            .ok_or_else(|| empty_slot(ResourceKind::Species))
    }

    pub fn trainers_mut(&mut self, rom: &RomContainer) -> Result<&mut TrainerTable> {
        self.ensure_trainers(rom)?;
        self.trainers
            .as_mut()
            .ok_or_else(|| empty_slot(ResourceKind::Trainers))
    }

    pub fn encounters_mut(&mut self, rom: &RomContainer) -> Result<&mut EncounterTable> {
        self.ensure_encounters(rom)?;
        self.encounters
            .as_mut()
            .ok_or_else(|| empty_slot(ResourceKind::Encounters))
    }

    pub fn starters_mut(&mut self, rom: &RomContainer) -> Result<&mut StarterSet> {
        self.ensure_starters(rom)?;
        self.starters
            .as_mut()
            .ok_or_else(|| empty_slot(ResourceKind::Starters))
    }

    /// Species ids carrying any special category flag
    /// (legendary/mythical/ultra-beast/paradox/sub-legendary).
    pub fn special_species(&mut self, rom: &RomContainer) -> Result<&HashSet<u16>> {
        if self.special.is_none() {
            self.ensure_species(rom)?;
            let table = self
                .species
                .as_ref()
                .ok_or_else(|| empty_slot(ResourceKind::Species))?;
            let set: HashSet<u16> = table
                .iter()
                .filter(|r| r.is_special())
                .map(|r| r.id)
                .collect();
            log::debug!(
                target: "randomizer/cache",
                "computed special-species set ({} entries)",
                set.len()
            );
            self.special = Some(set);
            self.load_order.push(ResourceKind::SpecialSpecies);
        }
        self.special
            .as_ref()
            .ok_or_else(|| empty_slot(ResourceKind::SpecialSpecies))
    }

    // Split-borrow accessors for steps that read the species table while
    // mutating another resource.

    pub fn species_and_trainers_mut(
        &mut self,
        rom: &RomContainer,
    ) -> Result<(&SpeciesTable, &mut TrainerTable)> {
        self.ensure_species(rom)?;
        self.ensure_trainers(rom)?;
        match (self.species.as_ref(), self.trainers.as_mut()) {
            (Some(species), Some(trainers)) => Ok((species, trainers)),
            (None, _) => Err(empty_slot(ResourceKind::Species)),
            (_, None) => Err(empty_slot(ResourceKind::Trainers)),
        }
    }

    pub fn species_and_encounters_mut(
        &mut self,
        rom: &RomContainer,
    ) -> Result<(&SpeciesTable, &mut EncounterTable)> {
        self.ensure_species(rom)?;
        self.ensure_encounters(rom)?;
        match (self.species.as_ref(), self.encounters.as_mut()) {
            (Some(species), Some(encounters)) => Ok((species, encounters)),
            (None, _) => Err(empty_slot(ResourceKind::Species)),
            (_, None) => Err(empty_slot(ResourceKind::Encounters)),
        }
    }

    pub fn species_and_starters_mut(
        &mut self,
        rom: &RomContainer,
    ) -> Result<(&SpeciesTable, &mut StarterSet)> {
        self.ensure_species(rom)?;
        self.ensure_starters(rom)?;
        match (self.species.as_ref(), self.starters.as_mut()) {
            (Some(species), Some(starters)) => Ok((species, starters)),
            (None, _) => Err(empty_slot(ResourceKind::Species)),
            (_, None) => Err(empty_slot(ResourceKind::Starters)),
        }
    }

    /// Every resource instantiated so far, in load order.
    pub fn loaded(&self) -> &[ResourceKind] {
        &self.load_order
    }

    /// Re-encodes one resource to its container payload. `None` when the
    /// resource was never loaded or has no backing entry.
    pub fn encode(&self, kind: ResourceKind) -> Result<Option<Vec<u8>>> {
        let bytes = match kind {
            ResourceKind::Species => self.species.as_ref().map(SpeciesTable::to_bytes),
            ResourceKind::Trainers => match self.trainers.as_ref() {
                Some(table) => Some(table.to_bytes()?),
                None => None,
            },
            ResourceKind::Encounters => match self.encounters.as_ref() {
                Some(table) => Some(table.to_bytes()?),
                None => None,
            },
            ResourceKind::Starters => self.starters.as_ref().map(StarterSet::to_bytes),
            ResourceKind::SpecialSpecies => None,
        };
        Ok(bytes)
    }
}

//! Typed game-data tables and their binary codecs.
//!
//! Each table decodes from the byte payload of one container entry and
//! re-encodes to the exact same layout, so an unmutated decode/encode pass
//! reproduces the original bytes. Payloads that deviate from the layout
//! (nonzero padding, out-of-range header bytes) are rejected at decode
//! rather than silently rewritten on the next encode.

use crate::{RandomizerError, Result};

/// Species category flag bits.
pub mod species_flags {
    pub const LEGENDARY: u8 = 0x01;
    pub const MYTHICAL: u8 = 0x02;
    pub const ULTRA_BEAST: u8 = 0x04;
    pub const PARADOX: u8 = 0x08;
    pub const SUB_LEGENDARY: u8 = 0x10;

    pub const SPECIAL: u8 = LEGENDARY | MYTHICAL | ULTRA_BEAST | PARADOX | SUB_LEGENDARY;
}

/// Trainer data-type flag bits. They govern which optional fields are present
/// on every team entry of that trainer.
pub mod data_flags {
    pub const MOVES: u8 = 0x01;
    pub const ITEMS: u8 = 0x02;
    pub const IV_EV: u8 = 0x04;

    pub const ALL: u8 = MOVES | ITEMS | IV_EV;
}

const SPECIES_RECORD_SIZE: usize = 16;
const TEAM_ENTRY_BASE_SIZE: usize = 8;
const ENCOUNTER_SLOT_SIZE: usize = 4;
const STARTER_SLOT_SIZE: usize = 4;
const STARTER_COUNT: usize = 3;

pub const MAX_TEAM_SIZE: usize = 6;

// Sequential little-endian reader with truncation errors that name the
// resource being decoded.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    resource: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], resource: &'static str) -> Self {
        Reader { buf, pos: 0, resource }
    }

    fn truncated(&self) -> RandomizerError {
        RandomizerError::ResourceLoad {
            resource: self.resource.to_string(),
            detail: format!("truncated at offset {}", self.pos),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        if end > self.buf.len() {
            return Err(self.truncated());
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(RandomizerError::ResourceLoad {
                resource: self.resource.to_string(),
                detail: format!(
                    "{} trailing bytes after the last record",
                    self.buf.len() - self.pos
                ),
            });
        }
        Ok(())
    }
}

/// Immutable reference data for one species. Record 0 is a blank sentinel
/// with a BST of zero; real species ids start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesRecord {
    pub id: u16,
    pub stats: [u8; 6],
    pub types: [u8; 2],
    pub flags: u8,
    /// 0 when the species has no pre-evolution.
    pub pre_evolution: u16,
    /// 0 when the species does not evolve.
    pub evolves_into: u16,
    pub evolution_method: u8,
}

impl SpeciesRecord {
    pub fn bst(&self) -> u16 {
        self.stats.iter().map(|&s| s as u16).sum()
    }

    pub fn is_special(&self) -> bool {
        self.flags & species_flags::SPECIAL != 0
    }
}

#[derive(Debug)]
pub struct SpeciesTable {
    records: Vec<SpeciesRecord>,
}

impl SpeciesTable {
    pub fn from_records(records: Vec<SpeciesRecord>) -> Self {
        SpeciesTable { records }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw, "species table");
        let count = r.u32()? as usize;
        if count > u16::MAX as usize {
            return Err(RandomizerError::ResourceLoad {
                resource: "species table".to_string(),
                detail: format!("{count} records exceed the u16 id space"),
            });
        }

        let mut records = Vec::with_capacity(count);
        for id in 0..count {
            let bytes = r.take(SPECIES_RECORD_SIZE)?;
            if bytes[9] != 0 || bytes[15] != 0 {
                return Err(RandomizerError::ResourceLoad {
                    resource: "species table".to_string(),
                    detail: format!("species {id} has nonzero padding bytes"),
                });
            }
            let mut stats = [0u8; 6];
            stats.copy_from_slice(&bytes[0..6]);
            records.push(SpeciesRecord {
                id: id as u16,
                stats,
                types: [bytes[6], bytes[7]],
                flags: bytes[8],
                pre_evolution: u16::from_le_bytes([bytes[10], bytes[11]]),
                evolves_into: u16::from_le_bytes([bytes[12], bytes[13]]),
                evolution_method: bytes[14],
            });
        }
        r.finish()?;

        Ok(SpeciesTable { records })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.records.len() * SPECIES_RECORD_SIZE);
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            out.extend_from_slice(&record.stats);
            out.push(record.types[0]);
            out.push(record.types[1]);
            out.push(record.flags);
            out.push(0);
            out.extend_from_slice(&record.pre_evolution.to_le_bytes());
            out.extend_from_slice(&record.evolves_into.to_le_bytes());
            out.push(record.evolution_method);
            out.push(0);
        }
        out
    }

    pub fn get(&self, id: u16) -> Option<&SpeciesRecord> {
        self.records.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeciesRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IvEvSpread {
    pub ivs: [u8; 6],
    pub evs: [u8; 6],
}

/// One Pokémon on a trainer's team. The optional fields are present exactly
/// when the owning trainer's data-type flags say so; the codec zero-fills a
/// missing field if a flag is set without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamEntry {
    pub species: u16,
    pub level: u8,
    pub ability: u8,
    pub iv: u8,
    pub ev: u8,
    pub form: u16,
    pub item: Option<u16>,
    pub moves: Option<[u16; 4]>,
    pub spread: Option<IvEvSpread>,
}

impl TeamEntry {
    pub fn new(species: u16, level: u8) -> Self {
        TeamEntry {
            species,
            level,
            ability: 0,
            iv: 0,
            ev: 0,
            form: 0,
            item: None,
            moves: None,
            spread: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trainer {
    pub id: u16,
    pub class: u8,
    pub data_flags: u8,
    pub boss: bool,
    pub team: Vec<TeamEntry>,
}

#[derive(Debug)]
pub struct TrainerTable {
    pub trainers: Vec<Trainer>,
}

impl TrainerTable {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw, "trainer table");
        let count = r.u32()? as usize;

        let mut trainers = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.u16()?;
            let class = r.u8()?;
            let data_flags = r.u8()?;
            let boss = r.u8()?;
            let party_count = r.u8()? as usize;
            let reserved = r.u16()?;

            if boss > 1 {
                return Err(RandomizerError::ResourceLoad {
                    resource: "trainer table".to_string(),
                    detail: format!("trainer {id} has boss byte {boss:#04x}"),
                });
            }
            if reserved != 0 {
                return Err(RandomizerError::ResourceLoad {
                    resource: "trainer table".to_string(),
                    detail: format!("trainer {id} has nonzero reserved word {reserved:#06x}"),
                });
            }
            if data_flags & !data_flags::ALL != 0 {
                return Err(RandomizerError::ResourceLoad {
                    resource: "trainer table".to_string(),
                    detail: format!("trainer {id} has unknown data flags {data_flags:#04x}"),
                });
            }
            if party_count > MAX_TEAM_SIZE {
                return Err(RandomizerError::ResourceLoad {
                    resource: "trainer table".to_string(),
                    detail: format!("trainer {id} declares a team of {party_count}"),
                });
            }

            let mut team = Vec::with_capacity(party_count);
            for _ in 0..party_count {
                let base = r.take(TEAM_ENTRY_BASE_SIZE)?;
                let mut entry = TeamEntry {
                    species: u16::from_le_bytes([base[0], base[1]]),
                    level: base[2],
                    ability: base[3],
                    iv: base[4],
                    ev: base[5],
                    form: u16::from_le_bytes([base[6], base[7]]),
                    item: None,
                    moves: None,
                    spread: None,
                };
                if data_flags & data_flags::ITEMS != 0 {
                    entry.item = Some(r.u16()?);
                }
                if data_flags & data_flags::MOVES != 0 {
                    let mut moves = [0u16; 4];
                    for slot in &mut moves {
                        *slot = r.u16()?;
                    }
                    entry.moves = Some(moves);
                }
                if data_flags & data_flags::IV_EV != 0 {
                    let bytes = r.take(12)?;
                    let mut spread = IvEvSpread::default();
                    spread.ivs.copy_from_slice(&bytes[0..6]);
                    spread.evs.copy_from_slice(&bytes[6..12]);
                    entry.spread = Some(spread);
                }
                team.push(entry);
            }

            trainers.push(Trainer {
                id,
                class,
                data_flags,
                boss: boss != 0,
                team,
            });
        }
        r.finish()?;

        Ok(TrainerTable { trainers })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.trainers.len() as u32).to_le_bytes());

        for trainer in &self.trainers {
            if trainer.team.len() > MAX_TEAM_SIZE {
                return Err(RandomizerError::Serialization {
                    resource: "trainer table".to_string(),
                    detail: format!(
                        "trainer {} has {} team slots, format allows {}",
                        trainer.id,
                        trainer.team.len(),
                        MAX_TEAM_SIZE
                    ),
                });
            }

            out.extend_from_slice(&trainer.id.to_le_bytes());
            out.push(trainer.class);
            out.push(trainer.data_flags);
            out.push(u8::from(trainer.boss));
            out.push(trainer.team.len() as u8);
            out.extend_from_slice(&0u16.to_le_bytes());

            for entry in &trainer.team {
                out.extend_from_slice(&entry.species.to_le_bytes());
                out.push(entry.level);
                out.push(entry.ability);
                out.push(entry.iv);
                out.push(entry.ev);
                out.extend_from_slice(&entry.form.to_le_bytes());
                if trainer.data_flags & data_flags::ITEMS != 0 {
                    out.extend_from_slice(&entry.item.unwrap_or(0).to_le_bytes());
                }
                if trainer.data_flags & data_flags::MOVES != 0 {
                    for m in entry.moves.unwrap_or([0; 4]) {
                        out.extend_from_slice(&m.to_le_bytes());
                    }
                }
                if trainer.data_flags & data_flags::IV_EV != 0 {
                    let spread = entry.spread.unwrap_or_default();
                    out.extend_from_slice(&spread.ivs);
                    out.extend_from_slice(&spread.evs);
                }
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncounterSlot {
    pub species: u16,
    pub min_level: u8,
    pub max_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncounterArea {
    pub area_id: u16,
    pub slots: Vec<EncounterSlot>,
}

#[derive(Debug)]
pub struct EncounterTable {
    pub areas: Vec<EncounterArea>,
}

impl EncounterTable {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw, "encounter table");
        let area_count = r.u32()? as usize;

        let mut areas = Vec::with_capacity(area_count);
        for _ in 0..area_count {
            let area_id = r.u16()?;
            let slot_count = r.u16()? as usize;
            let mut slots = Vec::with_capacity(slot_count);
            for _ in 0..slot_count {
                let bytes = r.take(ENCOUNTER_SLOT_SIZE)?;
                slots.push(EncounterSlot {
                    species: u16::from_le_bytes([bytes[0], bytes[1]]),
                    min_level: bytes[2],
                    max_level: bytes[3],
                });
            }
            areas.push(EncounterArea { area_id, slots });
        }
        r.finish()?;

        Ok(EncounterTable { areas })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.areas.len() as u32).to_le_bytes());
        for area in &self.areas {
            let slot_count = u16::try_from(area.slots.len()).map_err(|_| {
                RandomizerError::Serialization {
                    resource: "encounter table".to_string(),
                    detail: format!("area {} has more than 65535 slots", area.area_id),
                }
            })?;
            out.extend_from_slice(&area.area_id.to_le_bytes());
            out.extend_from_slice(&slot_count.to_le_bytes());
            for slot in &area.slots {
                out.extend_from_slice(&slot.species.to_le_bytes());
                out.push(slot.min_level);
                out.push(slot.max_level);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterSlot {
    pub species: u16,
    pub level: u8,
}

#[derive(Debug)]
pub struct StarterSet {
    pub slots: [StarterSlot; STARTER_COUNT],
}

impl StarterSet {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != STARTER_COUNT * STARTER_SLOT_SIZE {
            return Err(RandomizerError::ResourceLoad {
                resource: "starter set".to_string(),
                detail: format!("expected {} bytes, found {}", STARTER_COUNT * STARTER_SLOT_SIZE, raw.len()),
            });
        }
        let mut slots = [StarterSlot { species: 0, level: 0 }; STARTER_COUNT];
        for (i, slot) in slots.iter_mut().enumerate() {
            let base = i * STARTER_SLOT_SIZE;
            if raw[base + 3] != 0 {
                return Err(RandomizerError::ResourceLoad {
                    resource: "starter set".to_string(),
                    detail: format!("slot {i} has a nonzero padding byte"),
                });
            }
            slot.species = u16::from_le_bytes([raw[base], raw[base + 1]]);
            slot.level = raw[base + 2];
        }
        Ok(StarterSet { slots })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STARTER_COUNT * STARTER_SLOT_SIZE);
        for slot in &self.slots {
            out.extend_from_slice(&slot.species.to_le_bytes());
            out.push(slot.level);
            out.push(0);
        }
        out
    }
}

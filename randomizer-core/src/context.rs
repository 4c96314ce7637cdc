//! Run orchestration. A context owns the opened ROM container, the resource
//! cache and the seeded random stream, executes a step list strictly in the
//! order given, and finally flushes every instantiated resource back into a
//! freshly written container.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cache::ResourceCache;
use crate::container::RomContainer;
use crate::steps::Step;
use crate::{RandomizerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Steps may run and mutate resources.
    Building,
    /// Terminal: resources have been serialized and discarded.
    Flushed,
}

pub struct Context {
    pub(crate) rom: RomContainer,
    pub(crate) cache: ResourceCache,
    pub(crate) rng: StdRng,
    phase: Phase,
}

impl Context {
    pub fn new(rom: RomContainer, seed: u64) -> Self {
        Context {
            rom,
            cache: ResourceCache::default(),
            rng: StdRng::seed_from_u64(seed),
            phase: Phase::Building,
        }
    }

    pub fn open(path: &Path, seed: u64) -> Result<Self> {
        Ok(Self::new(RomContainer::open(path)?, seed))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn parts(&mut self) -> (&mut ResourceCache, &RomContainer, &mut StdRng) {
        (&mut self.cache, &self.rom, &mut self.rng)
    }

    /// Ids of species carrying a special category flag. Useful for building
    /// exclusion filters before assembling a step list.
    pub fn special_species(&mut self) -> Result<HashSet<u16>> {
        Ok(self.cache.special_species(&self.rom)?.clone())
    }

    /// Executes the steps one after another in the given order. Later steps
    /// observe the mutations of earlier ones.
    pub fn run_pipeline(&mut self, steps: &[Step]) -> Result<()> {
        if self.phase != Phase::Building {
            return Err(RandomizerError::Config(
                "run_pipeline called on a flushed context".to_string(),
            ));
        }
        for step in steps {
            info!(target: "randomizer/context", "running step {}", step.name());
            step.apply(self)?;
        }
        Ok(())
    }

    /// Serializes every resource instantiated during the run (mutated or
    /// not) and rebuilds the container image. The context becomes terminal.
    pub fn flush_to_bytes(&mut self) -> Result<Vec<u8>> {
        if self.phase != Phase::Building {
            return Err(RandomizerError::Config(
                "write_all called on a flushed context".to_string(),
            ));
        }

        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        for kind in self.cache.loaded().to_vec() {
            let Some(path) = kind.entry_path() else {
                continue;
            };
            let Some(bytes) = self.cache.encode(kind)? else {
                continue;
            };
            debug!(
                target: "randomizer/context",
                "flushing {} ({} bytes) -> {}",
                kind,
                bytes.len(),
                path
            );
            replacements.insert(path.to_string(), bytes);
        }

        // Build the whole image in memory before committing anything, so a
        // serialization failure leaves no partial output behind.
        let image = self.rom.build(&replacements)?;
        self.phase = Phase::Flushed;
        self.cache = ResourceCache::default();
        Ok(image)
    }

    /// Flushes to a new container file. The original input is never written
    /// in place.
    pub fn write_all(&mut self, output: &Path) -> Result<()> {
        if let Some(source) = self.rom.source_path() {
            if resolved(source) == resolved(output) {
                return Err(RandomizerError::Config(
                    "output path must differ from the input ROM".to_string(),
                ));
            }
        }
        let image = self.flush_to_bytes()?;
        std::fs::write(output, &image)?;
        info!(
            target: "randomizer/context",
            "wrote {} bytes to {}",
            image.len(),
            output.display()
        );
        Ok(())
    }
}

// A lexical comparison would miss spellings like "./rom.nds" vs "rom.nds".
// The output usually does not exist yet, so fall back to canonicalizing its
// parent directory.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new(".").canonicalize().ok(),
        Some(p) => p.canonicalize().ok(),
        None => None,
    };
    match (parent, path.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

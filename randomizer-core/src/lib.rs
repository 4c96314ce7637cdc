use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod container;
pub mod context;
pub mod filters;
pub mod logging;
pub mod steps;
pub mod tables;

pub use cache::{ResourceCache, ResourceKind};
pub use container::RomContainer;
pub use context::{Context, Phase};
pub use filters::Filter;
pub use steps::{AbilityMode, ItemMode, IvMode, Step};

#[derive(Debug, Error)]
pub enum RandomizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load resource {resource}: {detail}")]
    ResourceLoad { resource: String, detail: String },
    #[error("dangling reference in step {step}: {detail}")]
    ReferentialIntegrity { step: &'static str, detail: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to serialize resource {resource}: {detail}")]
    Serialization { resource: String, detail: String },
}

pub type Result<T> = std::result::Result<T, RandomizerError>;

/// Everything a full run needs. The CLI fills this from flags; a JSON preset
/// file deserializes straight into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomizerSettings {
    pub seed: u64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub trainer_level_multiplier: Option<f32>,
    pub wild_level_multiplier: Option<f32>,
    pub expand_teams_to: Option<u8>,
    pub expand_bosses_only: bool,
    /// Target trainer data-type flags (`tables::data_flags` bits).
    pub trainer_data_flags: Option<u8>,
    pub randomize_trainers: bool,
    pub randomize_gyms: bool,
    pub randomize_encounters: bool,
    pub independent_encounters: bool,
    pub randomize_starters: bool,
    /// Keep legendary/mythical/ultra-beast/paradox/sub-legendary species in
    /// the candidate pool.
    pub allow_special: bool,
    pub bst_factor: Option<f64>,
    pub randomize_abilities: bool,
    pub held_item_pool: Option<Vec<u16>>,
    pub iv_mode: Option<IvMode>,
    pub debug: bool,
}

impl RandomizerSettings {
    pub fn new(seed: u64, input_path: PathBuf, output_path: PathBuf) -> Self {
        RandomizerSettings {
            seed,
            input_path,
            output_path,
            trainer_level_multiplier: None,
            wild_level_multiplier: None,
            expand_teams_to: None,
            expand_bosses_only: false,
            trainer_data_flags: None,
            randomize_trainers: false,
            randomize_gyms: false,
            randomize_encounters: false,
            independent_encounters: false,
            randomize_starters: false,
            allow_special: false,
            bst_factor: None,
            randomize_abilities: false,
            held_item_pool: None,
            iv_mode: None,
            debug: false,
        }
    }

    pub fn from_preset(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            RandomizerError::Config(format!("invalid preset {}: {e}", path.display()))
        })
    }
}

/// Builds the step list a settings struct implies. The order is fixed:
/// record-shape changes first, then team expansion and level scaling, then
/// the species randomizations, then the per-entry field passes.
fn build_steps(settings: &RandomizerSettings, ctx: &mut Context) -> Result<Vec<Step>> {
    let mut steps = Vec::new();

    if let Some(flags) = settings.trainer_data_flags {
        steps.push(Step::ChangeTrainerDataType {
            target_flags: flags,
        });
    }
    if let Some(target_size) = settings.expand_teams_to {
        steps.push(Step::ExpandTrainerTeams {
            bosses_only: settings.expand_bosses_only,
            target_size,
        });
    }
    if let Some(multiplier) = settings.trainer_level_multiplier {
        steps.push(Step::TrainerLevelMultiplier { multiplier });
    }
    if let Some(multiplier) = settings.wild_level_multiplier {
        steps.push(Step::WildLevelMultiplier { multiplier });
    }

    let wants_species_filter = settings.randomize_gyms
        || settings.randomize_trainers
        || settings.randomize_encounters
        || settings.randomize_starters;
    if wants_species_filter {
        let mut parts = Vec::new();
        if !settings.allow_special {
            parts.push(Filter::NotInSet(ctx.special_species()?));
        }
        if let Some(factor) = settings.bst_factor {
            parts.push(Filter::BstWithinFactor(factor));
        }
        let filter = Filter::All(parts);

        if settings.randomize_gyms {
            steps.push(Step::RandomizeGyms {
                filter: filter.clone(),
                independent: false,
            });
        }
        if settings.randomize_trainers {
            steps.push(Step::RandomizeTrainers {
                filter: filter.clone(),
                independent: false,
            });
        }
        if settings.randomize_encounters {
            steps.push(Step::RandomizeEncounters {
                filter: filter.clone(),
                independent: settings.independent_encounters,
            });
        }
        if settings.randomize_starters {
            steps.push(Step::RandomizeStarters {
                filter,
                independent: false,
            });
        }
    }

    if settings.randomize_abilities {
        steps.push(Step::RandomizeAbilities {
            mode: AbilityMode::Random,
        });
    }
    if let Some(pool) = &settings.held_item_pool {
        steps.push(Step::RandomizeHeldItems {
            mode: ItemMode::RandomFrom(pool.clone()),
        });
    }
    if let Some(mode) = settings.iv_mode {
        steps.push(Step::RandomizeIvs { mode });
    }

    Ok(steps)
}

pub fn run(settings: RandomizerSettings) -> Result<()> {
    if !settings.input_path.exists() {
        return Err(RandomizerError::Config(format!(
            "input path does not exist: {}",
            settings.input_path.display()
        )));
    }

    let mut ctx = Context::open(&settings.input_path, settings.seed)?;
    let steps = build_steps(&settings, &mut ctx)?;
    ctx.run_pipeline(&steps)?;
    ctx.write_all(&settings.output_path)?;

    if settings.debug {
        let mut summary = format!("randomizer seed: {}\n", settings.seed);
        summary.push_str(&format!(
            "input: {}\noutput: {}\n",
            settings.input_path.display(),
            settings.output_path.display()
        ));
        summary.push_str("steps:\n");
        for step in &steps {
            summary.push_str(&format!("  {}\n", step.name()));
        }
        let summary_path = settings.output_path.with_extension("summary.txt");
        fs::write(summary_path, summary)?;
    }

    Ok(())
}

use clap::Parser;
use std::path::PathBuf;

use randomizer_core::logging::{self, PathVerbosity};
use randomizer_core::tables::data_flags;
use randomizer_core::{run, IvMode, RandomizerSettings};

#[derive(Debug, Parser)]
#[command(
    name = "nds-randomizer",
    version,
    about = "Nintendo DS Pokémon ROM randomizer"
)]
struct Args {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    seed: u64,

    /// JSON settings preset. Input/output/seed from the command line still
    /// override what the preset declares; combining it with any other tuning
    /// flag is an error.
    #[arg(long)]
    preset: Option<PathBuf>,

    #[arg(long)]
    trainer_level_multiplier: Option<f32>,

    #[arg(long)]
    wild_level_multiplier: Option<f32>,

    /// Expand trainer teams up to this size (1-6).
    #[arg(long)]
    expand_teams: Option<u8>,

    #[arg(long, default_value_t = false)]
    expand_bosses_only: bool,

    /// Comma-separated trainer data-type flags: moves, items, ivev.
    #[arg(long, value_delimiter = ',')]
    trainer_data_flags: Option<Vec<String>>,

    #[arg(long, default_value_t = false)]
    randomize_trainers: bool,

    #[arg(long, default_value_t = false)]
    randomize_gyms: bool,

    #[arg(long, default_value_t = false)]
    randomize_encounters: bool,

    /// Reroll every encounter slot independently instead of reusing one
    /// replacement per original species.
    #[arg(long, default_value_t = false)]
    independent_encounters: bool,

    #[arg(long, default_value_t = false)]
    randomize_starters: bool,

    /// Keep legendary/mythical/ultra-beast/paradox/sub-legendary species in
    /// the replacement pool.
    #[arg(long, default_value_t = false)]
    allow_special: bool,

    /// Restrict replacements to species whose BST is within this relative
    /// factor of the original, e.g. 0.15.
    #[arg(long)]
    bst_factor: Option<f64>,

    #[arg(long, default_value_t = false)]
    randomize_abilities: bool,

    /// Comma-separated item ids to draw held items from.
    #[arg(long, value_delimiter = ',')]
    held_item_pool: Option<Vec<u16>>,

    /// IV assignment mode: "scaling" or "uniform:N".
    #[arg(long)]
    iv_mode: Option<String>,

    /// Verbosity spec: comma-separated `path/prefix=level` rules plus an
    /// optional bare fallback level, e.g.
    /// "randomizer/steps/encounters=debug,info".
    #[arg(long, default_value = "info")]
    verbose: String,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn has_tuning_flags(args: &Args) -> bool {
    args.trainer_level_multiplier.is_some()
        || args.wild_level_multiplier.is_some()
        || args.expand_teams.is_some()
        || args.expand_bosses_only
        || args.trainer_data_flags.is_some()
        || args.randomize_trainers
        || args.randomize_gyms
        || args.randomize_encounters
        || args.independent_encounters
        || args.randomize_starters
        || args.allow_special
        || args.bst_factor.is_some()
        || args.randomize_abilities
        || args.held_item_pool.is_some()
        || args.iv_mode.is_some()
        || args.debug
}

fn parse_data_flags(names: &[String]) -> Result<u8, String> {
    let mut flags = 0u8;
    for name in names {
        flags |= match name.trim().to_ascii_lowercase().as_str() {
            "moves" => data_flags::MOVES,
            "items" => data_flags::ITEMS,
            "ivev" => data_flags::IV_EV,
            other => return Err(format!("unknown data flag '{other}'")),
        };
    }
    Ok(flags)
}

fn parse_iv_mode(spec: &str) -> Result<IvMode, String> {
    if spec.eq_ignore_ascii_case("scaling") {
        return Ok(IvMode::Scaling);
    }
    if let Some(value) = spec.strip_prefix("uniform:") {
        return value
            .parse::<u8>()
            .map(IvMode::Uniform)
            .map_err(|_| format!("invalid uniform IV value '{value}'"));
    }
    Err(format!("unknown IV mode '{spec}'"))
}

fn main() {
    let args = Args::parse();

    let verbosity = match PathVerbosity::parse(&args.verbose) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = logging::init(verbosity) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    if args.preset.is_some() && has_tuning_flags(&args) {
        eprintln!("Error: --preset cannot be combined with individual tuning flags; edit the preset instead");
        std::process::exit(1);
    }

    let mut settings = match &args.preset {
        Some(path) => match RandomizerSettings::from_preset(path) {
            Ok(mut preset) => {
                preset.seed = args.seed;
                preset.input_path = args.input.clone();
                preset.output_path = args.output.clone();
                preset
            }
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        },
        None => RandomizerSettings::new(args.seed, args.input.clone(), args.output.clone()),
    };

    if args.preset.is_none() {
        settings.trainer_level_multiplier = args.trainer_level_multiplier;
        settings.wild_level_multiplier = args.wild_level_multiplier;
        settings.expand_teams_to = args.expand_teams;
        settings.expand_bosses_only = args.expand_bosses_only;
        settings.randomize_trainers = args.randomize_trainers;
        settings.randomize_gyms = args.randomize_gyms;
        settings.randomize_encounters = args.randomize_encounters;
        settings.independent_encounters = args.independent_encounters;
        settings.randomize_starters = args.randomize_starters;
        settings.allow_special = args.allow_special;
        settings.bst_factor = args.bst_factor;
        settings.randomize_abilities = args.randomize_abilities;
        settings.held_item_pool = args.held_item_pool.clone();
        settings.debug = args.debug;

        if let Some(names) = &args.trainer_data_flags {
            settings.trainer_data_flags = match parse_data_flags(names) {
                Ok(flags) => Some(flags),
                Err(msg) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
            };
        }
        if let Some(spec) = &args.iv_mode {
            settings.iv_mode = match parse_iv_mode(spec) {
                Ok(mode) => Some(mode),
                Err(msg) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
            };
        }
    }

    if let Err(err) = run(settings) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

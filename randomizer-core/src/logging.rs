//! Path-scoped verbosity. Log targets are slash-delimited component paths
//! (e.g. `randomizer/steps/encounters`); a verbosity spec assigns levels to
//! path prefixes, with a global fallback for everything unmatched.
//!
//! Spec grammar: comma-separated items, each either `prefix=level` or a bare
//! `level` that sets the fallback, e.g.
//! `randomizer/steps/encounters=debug,randomizer/steps=info,warn`.

use log::{LevelFilter, Log, Metadata, Record};

use crate::{RandomizerError, Result};

#[derive(Debug, Clone)]
pub struct PathVerbosity {
    // Sorted by descending prefix length so the most specific rule wins.
    rules: Vec<(String, LevelFilter)>,
    fallback: LevelFilter,
}

impl Default for PathVerbosity {
    fn default() -> Self {
        PathVerbosity {
            rules: Vec::new(),
            fallback: LevelFilter::Info,
        }
    }
}

impl PathVerbosity {
    pub fn new(fallback: LevelFilter) -> Self {
        PathVerbosity {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, prefix: &str, level: LevelFilter) -> Self {
        self.rules
            .push((prefix.trim_matches('/').to_string(), level));
        self.rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn parse(spec: &str) -> Result<Self> {
        let mut verbosity = PathVerbosity::default();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((prefix, level)) => {
                    verbosity = verbosity.with_rule(prefix.trim(), parse_level(level.trim())?);
                }
                None => verbosity.fallback = parse_level(part)?,
            }
        }
        Ok(verbosity)
    }

    /// Longest-prefix match on whole path components.
    pub fn level_for(&self, path: &str) -> LevelFilter {
        for (prefix, level) in &self.rules {
            if path == prefix
                || (path.starts_with(prefix.as_str())
                    && path.as_bytes().get(prefix.len()) == Some(&b'/'))
            {
                return *level;
            }
        }
        self.fallback
    }

    fn max_level(&self) -> LevelFilter {
        self.rules
            .iter()
            .map(|(_, level)| *level)
            .chain(std::iter::once(self.fallback))
            .max()
            .unwrap_or(self.fallback)
    }
}

fn parse_level(s: &str) -> Result<LevelFilter> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(RandomizerError::Config(format!(
            "unknown log level '{other}'"
        ))),
    }
}

struct PathLogger {
    verbosity: PathVerbosity,
}

impl Log for PathLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.verbosity.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the process-wide logger. Fails if one is already installed.
pub fn init(verbosity: PathVerbosity) -> Result<()> {
    let max = verbosity.max_level();
    log::set_boxed_logger(Box::new(PathLogger { verbosity }))
        .map_err(|e| RandomizerError::Config(format!("failed to install logger: {e}")))?;
    log::set_max_level(max);
    Ok(())
}

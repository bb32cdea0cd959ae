//! Command-line interface parsing for OtherApps
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a validated `StartupConfig` before any network access happens.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Duration;
use clap::Parser;
use thiserror::Error;

use crate::data::{AppIdentifier, IdentifierError};
use crate::resolver::ResolverConfig;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// None of identifiers, --config or --sample was given
    #[error("Nothing to resolve: pass app identifiers, --config <PATH|URL>, or --sample")]
    NoInput,

    /// More than one input source was given
    #[error("Use only one of: app identifiers, --config, --sample")]
    ConflictingInputs,

    /// A positional identifier could not be parsed
    #[error("Invalid identifier '{input}': {source}")]
    InvalidIdentifier {
        input: String,
        #[source]
        source: IdentifierError,
    },

    /// Country code is not two ASCII letters
    #[error("Invalid country code: '{0}'. Expected two letters, e.g. us or gb")]
    InvalidCountry(String),

    /// TTL of zero hours
    #[error("--ttl-hours must be at least 1")]
    InvalidTtl,
}

/// OtherApps - Resolve App Store metadata for "other apps" cards
#[derive(Parser, Debug)]
#[command(name = "otherapps")]
#[command(about = "Resolve App Store metadata for apps to promote")]
#[command(version)]
pub struct Cli {
    /// App Store URLs or numeric IDs
    ///
    /// Examples:
    ///   otherapps 389801252
    ///   otherapps https://apps.apple.com/us/app/instagram/id389801252
    #[arg(value_name = "IDENTIFIER")]
    pub identifiers: Vec<String>,

    /// JSON configuration file path or http(s) URL
    #[arg(long, value_name = "PATH|URL")]
    pub config: Option<String>,

    /// Resolve the built-in sample configuration
    #[arg(long)]
    pub sample: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Two-letter App Store storefront country
    #[arg(long, value_name = "CC")]
    pub country: Option<String>,

    /// Hours a resolved app stays cached
    #[arg(long, value_name = "N", default_value_t = 24)]
    pub ttl_hours: u32,

    /// Keep the cache in memory only
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Directory for the on-disk cache (defaults to the XDG cache dir)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Use the last known metadata when the App Store is unreachable
    #[arg(long)]
    pub stale_on_error: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where the apps to resolve come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Positional identifiers, already parsed
    Identifiers(Vec<AppIdentifier>),
    /// Local configuration file
    ConfigFile(PathBuf),
    /// Remote configuration URL
    ConfigUrl(String),
    /// Built-in sample configuration
    Sample,
}

/// How the resolver should place its on-disk cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskCache {
    Disabled,
    /// XDG cache directory
    Default,
    Dir(PathBuf),
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupConfig {
    pub source: Source,
    pub json: bool,
    /// Lowercased storefront country
    pub country: Option<String>,
    pub ttl: Duration,
    pub disk_cache: DiskCache,
    pub stale_on_error: bool,
    pub verbose: bool,
}

/// Validates a storefront country code and lowercases it
pub fn parse_country_arg(s: &str) -> Result<String, CliError> {
    if s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(s.to_ascii_lowercase())
    } else {
        Err(CliError::InvalidCountry(s.to_string()))
    }
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if inputs are missing, conflicting, or malformed
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let sources = [!cli.identifiers.is_empty(), cli.config.is_some(), cli.sample]
            .iter()
            .filter(|given| **given)
            .count();
        if sources == 0 {
            return Err(CliError::NoInput);
        }
        if sources > 1 {
            return Err(CliError::ConflictingInputs);
        }

        let source = if cli.sample {
            Source::Sample
        } else if let Some(config) = &cli.config {
            if config.starts_with("http://") || config.starts_with("https://") {
                Source::ConfigUrl(config.clone())
            } else {
                Source::ConfigFile(PathBuf::from(config))
            }
        } else {
            let mut identifiers = cli
                .identifiers
                .iter()
                .map(|input| {
                    AppIdentifier::parse(input).map_err(|source| CliError::InvalidIdentifier {
                        input: input.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            // `123` and `id=123` name the same app; keep the first spelling
            let mut seen = HashSet::new();
            identifiers.retain(|id| seen.insert(id.clone()));
            Source::Identifiers(identifiers)
        };

        if cli.ttl_hours == 0 {
            return Err(CliError::InvalidTtl);
        }

        let disk_cache = match (&cli.cache_dir, cli.no_disk_cache) {
            (_, true) => DiskCache::Disabled,
            (Some(dir), false) => DiskCache::Dir(dir.clone()),
            (None, false) => DiskCache::Default,
        };

        Ok(StartupConfig {
            source,
            json: cli.json,
            country: cli.country.as_deref().map(parse_country_arg).transpose()?,
            ttl: Duration::hours(i64::from(cli.ttl_hours)),
            disk_cache,
            stale_on_error: cli.stale_on_error,
            verbose: cli.verbose,
        })
    }

    /// Resolver policy for this run, given the resolved disk cache directory
    pub fn resolver_config(&self, cache_dir: Option<PathBuf>) -> ResolverConfig {
        ResolverConfig {
            ttl: self.ttl,
            serve_stale_on_error: self.stale_on_error,
            cache_dir,
            ..ResolverConfig::default()
        }
    }
}

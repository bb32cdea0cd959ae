//! OtherApps - Resolve App Store metadata for "other apps" cards
//!
//! A command-line front end that resolves App Store links or a JSON
//! configuration and prints the resulting app metadata.

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use otherapps::cache::CacheManager;
use otherapps::cli::{Cli, DiskCache, Source, StartupConfig};
use otherapps::data::lookup::DEFAULT_LOOKUP_TIMEOUT;
use otherapps::{AppsConfiguration, LookupClient, MetadataResolver, ResolvedSection};

/// Logs go to stderr so stdout stays clean for --json output
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints an error and exits with the given status
fn fail(message: impl std::fmt::Display, code: i32) -> ! {
    eprintln!("error: {}", message);
    process::exit(code);
}

/// Loads the configuration named on the command line
async fn load_configuration(source: Source) -> Result<AppsConfiguration, otherapps::data::ConfigError> {
    match source {
        Source::Identifiers(ids) => Ok(AppsConfiguration::from_urls(
            ids.iter().map(|id| id.to_string()),
        )),
        Source::ConfigFile(path) => AppsConfiguration::load(&path),
        Source::ConfigUrl(url) => AppsConfiguration::fetch(&reqwest::Client::new(), &url).await,
        Source::Sample => Ok(AppsConfiguration::sample()),
    }
}

/// Renders one line per resolved app
fn print_text(section: &ResolvedSection) {
    println!("{}", section.title);
    if let Some(subtitle) = &section.subtitle {
        println!("{}", subtitle);
    }
    println!();

    for card in &section.cards {
        let marker = if card.featured { "*" } else { " " };
        println!(
            "{} {} ({:.1}★, {}) id{} {}",
            marker,
            card.title,
            card.metadata.rating,
            card.metadata.formatted_price,
            card.metadata.identifier,
            card.metadata.store_url
        );
    }
}

fn print_json(section: &ResolvedSection) -> serde_json::Result<()> {
    let failures: Vec<_> = section
        .failures
        .iter()
        .map(|f| serde_json::json!({ "url": f.url, "error": f.error.to_string() }))
        .collect();
    let document = serde_json::json!({
        "title": section.title,
        "subtitle": section.subtitle,
        "apps": section.cards,
        "failures": failures,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let startup = StartupConfig::from_cli(&cli).unwrap_or_else(|e| fail(e, 2));

    init_tracing(startup.verbose);

    let mut lookup = LookupClient::with_timeout(DEFAULT_LOOKUP_TIMEOUT)?;
    if let Some(country) = &startup.country {
        lookup = lookup.with_country(country.as_str());
    }

    let cache_dir = match &startup.disk_cache {
        DiskCache::Disabled => None,
        DiskCache::Default => CacheManager::new().map(|cache| cache.dir().to_path_buf()),
        DiskCache::Dir(dir) => Some(dir.clone()),
    };

    let resolver = MetadataResolver::new(Arc::new(lookup), startup.resolver_config(cache_dir))?;

    let configuration = load_configuration(startup.source.clone())
        .await
        .unwrap_or_else(|e| fail(e, 2));
    let section = resolver.resolve_configuration(&configuration).await;

    if startup.json {
        print_json(&section)?;
    } else {
        print_text(&section);
    }

    for failure in &section.failures {
        eprintln!("{}: {}", failure.url, failure.error);
    }

    // Partial results are still a success
    if section.cards.is_empty() && !section.failures.is_empty() {
        process::exit(1);
    }

    Ok(())
}

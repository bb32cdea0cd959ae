//! OtherApps Library
//!
//! Resolves App Store links into metadata for "other apps" promotional cards,
//! with TTL caching and request coalescing.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod data;
pub mod resolver;

pub use data::{
    AppCard, AppConfig, AppIdentifier, AppMetadata, AppsConfiguration, LookupClient,
    MetadataFetcher, ResolveError,
};
pub use resolver::{MetadataResolver, ResolvedSection, ResolverConfig};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Core data models for OtherApps
//!
//! This module contains the value types handed to the rendering layer:
//! identifiers, App Store metadata snapshots, and configured app cards.

pub mod config;
pub mod identifier;
pub mod lookup;

pub use config::{AppConfig, AppsConfiguration, ConfigError};
pub use identifier::{AppIdentifier, IdentifierError};
pub use lookup::{LookupClient, MetadataFetcher, ResolveError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// App metadata fetched from the App Store at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Numeric App Store ID
    pub identifier: AppIdentifier,
    /// Display name (`trackName`)
    pub name: String,
    /// 512px artwork URL
    pub icon_url: String,
    /// Average user rating, 0 to 5
    pub rating: f64,
    /// Number of user ratings
    pub rating_count: u64,
    /// Store description, empty when the store has none
    pub description: String,
    /// Canonical App Store page
    pub store_url: String,
    /// Price in the storefront currency
    pub price: f64,
    /// Localized price label, e.g. "Free" or "$2.99"
    pub formatted_price: String,
    /// Primary genre name
    pub category: String,
    /// Current version string
    pub version: String,
    /// Original release date, if the store reported a parseable one
    pub release_date: Option<DateTime<Utc>>,
    /// Bundle identifier, empty when unknown
    pub bundle_id: String,
}

impl AppMetadata {
    /// Creates metadata with the required fields and store defaults for the rest
    pub fn new(
        identifier: AppIdentifier,
        name: impl Into<String>,
        icon_url: impl Into<String>,
        store_url: impl Into<String>,
    ) -> Self {
        Self {
            identifier,
            name: name.into(),
            icon_url: icon_url.into(),
            rating: 0.0,
            rating_count: 0,
            description: String::new(),
            store_url: store_url.into(),
            price: 0.0,
            formatted_price: "Free".to_string(),
            category: "Unknown".to_string(),
            version: "1.0".to_string(),
            release_date: None,
            bundle_id: String::new(),
        }
    }

    /// Returns true when the app costs nothing to download
    pub fn is_free(&self) -> bool {
        self.price <= 0.0
    }
}

/// A resolved app combined with its configuration entry
///
/// Custom title and description from the configuration take precedence over
/// the store values.
#[derive(Debug, Clone, Serialize)]
pub struct AppCard {
    /// Store metadata shared with the resolver cache
    pub metadata: Arc<AppMetadata>,
    /// Title to display
    pub title: String,
    /// Description to display
    pub description: String,
    /// Whether the configuration marks this app as featured
    pub featured: bool,
}

impl AppCard {
    /// Builds a card from metadata and the configuration entry that named it
    pub fn new(metadata: Arc<AppMetadata>, config: &AppConfig) -> Self {
        let title = config
            .custom_title
            .clone()
            .unwrap_or_else(|| metadata.name.clone());
        let description = config
            .custom_description
            .clone()
            .unwrap_or_else(|| metadata.description.clone());

        Self {
            metadata,
            title,
            description,
            featured: config.featured,
        }
    }
}

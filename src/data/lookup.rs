//! iTunes lookup API client
//!
//! This module provides the `MetadataFetcher` seam used by the resolver and a
//! reqwest-backed implementation that queries the public iTunes lookup API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{AppIdentifier, AppMetadata};

/// Base URL for the iTunes lookup API
pub const ITUNES_LOOKUP_URL: &str = "https://itunes.apple.com/lookup";

/// Timeout the binary applies to a single lookup request
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur when resolving app metadata
///
/// Cloneable so one failed lookup can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// The store has no app with this identifier
    #[error("App not found in App Store: {0}")]
    NotFound(AppIdentifier),

    /// Transport failure or non-success HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// The response could not be parsed into app metadata
    #[error("Malformed response from App Store: {0}")]
    MalformedResponse(String),
}

impl ResolveError {
    /// Returns true when a later retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Network(_))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::Network(err.to_string())
    }
}

/// Remote source of app metadata
///
/// Implemented by [`LookupClient`] for the real store; tests inject fakes.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetches metadata for a single app
    async fn fetch(&self, identifier: &AppIdentifier) -> Result<AppMetadata, ResolveError>;
}

/// Client for the iTunes lookup API
#[derive(Debug, Clone)]
pub struct LookupClient {
    client: Client,
    base_url: String,
    country: Option<String>,
}

impl Default for LookupClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupClient {
    /// Create a new LookupClient with default settings (no request timeout)
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Create a new LookupClient whose requests give up after `timeout`
    ///
    /// # Returns
    /// * `Err(reqwest::Error)` if the HTTP client cannot be built
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    /// Create a new LookupClient with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: ITUNES_LOOKUP_URL.to_string(),
            country: None,
        }
    }

    /// Override the lookup endpoint (used for mirrors and testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Restrict lookups to a two-letter storefront country code
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into().to_lowercase());
        self
    }

    /// Build the lookup URL for an identifier
    fn lookup_url(&self, identifier: &AppIdentifier) -> String {
        match &self.country {
            Some(country) => format!("{}?id={}&country={}", self.base_url, identifier, country),
            None => format!("{}?id={}", self.base_url, identifier),
        }
    }
}

#[async_trait]
impl MetadataFetcher for LookupClient {
    async fn fetch(&self, identifier: &AppIdentifier) -> Result<AppMetadata, ResolveError> {
        let url = self.lookup_url(identifier);
        info!(id = %identifier, "Looking up app metadata");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Network(format!("HTTP status {}", status)));
        }

        let text = response.text().await?;
        debug!(id = %identifier, bytes = text.len(), "Lookup response received");
        parse_lookup_response(identifier, &text)
    }
}

/// Parse a lookup response body into metadata for `identifier`
pub fn parse_lookup_response(
    identifier: &AppIdentifier,
    body: &str,
) -> Result<AppMetadata, ResolveError> {
    let response: LookupResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::MalformedResponse(e.to_string()))?;

    if response.result_count == Some(0) {
        return Err(ResolveError::NotFound(identifier.clone()));
    }

    let record = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::NotFound(identifier.clone()))?;

    record.into_metadata(identifier)
}

/// iTunes lookup response envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    result_count: Option<u64>,
    results: Vec<LookupRecord>,
}

/// `trackId` arrives as a number, but some mirrors send a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrackId {
    Number(u64),
    Text(String),
}

/// A single app record from the lookup API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupRecord {
    track_id: Option<TrackId>,
    track_name: Option<String>,
    description: Option<String>,
    artwork_url512: Option<String>,
    track_view_url: Option<String>,
    price: Option<f64>,
    formatted_price: Option<String>,
    primary_genre_name: Option<String>,
    average_user_rating: Option<f64>,
    user_rating_count: Option<u64>,
    version: Option<String>,
    release_date: Option<String>,
    bundle_id: Option<String>,
}

impl LookupRecord {
    fn into_metadata(self, requested: &AppIdentifier) -> Result<AppMetadata, ResolveError> {
        let identifier = match self.track_id {
            Some(TrackId::Number(n)) => AppIdentifier::parse(&n.to_string()),
            Some(TrackId::Text(s)) => AppIdentifier::parse(&s),
            None => return Err(missing("trackId")),
        }
        .map_err(|e| ResolveError::MalformedResponse(format!("trackId: {}", e)))?;

        if &identifier != requested {
            return Err(ResolveError::MalformedResponse(format!(
                "requested app {} but store returned {}",
                requested, identifier
            )));
        }

        let rating = self.average_user_rating.unwrap_or(0.0);
        if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
            return Err(ResolveError::MalformedResponse(format!(
                "averageUserRating out of range: {}",
                rating
            )));
        }

        let release_date = self
            .release_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(AppMetadata {
            identifier,
            name: self.track_name.ok_or_else(|| missing("trackName"))?,
            icon_url: self.artwork_url512.ok_or_else(|| missing("artworkUrl512"))?,
            rating,
            rating_count: self.user_rating_count.unwrap_or(0),
            description: self.description.unwrap_or_default(),
            store_url: self.track_view_url.ok_or_else(|| missing("trackViewUrl"))?,
            price: self.price.unwrap_or(0.0),
            formatted_price: self.formatted_price.unwrap_or_else(|| "Free".to_string()),
            category: self
                .primary_genre_name
                .unwrap_or_else(|| "Unknown".to_string()),
            version: self.version.unwrap_or_else(|| "1.0".to_string()),
            release_date,
            bundle_id: self.bundle_id.unwrap_or_default(),
        })
    }
}

fn missing(field: &str) -> ResolveError {
    ResolveError::MalformedResponse(format!("missing field '{}'", field))
}

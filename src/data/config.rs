//! JSON configuration for an "other apps" section
//!
//! A configuration lists the App Store links to show plus optional per-app
//! overrides. Only the documented fields are accepted; anything else is
//! rejected at parse time so typos surface instead of being ignored.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::AppIdentifier;

/// Section title used when the configuration does not set one
pub const DEFAULT_TITLE: &str = "Other Apps";

/// Errors that can occur when loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON or has unknown fields
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Fetching a remote configuration failed
    #[error("Failed to fetch configuration: {0}")]
    Http(#[from] reqwest::Error),

    /// The configuration parsed but violates a rule
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One app entry in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// App Store URL or numeric ID
    #[serde(rename = "url")]
    pub app_store_url: String,
    /// Title shown instead of the store name
    #[serde(rename = "title", default, skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    /// Description shown instead of the store description
    #[serde(rename = "description", default, skip_serializing_if = "Option::is_none")]
    pub custom_description: Option<String>,
    /// Highlight this app
    #[serde(default)]
    pub featured: bool,
}

impl AppConfig {
    /// Creates an entry with no overrides
    pub fn new(app_store_url: impl Into<String>) -> Self {
        Self {
            app_store_url: app_store_url.into(),
            custom_title: None,
            custom_description: None,
            featured: false,
        }
    }

    /// Marks the entry as featured
    pub fn featured(mut self, featured: bool) -> Self {
        self.featured = featured;
        self
    }

    /// Parses the entry's URL into an identifier
    pub fn identifier(&self) -> Result<AppIdentifier, ConfigError> {
        AppIdentifier::parse(&self.app_store_url).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// An "other apps" section: a title, optional subtitle, and ordered apps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppsConfiguration {
    /// Apps in display order
    pub apps: Vec<AppConfig>,
    /// Section title
    #[serde(default = "default_title")]
    pub title: String,
    /// Section subtitle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl AppsConfiguration {
    /// Creates a configuration with the default title and no subtitle
    pub fn new(apps: Vec<AppConfig>) -> Self {
        Self {
            apps,
            title: default_title(),
            subtitle: None,
        }
    }

    /// Builds a configuration from plain URLs or IDs with no overrides
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(urls.into_iter().map(AppConfig::new).collect())
    }

    /// Sample configuration for demos and testing
    pub fn sample() -> Self {
        Self {
            apps: vec![
                AppConfig::new("https://apps.apple.com/us/app/cartoonify-me/id6747951776")
                    .featured(true),
                AppConfig::new("https://apps.apple.com/us/app/instagram/id389801252"),
            ],
            title: "My Other Apps".to_string(),
            subtitle: Some("Check out my other creations!".to_string()),
        }
    }

    /// Checks the rules serde cannot express
    ///
    /// The title must not be blank, every URL must yield an App Store ID, and
    /// no two entries may name the same app.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.title.trim().is_empty() {
            return Err(ConfigError::Invalid("title must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for (index, app) in self.apps.iter().enumerate() {
            let id = AppIdentifier::parse(&app.app_store_url)
                .map_err(|e| ConfigError::Invalid(format!("apps[{}]: {}", index, e)))?;
            if !seen.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "apps[{}]: duplicate app {}",
                    index, id
                )));
            }
        }

        Ok(())
    }

    /// Parses and validates a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Downloads and validates a JSON configuration
    pub async fn fetch(client: &Client, url: &str) -> Result<Self, ConfigError> {
        url::Url::parse(url).map_err(|e| ConfigError::Invalid(format!("{}: {}", url, e)))?;
        debug!(url, "Fetching configuration");

        let text = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Self::from_json_str(&text)
    }
}

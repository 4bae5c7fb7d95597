//! HTTP client for the NASA EONET v3 feed.

use std::time::Duration;

use anyhow::Context;
use eonet_core::{Category, EonetResponse};
use reqwest::header;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const USER_AGENT: &str = "eonetl/0.1";

/// Connection settings for the feed endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: "https://eonet.gsfc.nasa.gov/api/v3".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Filters applied to an events fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchEventsOptions {
    /// Look-back window in days; 0 leaves the feed default in place.
    pub days: u32,
    /// Maximum number of events to return; 0 leaves the feed default.
    pub limit: u32,
    /// "open", "closed", or "all"; empty leaves the feed default.
    pub status: String,
    pub category: Option<i64>,
    pub source: Option<String>,
}

impl FetchEventsOptions {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if self.days > 0 {
            query.push(("days", self.days.to_string()));
        }
        if self.limit > 0 {
            query.push(("limit", self.limit.to_string()));
        }
        if !self.status.is_empty() {
            query.push(("status", self.status.clone()));
        }
        if let Some(category) = self.category {
            query.push(("category", category.to_string()));
        }
        if let Some(source) = &self.source {
            query.push(("source", source.clone()));
        }
        query
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("feed returned status {status} for {url}")]
    Status { status: u16, url: String },
}

/// Thin client over the feed's events and categories endpoints.
///
/// Does not retry: transient failures surface to the caller, which owns
/// the retry policy.
#[derive(Debug, Clone)]
pub struct EonetClient {
    config: FeedConfig,
    http: reqwest::Client,
}

impl EonetClient {
    pub fn new(config: FeedConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("building feed http client")?;
        Ok(Self { config, http })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url).header(header::ACCEPT, "application/json");
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        request
    }

    /// Fetch events together with the categories embedded in the payload.
    pub async fn fetch_events(
        &self,
        opts: &FetchEventsOptions,
    ) -> Result<EonetResponse, FeedError> {
        let url = format!("{}/events", self.config.api_url);
        debug!(url = %url, ?opts, "fetching events from EONET");

        let response = check_status(self.get(&url).query(&opts.query()).send().await?)?;
        let body: EonetResponse = response.json().await?;

        info!(
            events = body.events.len(),
            categories = body.categories.len(),
            "fetched events from EONET"
        );
        Ok(body)
    }

    pub async fn fetch_categories(&self) -> Result<Vec<Category>, FeedError> {
        let url = format!("{}/categories", self.config.api_url);
        debug!(url = %url, "fetching categories from EONET");

        let response = check_status(self.get(&url).send().await?)?;
        let categories: Vec<Category> = response.json().await?;

        info!(categories = categories.len(), "fetched categories from EONET");
        Ok(categories)
    }

    /// Liveness probe against the categories endpoint.
    pub async fn health_check(&self) -> Result<(), FeedError> {
        let url = format!("{}/categories", self.config.api_url);
        check_status(self.get(&url).send().await?).map(|_| ())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FeedError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FeedError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_the_public_feed() {
        let config = FeedConfig::default();
        assert_eq!(config.api_url, "https://eonet.gsfc.nasa.gov/api/v3");
        assert!(config.api_key.is_empty());
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn events_query_skips_unset_filters() {
        let opts = FetchEventsOptions::default();
        assert!(opts.query().is_empty());

        let opts = FetchEventsOptions {
            days: 30,
            limit: 1000,
            status: "all".to_string(),
            ..Default::default()
        };
        assert_eq!(
            opts.query(),
            vec![
                ("days", "30".to_string()),
                ("limit", "1000".to_string()),
                ("status", "all".to_string()),
            ]
        );
    }

    #[test]
    fn events_query_carries_optional_filters() {
        let opts = FetchEventsOptions {
            category: Some(8),
            source: Some("InciWeb".to_string()),
            ..Default::default()
        };
        assert_eq!(
            opts.query(),
            vec![
                ("category", "8".to_string()),
                ("source", "InciWeb".to_string()),
            ]
        );
    }
}

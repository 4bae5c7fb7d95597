//! Configuration and run orchestration for the EONET ingest pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use eonet_client::{EonetClient, FeedConfig, FeedError, FetchEventsOptions};
use eonet_core::{Category, CategoryRecord, EonetResponse, EventRecord, RunInfo, RunStatus};
use eonet_storage::{DatabaseConfig, Storage};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "eonet-etl";

/// Pipeline tuning knobs. Retry settings are accepted for callers that
/// wrap the pipeline; the pipeline itself never retries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    pub batch_size: u32,
    pub days_window: u32,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            days_window: 30,
            retry_attempts: 3,
            retry_delay_secs: 30,
        }
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Full process configuration: YAML file with per-field defaults, then
/// environment overrides for secrets and connection parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub feed: FeedConfig,
    pub database: DatabaseConfig,
    pub etl: EtlSettings,
    pub server: ServerConfig,
}

impl EtlConfig {
    /// Load from an explicit YAML path, or `./config.yaml` when present,
    /// or pure defaults. Environment overrides apply afterwards and the
    /// result is validated before use.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => match std::fs::read_to_string("config.yaml") {
                Ok(text) => serde_yaml::from_str(&text).context("parsing config.yaml")?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("DATABASE_HOST") {
            self.database.host = host;
        }
        if let Some(port) = std::env::var("DATABASE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.database.port = port;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            self.database.database = name;
        }
        if let Ok(username) = std::env::var("DATABASE_USERNAME") {
            self.database.username = username;
        }
        if let Ok(password) = std::env::var("DATABASE_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(api_key) = std::env::var("NASA_API_KEY") {
            self.feed.api_key = api_key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed.api_url.is_empty() {
            bail!("feed.api_url is required");
        }
        if self.database.host.is_empty() {
            bail!("database.host is required (set DATABASE_HOST)");
        }
        if self.database.port == 0 {
            bail!("database.port must be between 1 and 65535 (set DATABASE_PORT)");
        }
        if self.database.database.is_empty() {
            bail!("database.database is required (set DATABASE_NAME)");
        }
        if self.database.username.is_empty() {
            bail!("database.username is required (set DATABASE_USERNAME)");
        }
        if self.database.password.is_empty() {
            bail!("database.password is required (set DATABASE_PASSWORD)");
        }
        if self.etl.batch_size == 0 {
            bail!("etl.batch_size must be greater than 0");
        }
        Ok(())
    }
}

/// Read side of the external feed, as consumed by the pipeline.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn fetch_events(&self, opts: &FetchEventsOptions) -> Result<EonetResponse, FeedError>;
    async fn fetch_categories(&self) -> Result<Vec<Category>, FeedError>;
    async fn health_check(&self) -> Result<(), FeedError>;
}

#[async_trait]
impl EventFeed for EonetClient {
    async fn fetch_events(&self, opts: &FetchEventsOptions) -> Result<EonetResponse, FeedError> {
        EonetClient::fetch_events(self, opts).await
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, FeedError> {
        EonetClient::fetch_categories(self).await
    }

    async fn health_check(&self) -> Result<(), FeedError> {
        EonetClient::health_check(self).await
    }
}

/// Persistence operations the pipeline depends on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn batch_upsert_events(&self, records: &[EventRecord]) -> Result<()>;
    async fn batch_upsert_categories(&self, records: &[CategoryRecord]) -> Result<()>;
    async fn start_run(&self) -> Result<i64>;
    async fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        events_processed: i32,
        categories_processed: i32,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn last_run(&self) -> Result<Option<RunInfo>>;
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl RecordStore for Storage {
    async fn batch_upsert_events(&self, records: &[EventRecord]) -> Result<()> {
        Storage::batch_upsert_events(self, records).await
    }

    async fn batch_upsert_categories(&self, records: &[CategoryRecord]) -> Result<()> {
        Storage::batch_upsert_categories(self, records).await
    }

    async fn start_run(&self) -> Result<i64> {
        Storage::start_run(self).await
    }

    async fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        events_processed: i32,
        categories_processed: i32,
        error_message: Option<&str>,
    ) -> Result<()> {
        Storage::complete_run(
            self,
            run_id,
            status,
            events_processed,
            categories_processed,
            error_message,
        )
        .await
    }

    async fn last_run(&self) -> Result<Option<RunInfo>> {
        Storage::last_run(self).await
    }

    async fn health_check(&self) -> Result<()> {
        Storage::health_check(self).await
    }
}

/// One-shot fetch-normalize-load orchestrator.
///
/// Categories load fully before any event batch is attempted; the run
/// outcome lands in the run-tracking table on every path.
pub struct Pipeline {
    config: EtlConfig,
    feed: Arc<dyn EventFeed>,
    store: Arc<dyn RecordStore>,
    run_gate: Mutex<()>,
}

impl Pipeline {
    pub fn new(config: EtlConfig, feed: Arc<dyn EventFeed>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config,
            feed,
            store,
            run_gate: Mutex::new(()),
        }
    }

    /// Execute one ingest pass. Single-flight: a second caller waits for
    /// the in-flight run to finish before starting its own.
    pub async fn run(&self) -> Result<()> {
        let _in_flight = self.run_gate.lock().await;
        info!("starting ingest run");

        let run_id = self.store.start_run().await.context("starting run tracking")?;

        let mut events_processed = 0i32;
        let mut categories_processed = 0i32;
        let outcome = self
            .execute(&mut events_processed, &mut categories_processed)
            .await;

        let (status, error_message) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(err) => (RunStatus::Failed, Some(format!("{err:#}"))),
        };

        // The terminal status must land even when a stage failed; a
        // bookkeeping failure is logged but never masks the run error.
        if let Err(err) = self
            .store
            .complete_run(
                run_id,
                status,
                events_processed,
                categories_processed,
                error_message.as_deref(),
            )
            .await
        {
            error!(run_id, error = %err, "failed to record run outcome");
        }

        match &outcome {
            Ok(()) => {
                info!(run_id, events_processed, categories_processed, "ingest run completed")
            }
            Err(err) => error!(run_id, error = %err, "ingest run failed"),
        }
        outcome
    }

    async fn execute(
        &self,
        events_processed: &mut i32,
        categories_processed: &mut i32,
    ) -> Result<()> {
        self.process_categories()
            .await
            .context("processing categories")?;
        // All categories land in one batch.
        *categories_processed = 1;

        *events_processed = self.process_events().await.context("processing events")?;
        Ok(())
    }

    async fn process_categories(&self) -> Result<()> {
        let categories = self
            .feed
            .fetch_categories()
            .await
            .context("fetching categories")?;

        let records: Vec<CategoryRecord> = categories
            .iter()
            .map(CategoryRecord::from_category)
            .collect();

        self.store
            .batch_upsert_categories(&records)
            .await
            .context("upserting categories")?;

        info!(count = records.len(), "processed categories");
        Ok(())
    }

    async fn process_events(&self) -> Result<i32> {
        let opts = FetchEventsOptions {
            days: self.config.etl.days_window,
            limit: self.config.etl.batch_size,
            status: "all".to_string(),
            ..Default::default()
        };
        let response = self
            .feed
            .fetch_events(&opts)
            .await
            .context("fetching events")?;

        let mut records = Vec::with_capacity(response.events.len());
        for event in &response.events {
            match EventRecord::from_event(event) {
                Ok(record) => records.push(record),
                // One malformed event never aborts the batch.
                Err(err) => {
                    warn!(event_id = %event.id, error = %err, "skipping event that failed to normalize")
                }
            }
        }

        self.store
            .batch_upsert_events(&records)
            .await
            .context("upserting events")?;

        info!(count = records.len(), "processed events");
        Ok(records.len() as i32)
    }

    /// Healthy only when both the feed and the store are reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.feed
            .health_check()
            .await
            .context("feed health check failed")?;
        self.store
            .health_check()
            .await
            .context("database health check failed")?;
        Ok(())
    }

    pub async fn last_run_info(&self) -> Result<Option<RunInfo>> {
        self.store.last_run().await
    }
}

//! Axum health, readiness, and metrics surface for the ingest service.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use eonet_core::RunInfo;
use eonet_etl::Pipeline;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Read-only view of pipeline health and the last recorded run.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn health_check(&self) -> Result<()>;
    async fn last_run(&self) -> Result<Option<RunInfo>>;
}

#[async_trait]
impl StatusSource for Pipeline {
    async fn health_check(&self) -> Result<()> {
        Pipeline::health_check(self).await
    }

    async fn last_run(&self) -> Result<Option<RunInfo>> {
        self.last_run_info().await
    }
}

pub fn app<S: StatusSource>(source: Arc<S>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/ready", get(ready_handler::<S>))
        .route("/metrics", get(metrics_handler::<S>))
        .route("/runs/last", get(last_run_handler::<S>))
        .with_state(source)
}

pub async fn serve<S, F>(source: Arc<S>, port: u16, shutdown: F) -> Result<()>
where
    S: StatusSource,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving health endpoints");
    axum::serve(listener, app(source))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler<S: StatusSource>(State(source): State<Arc<S>>) -> Response {
    probe(source.as_ref(), Duration::from_secs(10), "healthy").await
}

async fn ready_handler<S: StatusSource>(State(source): State<Arc<S>>) -> Response {
    probe(source.as_ref(), Duration::from_secs(5), "ready").await
}

async fn probe<S: StatusSource>(source: &S, limit: Duration, label: &'static str) -> Response {
    match tokio::time::timeout(limit, source.health_check()).await {
        Ok(Ok(())) => Json(json!({
            "status": label,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Ok(Err(err)) => {
            error!(probe = label, error = %err, "health check failed");
            unavailable()
        }
        Err(_) => {
            error!(probe = label, "health check timed out");
            unavailable()
        }
    }
}

// Failure detail stays in the logs; clients get a generic body.
fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "unavailable" })),
    )
        .into_response()
}

async fn metrics_handler<S: StatusSource>(State(source): State<Arc<S>>) -> Response {
    match tokio::time::timeout(Duration::from_secs(5), source.last_run()).await {
        Ok(Ok(Some(run))) => {
            ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], render_metrics(&run))
                .into_response()
        }
        Ok(Ok(None)) => (
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            "# no ingest runs recorded\n".to_string(),
        )
            .into_response(),
        Ok(Err(err)) => {
            error!(error = %err, "failed to read last run for metrics");
            unavailable()
        }
        Err(_) => {
            error!("metrics backend read timed out");
            unavailable()
        }
    }
}

fn render_metrics(run: &RunInfo) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "# HELP etl_runs_total Total number of ingest runs");
    let _ = writeln!(body, "# TYPE etl_runs_total counter");
    let _ = writeln!(body, "etl_runs_total{{status=\"{}\"}} 1", run.status);
    let _ = writeln!(body, "# HELP etl_events_processed_total Events processed by the last run");
    let _ = writeln!(body, "# TYPE etl_events_processed_total counter");
    let _ = writeln!(body, "etl_events_processed_total {}", run.events_processed);
    let _ = writeln!(body, "# HELP etl_categories_processed_total Categories processed by the last run");
    let _ = writeln!(body, "# TYPE etl_categories_processed_total counter");
    let _ = writeln!(body, "etl_categories_processed_total {}", run.categories_processed);
    body
}

async fn last_run_handler<S: StatusSource>(State(source): State<Arc<S>>) -> Response {
    match source.last_run().await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no runs recorded" })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to read last run");
            unavailable()
        }
    }
}

//! HTTP request handlers
//!
//! Contains handlers for the metrics endpoint and the dashboard APIs.

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Local};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::history::DailyProduction;
use crate::monitor::MonitorData;
use crate::version;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Health status
    status: String,
    /// Configured gateway address
    envoy_ip: String,
    /// Application version
    version: String,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        envoy_ip: state.config.envoy.ip.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint - runs one full scrape and returns Prometheus format
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();

    let output = state.scraper.scrape(state.tokens.expires_at()).await;

    debug!(
        duration_ms = start.elapsed().as_millis() as u64,
        bytes = output.len(),
        "Scrape complete"
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        output,
    )
}

/// Diagnostic summary of the running configuration
pub async fn debug_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "config": {
            "envoy_ip": config.envoy.ip,
            "web_dir": config.server.web_dir,
            "queries": config.queries.iter().map(|q| &q.name).collect::<Vec<_>>(),
            "metric_count": config.metric_count(),
            "calculated_metric_count": config.calculated_metrics.len(),
            "condition_count": config.conditions.len(),
            "mqtt_enabled": config.mqtt.enabled,
        },
        "token_expires": state.tokens.expires_at(),
    }))
}

/// Latest monitor snapshot for the dashboard
pub async fn api_monitor(State(state): State<AppState>) -> Json<MonitorData> {
    let data = state.monitor.read().expect("RwLock poisoned").clone();
    Json(data)
}

/// Daily production response payload
#[derive(Serialize)]
pub struct DailyProductionResponse {
    date: String,
    previous_date: String,
    current_day: Option<DailyProduction>,
    previous_day: Option<DailyProduction>,
    available_dates: Vec<String>,
}

/// Daily production history, defaulting to today vs. yesterday
pub async fn api_daily_production(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<DailyProductionResponse>> {
    let date = match params.get("date") {
        Some(date) => validate_date(date)?,
        None => Local::now().format("%Y-%m-%d").to_string(),
    };
    let previous_date = match params.get("previous") {
        Some(date) => validate_date(date)?,
        None => (Local::now() - Duration::days(1))
            .format("%Y-%m-%d")
            .to_string(),
    };

    Ok(Json(DailyProductionResponse {
        current_day: state.tracker.day(&date),
        previous_day: state.tracker.day(&previous_date),
        available_dates: state.tracker.available_dates(),
        date,
        previous_date,
    }))
}

fn validate_date(date: &str) -> AppResult<String> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| AppError::Internal(format!("Invalid date '{}': {}", date, e)))?;
    Ok(date.to_string())
}

/// MQTT publisher status
pub async fn api_mqtt_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = match &state.mqtt {
        Some(publisher) => json!({
            "enabled": true,
            "connected": publisher.is_connected(),
            "broker": publisher.broker_address(),
            "topic_prefix": publisher.topic_prefix(),
            "publish_interval": publisher.publish_interval_secs(),
            "last_publish": publisher.last_publish(),
        }),
        None => json!({
            "enabled": false,
            "connected": false,
            "broker": "",
            "topic_prefix": "",
            "publish_interval": 0,
            "last_publish": 0,
        }),
    };
    Json(status)
}

/// Build information as JSON
pub async fn api_version() -> Json<version::BuildInfo> {
    Json(version::build_info())
}

/// Build information as plain text
pub async fn version_text() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        version::detailed_version_string(),
    )
}

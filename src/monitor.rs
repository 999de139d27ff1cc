//! Live monitor state for the dashboard
//!
//! A background task polls a fixed set of device endpoints every 30 seconds
//! and keeps a denormalized snapshot behind a shared lock. The dashboard and
//! the MQTT publisher read this snapshot; the Prometheus scrape path does
//! not, it fetches fresh data per scrape.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::collector::EnvoyClient;
use crate::config::LocationConfig;
use crate::engine::path;
use crate::solar::{self, SolarPosition};

const PRODUCTION_URL: &str = "https://{envoy_ip}/api/v1/production";
const INVERTERS_URL: &str = "https://{envoy_ip}/api/v1/production/inverters";
const LIVEDATA_URL: &str = "https://{envoy_ip}/ivp/livedata/status";

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Snapshot served by `/api/monitor`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorData {
    pub timestamp: DateTime<Utc>,
    pub production: ProductionData,
    pub inverters: Vec<InverterData>,
    pub power_flow: PowerFlowData,
    pub solar_position: SolarPosition,
    pub summary: SummaryData,
}

/// Production totals from `/api/v1/production`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductionData {
    pub current_watts: f64,
    pub today_wh: f64,
    pub lifetime_wh: f64,
    pub seven_days_wh: f64,
}

/// Per-inverter data from `/api/v1/production/inverters`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InverterData {
    pub serial: String,
    pub current_watts: f64,
    pub max_watts: f64,
    pub last_report: i64,
    pub device_type: i64,
}

/// Power flow aggregates from `/ivp/livedata/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerFlowData {
    pub pv_watts: f64,
    pub grid_watts: f64,
    pub load_watts: f64,
    pub storage_watts: f64,
    pub storage_soc: f64,
    pub grid_import: f64,
    pub grid_export: f64,
}

/// Derived system summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryData {
    pub total_inverters: usize,
    pub active_inverters: usize,
    pub system_efficiency: f64,
    pub self_consumption: f64,
    pub solar_coverage: f64,
}

/// Shared handle to the latest monitor snapshot.
pub type SharedMonitor = Arc<RwLock<MonitorData>>;

/// Create an empty shared snapshot.
pub fn shared() -> SharedMonitor {
    Arc::new(RwLock::new(MonitorData::default()))
}

/// Spawn the 30-second refresh loop as a detached task.
pub fn spawn_refresh_loop(client: Arc<EnvoyClient>, location: LocationConfig, shared: SharedMonitor) {
    tokio::spawn(async move {
        loop {
            let data = refresh(&client, &location).await;
            *shared.write().expect("RwLock poisoned") = data;
            tokio::time::sleep(REFRESH_INTERVAL).await;
        }
    });
}

/// Fetch all monitor endpoints and assemble a fresh snapshot.
async fn refresh(client: &EnvoyClient, location: &LocationConfig) -> MonitorData {
    let mut data = MonitorData {
        timestamp: Utc::now(),
        ..MonitorData::default()
    };

    match fetch_json(client, PRODUCTION_URL).await {
        Some(doc) => apply_production(&mut data, &doc),
        None => debug!("No production data this cycle"),
    }

    if let Some(doc) = fetch_json(client, INVERTERS_URL).await {
        apply_inverters(&mut data, &doc);
    }

    if let Some(doc) = fetch_json(client, LIVEDATA_URL).await {
        apply_power_flow(&mut data, &doc);
    }

    data.solar_position = solar::solar_position(location.latitude, Local::now().naive_local());
    compute_summary(&mut data);

    data
}

async fn fetch_json(client: &EnvoyClient, url: &str) -> Option<Value> {
    let body = match client.fetch(url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url, error = %e, "Monitor fetch failed");
            return None;
        }
    };
    match serde_json::from_str(&body) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(url, error = %e, "Monitor response was not JSON");
            None
        }
    }
}

fn apply_production(data: &mut MonitorData, doc: &Value) {
    let p = &mut data.production;
    if let Some(watts) = path::resolve_f64(doc, "wattsNow") {
        p.current_watts = watts;
    }
    if let Some(wh) = path::resolve_f64(doc, "wattHoursToday") {
        p.today_wh = wh;
    }
    if let Some(wh) = path::resolve_f64(doc, "wattHoursLifetime") {
        p.lifetime_wh = wh;
    }
    if let Some(wh) = path::resolve_f64(doc, "wattHoursSevenDays") {
        p.seven_days_wh = wh;
    }
}

fn apply_inverters(data: &mut MonitorData, doc: &Value) {
    let Some(items) = doc.as_array() else {
        return;
    };

    let mut active = 0;
    data.inverters = items
        .iter()
        .map(|item| {
            let current_watts = path::resolve_f64(item, "lastReportWatts").unwrap_or(0.0);
            if current_watts > 0.0 {
                active += 1;
            }
            InverterData {
                serial: path::resolve(item, "serialNumber")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                current_watts,
                max_watts: path::resolve_f64(item, "maxReportWatts").unwrap_or(0.0),
                last_report: path::resolve_f64(item, "lastReportDate").unwrap_or(0.0) as i64,
                device_type: path::resolve_f64(item, "devType").unwrap_or(0.0) as i64,
            }
        })
        .collect();

    // Stable ordering for the dashboard grid
    data.inverters.sort_by(|a, b| a.serial.cmp(&b.serial));

    data.summary.total_inverters = items.len();
    data.summary.active_inverters = active;
}

fn apply_power_flow(data: &mut MonitorData, doc: &Value) {
    let flow = &mut data.power_flow;

    if let Some(mw) = path::resolve_f64(doc, "meters.pv.agg_p_mw") {
        flow.pv_watts = mw / 1000.0;
    }
    if let Some(mw) = path::resolve_f64(doc, "meters.grid.agg_p_mw") {
        let grid_watts = mw / 1000.0;
        flow.grid_watts = grid_watts;
        if grid_watts > 0.0 {
            flow.grid_import = grid_watts;
        } else {
            flow.grid_export = -grid_watts;
        }
    }
    if let Some(mw) = path::resolve_f64(doc, "meters.load.agg_p_mw") {
        flow.load_watts = mw / 1000.0;
    }
    if let Some(mw) = path::resolve_f64(doc, "meters.storage.agg_p_mw") {
        flow.storage_watts = mw / 1000.0;
    }
    if let Some(soc) = path::resolve_f64(doc, "meters.storage.agg_soc") {
        flow.storage_soc = soc;
    }
}

fn compute_summary(data: &mut MonitorData) {
    let flow = &data.power_flow;
    let summary = &mut data.summary;

    if flow.pv_watts > 0.0 && flow.load_watts > 0.0 {
        summary.self_consumption =
            ((flow.pv_watts - flow.grid_export) / flow.pv_watts * 100.0).clamp(0.0, 100.0);
        summary.solar_coverage = (flow.pv_watts / flow.load_watts * 100.0).clamp(0.0, 100.0);
    }

    if summary.total_inverters > 0 {
        summary.system_efficiency =
            summary.active_inverters as f64 / summary.total_inverters as f64 * 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_production() {
        let mut data = MonitorData::default();
        apply_production(
            &mut data,
            &json!({
                "wattsNow": 4250.5,
                "wattHoursToday": 12_000,
                "wattHoursLifetime": 9_000_000,
                "wattHoursSevenDays": 84_000
            }),
        );
        assert_eq!(data.production.current_watts, 4250.5);
        assert_eq!(data.production.today_wh, 12_000.0);
        assert_eq!(data.production.lifetime_wh, 9_000_000.0);
        assert_eq!(data.production.seven_days_wh, 84_000.0);
    }

    #[test]
    fn test_apply_inverters_sorted_and_counted() {
        let mut data = MonitorData::default();
        apply_inverters(
            &mut data,
            &json!([
                {"serialNumber": "B2", "lastReportWatts": 120, "maxReportWatts": 300},
                {"serialNumber": "A1", "lastReportWatts": 0, "maxReportWatts": 300}
            ]),
        );
        assert_eq!(data.inverters.len(), 2);
        assert_eq!(data.inverters[0].serial, "A1");
        assert_eq!(data.inverters[1].serial, "B2");
        assert_eq!(data.summary.total_inverters, 2);
        assert_eq!(data.summary.active_inverters, 1);
    }

    #[test]
    fn test_apply_power_flow_import_export_split() {
        let mut data = MonitorData::default();
        apply_power_flow(
            &mut data,
            &json!({"meters": {
                "pv": {"agg_p_mw": 3_000_000},
                "grid": {"agg_p_mw": -1_000_000},
                "load": {"agg_p_mw": 2_000_000},
                "storage": {"agg_p_mw": 0, "agg_soc": 85}
            }}),
        );
        let flow = &data.power_flow;
        assert_eq!(flow.pv_watts, 3000.0);
        assert_eq!(flow.grid_watts, -1000.0);
        assert_eq!(flow.grid_export, 1000.0);
        assert_eq!(flow.grid_import, 0.0);
        assert_eq!(flow.load_watts, 2000.0);
        assert_eq!(flow.storage_soc, 85.0);
    }

    #[test]
    fn test_summary_percentages() {
        let mut data = MonitorData::default();
        data.power_flow.pv_watts = 3000.0;
        data.power_flow.load_watts = 2000.0;
        data.power_flow.grid_export = 1000.0;
        data.summary.total_inverters = 10;
        data.summary.active_inverters = 8;

        compute_summary(&mut data);

        // (3000 - 1000) / 3000 = 66.7% self consumption
        assert!((data.summary.self_consumption - 66.666).abs() < 0.01);
        // Coverage clamps at 100%
        assert_eq!(data.summary.solar_coverage, 100.0);
        assert_eq!(data.summary.system_efficiency, 80.0);
    }

    #[test]
    fn test_summary_skips_when_idle() {
        let mut data = MonitorData::default();
        compute_summary(&mut data);
        assert_eq!(data.summary.self_consumption, 0.0);
        assert_eq!(data.summary.solar_coverage, 0.0);
        assert_eq!(data.summary.system_efficiency, 0.0);
    }
}

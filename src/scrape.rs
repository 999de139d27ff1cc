//! Scrape orchestration
//!
//! One scrape runs synchronously per `/metrics` request: fetch each
//! configured endpoint, parse it, render its metrics into the output buffer,
//! then evaluate calculated metrics over the cache populated by rendering,
//! and finally append the exporter's own health metrics.
//!
//! Failures are local: a query whose fetch or parse fails is logged and
//! skipped, and the scrape continues with the remaining queries. Partial
//! output is a correct result, not an error.

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::collector::EnvoyClient;
use crate::config::Config;
use crate::engine::calc::CalculatedSet;
use crate::engine::condition::ConditionTable;
use crate::engine::{render, MetricCache};

/// Orchestrates one full scrape cycle.
pub struct Scraper {
    config: Arc<Config>,
    client: Arc<EnvoyClient>,
    conditions: ConditionTable,
    calculated: CalculatedSet,
}

impl Scraper {
    /// Build a scraper, compiling the condition table and calculation
    /// expressions once.
    pub fn new(config: Arc<Config>, client: Arc<EnvoyClient>) -> Self {
        let conditions = ConditionTable::from_config(&config.conditions);
        let calculated = CalculatedSet::from_config(&config.calculated_metrics);
        Self {
            config,
            client,
            conditions,
            calculated,
        }
    }

    /// Run one scrape and return the exposition-format body.
    ///
    /// `token_expires` is the Unix timestamp of the current bearer token's
    /// expiry, reported as an exporter-health gauge.
    #[instrument(skip(self), name = "scrape")]
    pub async fn scrape(&self, token_expires: i64) -> String {
        let mut out = String::new();
        let mut cache = MetricCache::new();

        for query in &self.config.queries {
            let body = match self.client.fetch(&query.url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(query = %query.name, error = %e, "Failed to query endpoint");
                    continue;
                }
            };

            let document: Value = match serde_json::from_str(&body) {
                Ok(document) => document,
                Err(e) => {
                    warn!(query = %query.name, error = %e, "Failed to parse JSON");
                    continue;
                }
            };

            render::render_query(query, &document, &self.conditions, &mut cache, &mut out);
        }

        // Calculated metrics read the cache the renderer just populated;
        // they must come after every query has been processed.
        self.calculated.render(&cache, &mut out);

        append_exporter_metrics(&mut out, token_expires, Utc::now().timestamp());

        out
    }

    /// Render the already-fetched documents without touching the network.
    ///
    /// Shared by the scrape path's tests; documents pair each query name with
    /// its parsed body.
    #[cfg(test)]
    fn render_documents(&self, documents: &[(usize, Value)]) -> String {
        let mut out = String::new();
        let mut cache = MetricCache::new();
        for (index, document) in documents {
            render::render_query(
                &self.config.queries[*index],
                document,
                &self.conditions,
                &mut cache,
                &mut out,
            );
        }
        self.calculated.render(&cache, &mut out);
        out
    }
}

/// Fixed exporter-health metrics appended to every scrape.
fn append_exporter_metrics(out: &mut String, token_expires: i64, now: i64) {
    let _ = writeln!(out, "# HELP envoy_exporter_up Exporter up status");
    let _ = writeln!(out, "# TYPE envoy_exporter_up gauge");
    let _ = writeln!(out, "envoy_exporter_up 1");

    let _ = writeln!(
        out,
        "# HELP envoy_token_expires_timestamp Token expiry timestamp"
    );
    let _ = writeln!(out, "# TYPE envoy_token_expires_timestamp gauge");
    let _ = writeln!(out, "envoy_token_expires_timestamp {}", token_expires);

    let _ = writeln!(out, "# HELP envoy_scrape_timestamp Timestamp of this scrape");
    let _ = writeln!(out, "# TYPE envoy_scrape_timestamp gauge");
    let _ = writeln!(out, "envoy_scrape_timestamp {}", now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenManager;
    use crate::config::{
        CalculatedMetricDef, FieldSpec, MetricDef, MetricKind, QueryDef,
    };
    use serde_json::json;

    fn scraper(config: Config) -> Scraper {
        let tokens = Arc::new(
            TokenManager::new("user@example.com", "secret", "122001001234")
                .expect("client build failed"),
        );
        let client = Arc::new(
            EnvoyClient::new("192.168.1.44", 5000, tokens).expect("client build failed"),
        );
        Scraper::new(Arc::new(config), client)
    }

    fn watts_config() -> Config {
        let mut config = Config::default();
        config.queries.push(QueryDef {
            name: "production".to_string(),
            url: "https://{envoy_ip}/api/v1/production".to_string(),
            array: false,
            condition: String::new(),
            metrics: vec![MetricDef {
                name: "envoy_pv_power_watts".to_string(),
                kind: MetricKind::Gauge,
                help: "PV power".to_string(),
                condition: String::new(),
                fields: vec![FieldSpec {
                    json_path: "wattsNow".to_string(),
                    label: String::new(),
                    label_value: String::new(),
                    transform: String::new(),
                }],
                value: String::new(),
            }],
        });
        config.calculated_metrics.push(CalculatedMetricDef {
            name: "envoy_pv_power_kw".to_string(),
            kind: MetricKind::Gauge,
            help: "PV power in kW".to_string(),
            condition: "pv_producing".to_string(),
            calculation: "envoy_pv_power_watts / 1000".to_string(),
        });
        config
    }

    #[test]
    fn test_calculated_runs_after_queries() {
        let s = scraper(watts_config());
        let out = s.render_documents(&[(0, json!({"wattsNow": 1500}))]);

        assert!(out.contains("envoy_pv_power_watts 1500\n"));
        assert!(out.contains("envoy_pv_power_kw 1.50\n"));
        // Calculated output comes after the raw metric
        let raw = out.find("envoy_pv_power_watts 1500").unwrap();
        let calc = out.find("envoy_pv_power_kw").unwrap();
        assert!(raw < calc);
    }

    #[test]
    fn test_calculated_condition_gates_on_cache() {
        let s = scraper(watts_config());
        let out = s.render_documents(&[(0, json!({"wattsNow": 0}))]);

        assert!(out.contains("envoy_pv_power_watts 0\n"));
        assert!(!out.contains("envoy_pv_power_kw"));
    }

    #[test]
    fn test_exporter_health_tail() {
        let mut out = String::new();
        append_exporter_metrics(&mut out, 1_700_000_000, 1_690_000_000);

        assert!(out.contains("# TYPE envoy_exporter_up gauge\n"));
        assert!(out.contains("envoy_exporter_up 1\n"));
        assert!(out.contains("envoy_token_expires_timestamp 1700000000\n"));
        assert!(out.contains("envoy_scrape_timestamp 1690000000\n"));
    }
}

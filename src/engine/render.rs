//! Rendering of configured metrics into exposition-format lines
//!
//! One renderer invocation produces zero or one sample line for one metric
//! definition against one JSON document (or one array element), and records
//! the emitted value into the metric cache as a side effect.
//!
//! The condition check runs before anything is written, so a failed condition
//! suppresses the `# HELP`/`# TYPE` preamble as well as the sample. For array
//! queries every element gets its own preamble; Prometheus parsers tolerate
//! the repeated identical lines.

use std::fmt::Write;

use serde_json::Value;
use tracing::debug;

use crate::config::{MetricDef, QueryDef};
use crate::engine::condition::ConditionTable;
use crate::engine::transform::{self, SIGNAL_STRENGTH_PERCENTAGE};
use crate::engine::{path, MetricCache};

/// Render every metric of a query against its fetched document.
///
/// A query-level condition failure skips the whole query. Array queries fan
/// out each metric over every element; a non-array document for an array
/// query renders nothing.
pub fn render_query(
    query: &QueryDef,
    document: &Value,
    conditions: &ConditionTable,
    cache: &mut MetricCache,
    out: &mut String,
) {
    if !conditions.evaluate(&query.condition, document) {
        debug!(query = %query.name, condition = %query.condition, "Condition not met, skipping query");
        return;
    }

    for metric in &query.metrics {
        if query.array {
            if let Some(items) = document.as_array() {
                for item in items {
                    render_metric(metric, item, conditions, cache, out);
                }
            }
        } else {
            render_metric(metric, document, conditions, cache, out);
        }
    }
}

/// Render a single metric definition against a document.
pub fn render_metric(
    metric: &MetricDef,
    document: &Value,
    conditions: &ConditionTable,
    cache: &mut MetricCache,
    out: &mut String,
) {
    if !conditions.evaluate(&metric.condition, document) {
        return;
    }

    let _ = writeln!(out, "# HELP {} {}", metric.name, escape_help(&metric.help));
    let _ = writeln!(out, "# TYPE {} {}", metric.name, metric.kind);

    // Fieldless metrics emit exactly one static sample and are not cached.
    if metric.fields.is_empty() {
        let value = if metric.value.is_empty() {
            "1"
        } else {
            metric.value.as_str()
        };
        let _ = writeln!(out, "{} {}", metric.name, value);
        return;
    }

    let mut labels: Vec<(String, String)> = Vec::new();
    let mut sample: Option<Value> = None;

    for field in &metric.fields {
        if field.is_label() {
            if !field.label_value.is_empty() {
                set_label(&mut labels, &field.label, field.label_value.clone());
            } else if let Some(value) = path::resolve(document, &field.json_path) {
                set_label(&mut labels, &field.label, display_value(value));
            }
        } else {
            // Last value field wins; an unresolved path clears the sample
            sample = path::resolve(document, &field.json_path)
                .cloned()
                .map(|value| transform::apply(value, &field.transform));
        }
    }

    // Second pass for the multi-input percentage transform. Runs after the
    // plain field pass and overrides whatever it produced.
    for field in &metric.fields {
        if field.transform != SIGNAL_STRENGTH_PERCENTAGE || !field.json_path.contains(',') {
            continue;
        }
        let Some((strength_path, max_path)) = field.json_path.split_once(',') else {
            continue;
        };
        let strength = path::resolve_f64(document, strength_path.trim());
        let max = path::resolve_f64(document, max_path.trim());
        if let (Some(strength), Some(max)) = (strength, max) {
            if max > 0.0 {
                if let Some(pct) = serde_json::Number::from_f64((strength / max) * 100.0) {
                    sample = Some(Value::Number(pct));
                }
            }
        }
    }

    if sample.is_none() && !metric.value.is_empty() {
        sample = Some(Value::String(metric.value.clone()));
    }

    let Some(sample) = sample else {
        return;
    };

    let _ = writeln!(
        out,
        "{}{} {}",
        metric.name,
        format_labels(&labels),
        display_value(&sample)
    );

    if let Some(value) = numeric_value(&sample) {
        cache.insert(&metric.name, value);
    }
}

/// Set a label, replacing an earlier field's value for the same name.
fn set_label(labels: &mut Vec<(String, String)>, name: &str, value: String) {
    match labels.iter_mut().find(|(k, _)| k == name) {
        Some(entry) => entry.1 = value,
        None => labels.push((name.to_string(), value)),
    }
}

/// Format labels as `{k="v",...}`, empty string when there are none.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// Render a JSON value the way it appears in a sample line: numbers and
/// booleans via their canonical text, strings bare.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// The cacheable numeric reading of a sample: a number, or a string that
/// parses as one.
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Escape backslash and newline in help text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Escape backslash, double-quote, and newline in label values.
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionDef, FieldSpec, MetricKind};
    use serde_json::json;

    fn gauge(name: &str, help: &str, fields: Vec<FieldSpec>) -> MetricDef {
        MetricDef {
            name: name.to_string(),
            kind: MetricKind::Gauge,
            help: help.to_string(),
            condition: String::new(),
            fields,
            value: String::new(),
        }
    }

    fn value_field(json_path: &str) -> FieldSpec {
        FieldSpec {
            json_path: json_path.to_string(),
            label: String::new(),
            label_value: String::new(),
            transform: String::new(),
        }
    }

    fn label_field(json_path: &str, label: &str) -> FieldSpec {
        FieldSpec {
            json_path: json_path.to_string(),
            label: label.to_string(),
            label_value: String::new(),
            transform: String::new(),
        }
    }

    fn render(metric: &MetricDef, doc: &Value) -> (String, MetricCache) {
        let conditions = ConditionTable::default();
        let mut cache = MetricCache::new();
        let mut out = String::new();
        render_metric(metric, doc, &conditions, &mut cache, &mut out);
        (out, cache)
    }

    #[test]
    fn test_single_value_field() {
        let metric = gauge(
            "envoy_production_watts_now",
            "Current production in watts",
            vec![value_field("wattsNow")],
        );
        let doc = json!({"wattsNow": 4250.5});
        let (out, cache) = render(&metric, &doc);

        assert!(out.contains("# HELP envoy_production_watts_now Current production in watts\n"));
        assert!(out.contains("# TYPE envoy_production_watts_now gauge\n"));
        assert!(out.contains("envoy_production_watts_now 4250.5\n"));
        assert_eq!(cache.get("envoy_production_watts_now"), Some(4250.5));
    }

    #[test]
    fn test_static_metric_without_fields() {
        let mut metric = gauge("envoy_info", "Exporter info", vec![]);
        let (out, cache) = render(&metric, &json!({}));
        assert!(out.contains("envoy_info 1\n"));
        assert!(cache.is_empty());

        metric.value = "7".to_string();
        let (out, _) = render(&metric, &json!({}));
        assert!(out.contains("envoy_info 7\n"));
    }

    #[test]
    fn test_label_and_value_fields() {
        let metric = gauge(
            "envoy_inverter_last_report_watts",
            "Last reported watts",
            vec![
                label_field("serialNumber", "serial"),
                value_field("lastReportWatts"),
            ],
        );
        let doc = json!({"serialNumber": "A1", "lastReportWatts": 100});
        let (out, cache) = render(&metric, &doc);

        assert!(out.contains("envoy_inverter_last_report_watts{serial=\"A1\"} 100\n"));
        assert_eq!(cache.get("envoy_inverter_last_report_watts"), Some(100.0));
    }

    #[test]
    fn test_fixed_label_value_overrides_extraction() {
        let mut field = label_field("phase", "phase");
        field.label_value = "total".to_string();
        let metric = gauge(
            "envoy_power",
            "",
            vec![field, value_field("w")],
        );
        let doc = json!({"phase": "a", "w": 9});
        let (out, _) = render(&metric, &doc);
        assert!(out.contains("envoy_power{phase=\"total\"} 9\n"));
    }

    #[test]
    fn test_last_value_field_wins() {
        let metric = gauge(
            "envoy_power",
            "",
            vec![value_field("primary"), value_field("secondary")],
        );
        let doc = json!({"primary": 1, "secondary": 2});
        let (out, _) = render(&metric, &doc);
        assert!(out.contains("envoy_power 2\n"));
    }

    #[test]
    fn test_unresolved_trailing_value_field_clears_sample() {
        let metric = gauge(
            "envoy_power",
            "",
            vec![value_field("primary"), value_field("missing")],
        );
        let doc = json!({"primary": 1});
        let (out, cache) = render(&metric, &doc);

        // HELP/TYPE are still written, no sample line follows
        assert!(out.contains("# TYPE envoy_power gauge\n"));
        assert!(!out.contains("envoy_power 1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_transform_applied_to_value() {
        let mut field = value_field("meters.pv.agg_p_mw");
        field.transform = "mw_to_watts".to_string();
        let metric = gauge("envoy_pv_power_watts", "", vec![field]);
        let doc = json!({"meters": {"pv": {"agg_p_mw": 1_500_000}}});
        let (out, cache) = render(&metric, &doc);
        assert!(out.contains("envoy_pv_power_watts 1500.0\n"));
        assert_eq!(cache.get("envoy_pv_power_watts"), Some(1500.0));
    }

    #[test]
    fn test_signal_strength_percentage_pass() {
        let mut field = value_field("signal.strength, signal.max");
        field.transform = "signal_strength_percentage".to_string();
        let metric = gauge("envoy_wifi_signal_percent", "", vec![field]);
        let doc = json!({"signal": {"strength": 3, "max": 4}});
        let (out, cache) = render(&metric, &doc);
        assert!(out.contains("envoy_wifi_signal_percent 75.0\n"));
        assert_eq!(cache.get("envoy_wifi_signal_percent"), Some(75.0));
    }

    #[test]
    fn test_signal_strength_zero_denominator_skipped() {
        let mut field = value_field("signal.strength,signal.max");
        field.transform = "signal_strength_percentage".to_string();
        let metric = gauge("envoy_wifi_signal_percent", "", vec![field]);
        let doc = json!({"signal": {"strength": 3, "max": 0}});
        let (out, _) = render(&metric, &doc);
        assert!(!out.contains("envoy_wifi_signal_percent "));
    }

    #[test]
    fn test_static_value_fallback_after_unresolved_fields() {
        let mut metric = gauge("envoy_mode", "", vec![value_field("missing")]);
        metric.value = "0".to_string();
        let (out, cache) = render(&metric, &json!({}));
        assert!(out.contains("envoy_mode 0\n"));
        // Numeric-parsable strings are cached
        assert_eq!(cache.get("envoy_mode"), Some(0.0));
    }

    #[test]
    fn test_condition_suppresses_help_and_type() {
        let conditions = ConditionTable::from_config(&[ConditionDef {
            name: "has_storage".to_string(),
            description: String::new(),
            check: "json_path_exists(storage)".to_string(),
        }]);
        let mut metric = gauge("envoy_storage_soc", "", vec![value_field("storage.soc")]);
        metric.condition = "has_storage".to_string();

        let mut cache = MetricCache::new();
        let mut out = String::new();
        render_metric(&metric, &json!({}), &conditions, &mut cache, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_string_sample_emitted_but_not_cached() {
        let metric = gauge("envoy_status", "", vec![value_field("status")]);
        let doc = json!({"status": "normal"});
        let (out, cache) = render(&metric, &doc);
        assert!(out.contains("envoy_status normal\n"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_array_query_renders_each_element() {
        let query = QueryDef {
            name: "inverters".to_string(),
            url: "https://{envoy_ip}/api/v1/production/inverters".to_string(),
            array: true,
            condition: String::new(),
            metrics: vec![gauge(
                "envoy_inverter_last_report_watts",
                "Last reported watts",
                vec![
                    label_field("serialNumber", "serial"),
                    value_field("lastReportWatts"),
                ],
            )],
        };
        let doc = json!([
            {"serialNumber": "A1", "lastReportWatts": 100},
            {"serialNumber": "A2", "lastReportWatts": 0}
        ]);

        let conditions = ConditionTable::default();
        let mut cache = MetricCache::new();
        let mut out = String::new();
        render_query(&query, &doc, &conditions, &mut cache, &mut out);

        assert!(out.contains("envoy_inverter_last_report_watts{serial=\"A1\"} 100\n"));
        assert!(out.contains("envoy_inverter_last_report_watts{serial=\"A2\"} 0\n"));
        // Each element carries its own preamble
        assert_eq!(
            out.matches("# TYPE envoy_inverter_last_report_watts gauge\n")
                .count(),
            2
        );
        // Cache holds the last element's value
        assert_eq!(cache.get("envoy_inverter_last_report_watts"), Some(0.0));
    }

    #[test]
    fn test_query_condition_skips_all_metrics() {
        let query = QueryDef {
            name: "livedata".to_string(),
            url: "https://{envoy_ip}/ivp/livedata/status".to_string(),
            array: false,
            condition: "accessible".to_string(),
            metrics: vec![gauge("envoy_x", "", vec![value_field("x")])],
        };
        let conditions = ConditionTable::from_config(&[ConditionDef {
            name: "accessible".to_string(),
            description: String::new(),
            check: "endpoint_accessible".to_string(),
        }]);

        let mut cache = MetricCache::new();
        let mut out = String::new();
        render_query(&query, &json!(null), &conditions, &mut cache, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_label_value_escaping() {
        let metric = gauge(
            "envoy_info",
            "",
            vec![label_field("name", "name"), value_field("v")],
        );
        let doc = json!({"name": "say \"hi\"", "v": 1});
        let (out, _) = render(&metric, &doc);
        assert!(out.contains(r#"envoy_info{name="say \"hi\""} 1"#));
    }
}

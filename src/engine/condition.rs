//! Named boolean predicates gating metric and query emission
//!
//! Check strings are parsed once into a closed [`Check`] enum when the table
//! is built; evaluation is then a plain match. The whole table is fail-open:
//! an empty condition reference, an unknown condition name, or an
//! unrecognized check string all evaluate to true, so absent conditions never
//! block emission.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::config::ConditionDef;
use crate::engine::path;

/// A parsed condition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// True iff the document is not JSON null
    EndpointAccessible,
    /// True iff the path resolves to a value
    JsonPathExists(String),
    /// True iff the path resolves to a nonzero number.
    ///
    /// The configured form is `json_path_value(<path>) <op> <literal>`; the
    /// operator and literal are accepted for compatibility but only the
    /// nonzero test is performed.
    JsonPathNonZero(String),
    /// True iff the document is an array containing an element whose `type`
    /// field equals the given string
    ArrayHasType(String),
    /// A `json_path_value` check missing its operator or literal; always false
    Never,
    /// Unrecognized check text; always true
    Unknown,
}

impl Check {
    /// Parse a check string from the configuration.
    pub fn parse(check: &str) -> Self {
        let check = check.trim();

        if check == "endpoint_accessible" {
            return Check::EndpointAccessible;
        }

        if let Some(rest) = check.strip_prefix("json_path_exists") {
            return Check::JsonPathExists(strip_call_argument(rest));
        }

        if check.starts_with("json_path_value") {
            let mut parts = check.split_whitespace();
            let head = parts.next().unwrap_or_default();
            let op = parts.next();
            let literal = parts.next();
            if op.is_none() || literal.is_none() {
                return Check::Never;
            }
            let rest = head.strip_prefix("json_path_value").unwrap_or_default();
            return Check::JsonPathNonZero(strip_call_argument(rest));
        }

        if let Some(start) = check.find("array_has_type") {
            let rest = &check[start + "array_has_type".len()..];
            return Check::ArrayHasType(strip_call_argument(rest));
        }

        Check::Unknown
    }

    /// Evaluate this check against a JSON document.
    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            Check::EndpointAccessible => !document.is_null(),
            Check::JsonPathExists(p) => path::resolve(document, p).is_some(),
            Check::JsonPathNonZero(p) => {
                matches!(path::resolve_f64(document, p), Some(v) if v != 0.0)
            }
            Check::ArrayHasType(wanted) => match document.as_array() {
                Some(items) => items
                    .iter()
                    .any(|item| item.get("type").and_then(Value::as_str) == Some(wanted)),
                None => false,
            },
            Check::Never => false,
            Check::Unknown => true,
        }
    }
}

/// Strip the `("...")` wrapper around a check argument.
fn strip_call_argument(rest: &str) -> String {
    rest.trim_matches(|c| c == '(' || c == ')' || c == '"' || c == ' ')
        .to_string()
}

/// The compiled condition table.
#[derive(Debug, Clone, Default)]
pub struct ConditionTable {
    checks: HashMap<String, Check>,
}

impl ConditionTable {
    /// Build the table from configuration, parsing every check once.
    pub fn from_config(conditions: &[ConditionDef]) -> Self {
        let mut checks = HashMap::new();
        for cond in conditions {
            let check = Check::parse(&cond.check);
            if check == Check::Unknown {
                debug!(
                    condition = %cond.name,
                    check = %cond.check,
                    "Unrecognized condition check, will always pass"
                );
            }
            checks.insert(cond.name.clone(), check);
        }
        Self { checks }
    }

    /// Evaluate a condition by name against a document.
    ///
    /// Empty names and names without a table entry are true.
    pub fn evaluate(&self, name: &str, document: &Value) -> bool {
        if name.is_empty() {
            return true;
        }
        match self.checks.get(name) {
            Some(check) => check.evaluate(document),
            None => true,
        }
    }
}

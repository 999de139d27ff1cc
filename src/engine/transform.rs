//! Named value transforms applied to extracted fields
//!
//! The transform set is fixed in code; the `transforms` section of the
//! configuration only documents it. Dispatch is a closed enum, never
//! reflection. Unknown transform names pass the value through unchanged.
//!
//! Shape expectations per transform:
//! - `bool_to_int`: booleans map to 0/1, anything else is identity
//! - `mw_to_watts`: numbers are divided by 1000, anything else is identity
//! - the string-encoding transforms (`connected_to_int`, `ok_to_int`,
//!   `enabled_to_int`, `battery_state_to_int`) yield 0 for any input that is
//!   not the expected string, matching the device firmware's tristate fields
//!
//! The multi-input `signal_strength_percentage` transform is not applied
//! here; it needs two paths and runs as a second pass in the renderer.

use serde_json::Value;

/// Transform name handled by the renderer's multi-path pass, not by
/// [`apply`].
pub const SIGNAL_STRENGTH_PERCENTAGE: &str = "signal_strength_percentage";

/// The closed set of single-value transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// `true`/`false` to 1/0
    BoolToInt,
    /// Milliwatts to watts
    MwToWatts,
    /// `"connected"` to 1, anything else to 0
    ConnectedToInt,
    /// `"ok"` to 1, anything else to 0
    OkToInt,
    /// `"enabled"` to 1, anything else to 0
    EnabledToInt,
    /// `"charging"` to 1, `"discharging"` to -1, anything else to 0
    BatteryStateToInt,
}

impl Transform {
    /// Look up a transform by its configured name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool_to_int" => Some(Transform::BoolToInt),
            "mw_to_watts" => Some(Transform::MwToWatts),
            "connected_to_int" => Some(Transform::ConnectedToInt),
            "ok_to_int" => Some(Transform::OkToInt),
            "enabled_to_int" => Some(Transform::EnabledToInt),
            "battery_state_to_int" => Some(Transform::BatteryStateToInt),
            _ => None,
        }
    }
}

/// Apply a named transform to a value.
///
/// Total over all inputs: unknown names and unexpected shapes fall back as
/// described in the module docs; this never fails.
pub fn apply(value: Value, name: &str) -> Value {
    let Some(transform) = Transform::from_name(name) else {
        return value;
    };

    match transform {
        Transform::BoolToInt => match value {
            Value::Bool(b) => Value::from(if b { 1 } else { 0 }),
            other => other,
        },
        Transform::MwToWatts => match value.as_f64() {
            Some(mw) => Value::from(mw / 1000.0),
            None => value,
        },
        Transform::ConnectedToInt => string_eq_to_int(&value, "connected"),
        Transform::OkToInt => string_eq_to_int(&value, "ok"),
        Transform::EnabledToInt => string_eq_to_int(&value, "enabled"),
        Transform::BatteryStateToInt => {
            let state = match value.as_str() {
                Some("charging") => 1,
                Some("discharging") => -1,
                _ => 0,
            };
            Value::from(state)
        }
    }
}

fn string_eq_to_int(value: &Value, expected: &str) -> Value {
    Value::from(if value.as_str() == Some(expected) { 1 } else { 0 })
}
